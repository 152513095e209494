//! Long-press gesture recognizer
//!
//! Arms a one-shot timer on the first press; the timer firing moves the
//! gesture to RECOGNIZING, the following release completes it. A release
//! before the timer fired, or movement beyond the cancel threshold,
//! cancels.

use std::time::Duration;

use crate::event::{EventKind, ModifiersState};
use crate::stage::StageHandler;
use crate::timer::TimerToken;

use super::{GestureInnerHandle, GesturePoint, GestureRecognizer, GestureState};

/// Recognizer for press-and-hold gestures
pub struct LongPressGesture<D: StageHandler> {
    cancel_threshold: Option<i32>,

    /// `None` uses the long-press duration of the settings store
    long_press_duration: Option<u32>,
    long_press_timer: Option<TimerToken>,

    press_button: u32,
    modifier_state: ModifiersState,

    on_begin: Option<Box<dyn FnMut(&mut D) + Send>>,
    on_end: Option<Box<dyn FnMut(&mut D) + Send>>,
    on_cancel: Option<Box<dyn FnMut(&mut D) + Send>>,
}

impl<D: StageHandler> std::fmt::Debug for LongPressGesture<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongPressGesture")
            .field("long_press_duration", &self.long_press_duration)
            .field("timer_armed", &self.long_press_timer.is_some())
            .finish_non_exhaustive()
    }
}

impl<D: StageHandler> Default for LongPressGesture<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: StageHandler> LongPressGesture<D> {
    /// Create a long-press recognizer using the settings-store duration
    pub fn new() -> LongPressGesture<D> {
        LongPressGesture {
            cancel_threshold: None,
            long_press_duration: None,
            long_press_timer: None,
            press_button: 0,
            modifier_state: ModifiersState::empty(),
            on_begin: None,
            on_end: None,
            on_cancel: None,
        }
    }

    /// Minimum duration of a press in milliseconds for it to count as a
    /// long press; zero recognizes on the press itself
    pub fn with_duration(mut self, duration_ms: u32) -> Self {
        self.long_press_duration = Some(duration_ms);
        self
    }

    /// Movement threshold in logical pixels that cancels the gesture,
    /// `-1` to disable the threshold
    pub fn with_cancel_threshold(mut self, threshold: i32) -> Self {
        self.cancel_threshold = Some(threshold);
        self
    }

    /// Callback invoked when the long press began
    pub fn on_begin(mut self, callback: impl FnMut(&mut D) + Send + 'static) -> Self {
        self.on_begin = Some(Box::new(callback));
        self
    }

    /// Callback invoked when the long press ended after being recognized
    pub fn on_end(mut self, callback: impl FnMut(&mut D) + Send + 'static) -> Self {
        self.on_end = Some(Box::new(callback));
        self
    }

    /// Callback invoked when the gesture was cancelled
    pub fn on_cancel(mut self, callback: impl FnMut(&mut D) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(callback));
        self
    }

    /// The button that was pressed, the primary button for touch
    pub fn button(&self) -> u32 {
        self.press_button
    }

    /// The modifier state of the press
    pub fn modifiers(&self) -> ModifiersState {
        self.modifier_state
    }

    fn effective_duration(&self, data: &D) -> u32 {
        self.long_press_duration
            .unwrap_or_else(|| data.settings().long_press_duration_ms())
    }

    fn effective_cancel_threshold(&self, data: &D) -> i32 {
        self.cancel_threshold
            .unwrap_or_else(|| data.settings().drag_threshold_px() as i32)
    }

    /// Drop the timer token before cancelling the external timer, so a
    /// fire during teardown cannot observe a stale token
    fn clear_timer(&mut self, data: &mut D) {
        if let Some(timer) = self.long_press_timer.take() {
            data.cancel_timer(timer);
        }
    }
}

impl<D: StageHandler> GestureRecognizer<D> for LongPressGesture<D> {
    fn points_began(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
        let point = &points[0];

        if gesture.n_points() > 1 {
            gesture.set_state(self, data, GestureState::Cancelled);
            return;
        }

        // Use the primary button as button number for touch events
        self.press_button = if point.latest_event.kind == EventKind::ButtonPress {
            point.latest_event.button
        } else {
            1
        };
        self.modifier_state = point.latest_event.modifiers;

        let duration = self.effective_duration(data);
        if duration == 0 {
            gesture.set_state(self, data, GestureState::Recognizing);
        } else {
            let handle = gesture.gesture();
            self.long_press_timer = Some(data.schedule_once(
                Duration::from_millis(duration as u64),
                Box::new(move |data| {
                    handle.set_state(data, GestureState::Recognizing);
                }),
            ));
        }
    }

    fn points_moved(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
        let point = &points[0];
        let distance = point.begin.distance(&point.motion);
        let threshold = self.effective_cancel_threshold(data);

        if threshold >= 0 && distance > threshold as f64 {
            gesture.set_state(self, data, GestureState::Cancelled);
        }
    }

    fn points_ended(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        _points: &[GesturePoint],
    ) {
        if gesture.state() == GestureState::Recognizing {
            gesture.set_state(self, data, GestureState::Completed);
        } else {
            gesture.set_state(self, data, GestureState::Cancelled);
        }
    }

    fn points_cancelled(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        _points: &[GesturePoint],
    ) {
        gesture.set_state(self, data, GestureState::Cancelled);
    }

    fn state_changed(
        &mut self,
        data: &mut D,
        _gesture: &mut GestureInnerHandle<'_, D>,
        _old_state: GestureState,
        new_state: GestureState,
    ) {
        match new_state {
            GestureState::Recognizing => {
                if let Some(callback) = self.on_begin.as_mut() {
                    callback(data);
                }
            }
            GestureState::Completed => {
                if let Some(callback) = self.on_end.as_mut() {
                    callback(data);
                }
            }
            GestureState::Cancelled => {
                if let Some(callback) = self.on_cancel.as_mut() {
                    callback(data);
                }
            }
            _ => {}
        }

        if matches!(new_state, GestureState::Completed | GestureState::Cancelled) {
            self.clear_timer(data);
            self.press_button = 0;
            self.modifier_state = ModifiersState::empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::gesture::{Gesture, GestureState};
    use crate::test_support::*;

    struct Notifications {
        begin: AtomicUsize,
        end: AtomicUsize,
        cancel: AtomicUsize,
    }

    fn long_press_setup(
        duration: u32,
    ) -> (
        TestStage,
        TestActor,
        Gesture<TestStage>,
        Arc<Notifications>,
    ) {
        let mut stage = TestStage::new();
        let actor = TestActor::root("surface");
        let notifications = Arc::new(Notifications {
            begin: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            cancel: AtomicUsize::new(0),
        });
        let (begin, end, cancel) = (
            notifications.clone(),
            notifications.clone(),
            notifications.clone(),
        );
        let recognizer = LongPressGesture::new()
            .with_duration(duration)
            .with_cancel_threshold(10)
            .on_begin(move |_| {
                begin.begin.fetch_add(1, Ordering::SeqCst);
            })
            .on_end(move |_| {
                end.end.fetch_add(1, Ordering::SeqCst);
            })
            .on_cancel(move |_| {
                cancel.cancel.fetch_add(1, Ordering::SeqCst);
            });
        let gesture = stage.gestures.add_gesture(recognizer);
        gesture.attach(&mut stage, actor.clone());
        (stage, actor, gesture, notifications)
    }

    #[test]
    fn timer_firing_begins_and_release_ends() {
        let (mut stage, actor, gesture, notifications) = long_press_setup(500);
        let device = pointer();

        stage.dispatch(&[actor.clone()], &press(device, 5.0, 5.0, 0));
        assert_eq!(stage.pending_timers(), 1);
        assert_eq!(notifications.begin.load(Ordering::SeqCst), 0);

        assert!(stage.fire_next_timer());
        assert_eq!(gesture.state(), GestureState::Recognizing);
        assert_eq!(notifications.begin.load(Ordering::SeqCst), 1);

        stage.dispatch(&[actor], &release(device, 5.0, 5.0, 600));
        assert_eq!(notifications.end.load(Ordering::SeqCst), 1);
        assert_eq!(gesture.state(), GestureState::Waiting);
    }

    #[test]
    fn release_before_the_timer_cancels() {
        let (mut stage, actor, gesture, notifications) = long_press_setup(500);
        let device = pointer();

        stage.dispatch(&[actor.clone()], &press(device, 5.0, 5.0, 0));
        stage.dispatch(&[actor], &release(device, 5.0, 5.0, 100));

        assert_eq!(notifications.begin.load(Ordering::SeqCst), 0);
        assert_eq!(notifications.cancel.load(Ordering::SeqCst), 1);
        assert_eq!(stage.pending_timers(), 0);
        assert_eq!(gesture.state(), GestureState::Waiting);
    }

    #[test]
    fn movement_cancels_and_clears_the_timer() {
        let (mut stage, actor, gesture, notifications) = long_press_setup(500);
        let device = pointer();

        stage.dispatch(&[actor.clone()], &press(device, 5.0, 5.0, 0));
        stage.dispatch(&[actor.clone()], &motion(device, 5.0, 30.0, 100));

        assert_eq!(gesture.state(), GestureState::Cancelled);
        assert_eq!(notifications.cancel.load(Ordering::SeqCst), 1);
        assert_eq!(stage.pending_timers(), 0);

        stage.dispatch(&[actor], &release(device, 5.0, 30.0, 200));
        assert_eq!(gesture.state(), GestureState::Waiting);
    }

    #[test]
    fn zero_duration_recognizes_immediately() {
        let (mut stage, actor, gesture, notifications) = long_press_setup(0);
        let device = touchscreen();

        stage.dispatch(&[actor.clone()], &touch_begin(device, 0, 5.0, 5.0, 0));
        assert_eq!(gesture.state(), GestureState::Recognizing);
        assert_eq!(notifications.begin.load(Ordering::SeqCst), 1);
        assert_eq!(stage.pending_timers(), 0);

        stage.dispatch(&[actor], &touch_end(device, 0, 5.0, 5.0, 100));
        assert_eq!(notifications.end.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_point_cancels() {
        let (mut stage, actor, gesture, notifications) = long_press_setup(500);
        let device = touchscreen();

        stage.dispatch(&[actor.clone()], &touch_begin(device, 0, 5.0, 5.0, 0));
        stage.dispatch(&[actor], &touch_begin(device, 1, 15.0, 5.0, 50));

        assert_eq!(gesture.state(), GestureState::Cancelled);
        assert_eq!(notifications.cancel.load(Ordering::SeqCst), 1);
        assert_eq!(stage.pending_timers(), 0);
    }

    #[test]
    fn settings_duration_is_used_when_unset() {
        let mut stage = TestStage::new();
        stage.settings.long_press_duration = 250;
        let actor = TestActor::root("surface");
        let gesture = stage.gestures.add_gesture(LongPressGesture::new());
        gesture.attach(&mut stage, actor.clone());

        stage.dispatch(&[actor], &press(pointer(), 5.0, 5.0, 0));
        assert_eq!(stage.timers.len(), 1);
        assert_eq!(stage.timers[0].delay, std::time::Duration::from_millis(250));
    }
}
