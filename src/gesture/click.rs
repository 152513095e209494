//! Click gesture recognizer
//!
//! Completes when the required number of presses and releases occurred
//! within the double-click interval, all with the same pointer button or
//! touch source, and with each press within the cancel threshold of the
//! first one. Movement beyond the threshold or a foreign source device
//! cancels.

use std::time::Duration;

use crate::event::{EventFlags, EventKind, ModifiersState};
use crate::stage::StageHandler;
use crate::utils::Point;
use crate::timer::TimerToken;
use tracing::warn;

use super::{GestureInnerHandle, GesturePoint, GestureRecognizer, GestureState};

/// Details of a recognized click, handed to the `clicked` callback
#[derive(Debug, Clone, Copy)]
pub struct ClickInfo {
    /// Position of the first press
    pub coords: Point,
    /// The pressed button, `0` for touch
    pub button: u32,
    /// Modifier state held throughout the click, empty if press and
    /// release states differed
    pub modifiers: ModifiersState,
}

/// Recognizer for single and multi clicks
pub struct ClickGesture<D: StageHandler> {
    pressed: bool,

    cancel_threshold: Option<i32>,

    n_clicks_required: u32,
    n_clicks_happened: u32,
    next_click_timer: Option<TimerToken>,
    /// The episode ended between the presses of a multi-click; the chain
    /// stays alive until the next press or the next-click timeout
    awaiting_next_click: bool,

    is_touch: bool,
    press_coords: Point,
    press_button: u32,
    modifier_state: ModifiersState,

    on_clicked: Option<Box<dyn FnMut(&mut D, &ClickInfo) + Send>>,
    on_pressed_changed: Option<Box<dyn FnMut(&mut D, bool) + Send>>,
}

impl<D: StageHandler> std::fmt::Debug for ClickGesture<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickGesture")
            .field("pressed", &self.pressed)
            .field("n_clicks_required", &self.n_clicks_required)
            .field("n_clicks_happened", &self.n_clicks_happened)
            .finish_non_exhaustive()
    }
}

impl<D: StageHandler> Default for ClickGesture<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: StageHandler> ClickGesture<D> {
    /// Create a click recognizer completing after a single click
    pub fn new() -> ClickGesture<D> {
        ClickGesture {
            pressed: false,
            cancel_threshold: None,
            n_clicks_required: 1,
            n_clicks_happened: 0,
            next_click_timer: None,
            awaiting_next_click: false,
            is_touch: false,
            press_coords: Point::ZERO,
            press_button: 0,
            modifier_state: ModifiersState::empty(),
            on_clicked: None,
            on_pressed_changed: None,
        }
    }

    /// Require `n` presses and releases for the gesture to complete
    ///
    /// Zero is rejected and the previous value kept.
    pub fn with_n_clicks_required(mut self, n: u32) -> Self {
        self.set_n_clicks_required(n);
        self
    }

    /// Movement threshold in logical pixels that cancels the click, `-1`
    /// to disable the threshold
    ///
    /// Defaults to the drag threshold of the settings store.
    pub fn with_cancel_threshold(mut self, threshold: i32) -> Self {
        self.cancel_threshold = Some(threshold);
        self
    }

    /// Callback invoked when the click was recognized
    pub fn on_clicked(mut self, callback: impl FnMut(&mut D, &ClickInfo) + Send + 'static) -> Self {
        self.on_clicked = Some(Box::new(callback));
        self
    }

    /// Callback invoked whenever the "pressed" state of the actor should
    /// change
    pub fn on_pressed_changed(mut self, callback: impl FnMut(&mut D, bool) + Send + 'static) -> Self {
        self.on_pressed_changed = Some(Box::new(callback));
        self
    }

    /// Require `n` presses and releases for the gesture to complete
    pub fn set_n_clicks_required(&mut self, n: u32) {
        if n == 0 {
            warn!("rejecting n_clicks_required of zero");
            return;
        }
        self.n_clicks_required = n;
    }

    /// The number of clicks required for the gesture to complete
    pub fn n_clicks_required(&self) -> u32 {
        self.n_clicks_required
    }

    /// Whether the actor the gesture is attached to should be drawn
    /// pressed
    pub fn pressed(&self) -> bool {
        self.pressed
    }

    /// The button that was pressed, `0` for touch
    pub fn button(&self) -> u32 {
        self.press_button
    }

    /// The modifier state of the click
    pub fn modifiers(&self) -> ModifiersState {
        self.modifier_state
    }

    /// Position of the first press of the click
    pub fn coords(&self) -> Point {
        self.press_coords
    }

    fn effective_cancel_threshold(&self, data: &D) -> i32 {
        self.cancel_threshold
            .unwrap_or_else(|| data.settings().drag_threshold_px() as i32)
    }

    fn set_pressed(&mut self, data: &mut D, pressed: bool) {
        if self.pressed == pressed {
            return;
        }
        self.pressed = pressed;
        if let Some(callback) = self.on_pressed_changed.as_mut() {
            callback(data, pressed);
        }
    }

    fn clear_timer(&mut self, data: &mut D) {
        if let Some(timer) = self.next_click_timer.take() {
            data.cancel_timer(timer);
        }
    }

    fn reset_click_chain(&mut self) {
        self.next_click_timer = None;
        self.n_clicks_happened = 0;
        self.awaiting_next_click = false;
        self.press_coords = Point::ZERO;
        self.press_button = 0;
        self.modifier_state = ModifiersState::empty();
    }
}

impl<D: StageHandler> GestureRecognizer<D> for ClickGesture<D> {
    fn points_began(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
        let point = &points[0];

        if gesture.n_points() != 1 {
            gesture.set_state(self, data, GestureState::Cancelled);
            return;
        }

        self.awaiting_next_click = false;
        self.clear_timer(data);

        let is_touch = point.latest_event.kind == EventKind::TouchBegin;
        let press_button = if is_touch { 0 } else { point.latest_event.button };
        let modifier_state = point.latest_event.modifiers;

        if self.n_clicks_happened == 0 {
            self.is_touch = is_touch;
            self.press_button = press_button;
            self.modifier_state = modifier_state;
            self.press_coords = point.begin;
        } else {
            let distance = self.press_coords.distance(&point.begin);
            let threshold = self.effective_cancel_threshold(data);

            if self.is_touch != is_touch
                || self.press_button != press_button
                || (threshold >= 0 && distance > threshold as f64)
            {
                self.set_pressed(data, false);
                gesture.set_state(self, data, GestureState::Cancelled);
                return;
            }
        }

        if self.n_clicks_required > 1 {
            let timeout = Duration::from_millis(data.settings().double_click_time_ms() as u64);
            let handle = gesture.gesture();
            self.next_click_timer = Some(data.schedule_once(
                timeout,
                Box::new(move |data| {
                    handle.set_state(data, GestureState::Cancelled);
                    handle.with_recognizer::<ClickGesture<D>, _>(|recognizer| {
                        recognizer.reset_click_chain()
                    });
                }),
            ));
        }

        self.set_pressed(data, true);
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
        points: &[GesturePoint],
    ) {
        let point = &points[0];

        self.n_clicks_happened += 1;

        if self.n_clicks_happened == self.n_clicks_required {
            self.clear_timer(data);

            // Exclude the button mask so press and release states compare
            // properly; modifier keys are expected to be held throughout
            // the whole click.
            let release_state = point
                .latest_event
                .modifiers
                .difference(ModifiersState::BUTTON_MASK);
            if release_state != self.modifier_state {
                self.modifier_state = ModifiersState::empty();
            }

            if self.pressed {
                gesture.set_state(self, data, GestureState::Completed);
            } else {
                gesture.set_state(self, data, GestureState::Cancelled);
            }
        } else {
            self.awaiting_next_click = true;
        }

        self.set_pressed(data, false);
    }

    fn points_cancelled(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        _points: &[GesturePoint],
    ) {
        gesture.set_state(self, data, GestureState::Cancelled);
    }

    fn crossing_event(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        _point: &GesturePoint,
        kind: EventKind,
        _time: u32,
        _flags: EventFlags,
        source: &D::Actor,
        _related: Option<&D::Actor>,
    ) {
        if gesture.actor().map(|actor| actor == *source).unwrap_or(false) {
            self.set_pressed(data, kind == EventKind::Enter);
        }
    }

    fn state_changed(
        &mut self,
        data: &mut D,
        _gesture: &mut GestureInnerHandle<'_, D>,
        _old_state: GestureState,
        new_state: GestureState,
    ) {
        if new_state == GestureState::Completed {
            let info = ClickInfo {
                coords: self.press_coords,
                button: self.press_button,
                modifiers: self.modifier_state,
            };
            if let Some(callback) = self.on_clicked.as_mut() {
                callback(data, &info);
            }
        }

        if matches!(new_state, GestureState::Completed | GestureState::Cancelled) {
            if new_state == GestureState::Cancelled && self.awaiting_next_click {
                // The episode collapsed between the presses of a
                // multi-click; the chain stays alive until the timeout.
                return;
            }

            self.set_pressed(data, false);
            self.clear_timer(data);
            self.reset_click_chain();
        }
    }
}
