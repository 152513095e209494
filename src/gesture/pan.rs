//! Pan gesture recognizer
//!
//! A multi-point drag. Recognition begins once the cumulative displacement
//! on the constrained axis exceeds the begin threshold while the point
//! count is within the configured range. A rolling window of per-event
//! deltas feeds the end-velocity computation.

use tracing::warn;

use crate::stage::StageHandler;
use crate::utils::{Point, Vec2};

use super::{GestureError, GestureInnerHandle, GesturePoint, GestureRecognizer, GestureState};

const DEFAULT_BEGIN_THRESHOLD_PX: f64 = 16.0;

const EVENT_HISTORY_DURATION_MS: u32 = 150;
const EVENT_HISTORY_MIN_STORE_INTERVAL_MS: u32 = 1;
const EVENT_HISTORY_MAX_LENGTH: usize =
    (EVENT_HISTORY_DURATION_MS / EVENT_HISTORY_MIN_STORE_INTERVAL_MS) as usize;

/// Axis constraint of a pan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PanAxis {
    /// Horizontal panning only
    X,
    /// Vertical panning only
    Y,
    /// Panning in any direction
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    delta: Vec2,
    time: u32,
}

/// Recognizer for single and multi-point drags
pub struct PanGesture<D: StageHandler> {
    begin_threshold: f64,

    event_history: Vec<HistoryEntry>,
    event_history_begin_index: usize,

    total_delta: Vec2,
    latest_event_time: u32,

    pan_axis: PanAxis,

    min_n_points: u32,
    /// Zero allows an unlimited number of points
    max_n_points: u32,

    /// Index of the point currently tracked for delta accumulation
    use_point: u32,

    on_begin: Option<Box<dyn FnMut(&mut D, Point) + Send>>,
    on_update: Option<Box<dyn FnMut(&mut D, Vec2, f64) + Send>>,
    on_end: Option<Box<dyn FnMut(&mut D, Vec2) + Send>>,
    on_cancel: Option<Box<dyn FnMut(&mut D) + Send>>,
}

impl<D: StageHandler> std::fmt::Debug for PanGesture<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanGesture")
            .field("begin_threshold", &self.begin_threshold)
            .field("pan_axis", &self.pan_axis)
            .field("min_n_points", &self.min_n_points)
            .field("max_n_points", &self.max_n_points)
            .field("use_point", &self.use_point)
            .finish_non_exhaustive()
    }
}

impl<D: StageHandler> Default for PanGesture<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: StageHandler> PanGesture<D> {
    /// Create a one-point pan with the default begin threshold
    pub fn new() -> PanGesture<D> {
        PanGesture {
            begin_threshold: DEFAULT_BEGIN_THRESHOLD_PX,
            event_history: Vec::with_capacity(8),
            event_history_begin_index: 0,
            total_delta: Vec2::ZERO,
            latest_event_time: 0,
            pan_axis: PanAxis::Both,
            min_n_points: 1,
            max_n_points: 0,
            use_point: 0,
            on_begin: None,
            on_update: None,
            on_end: None,
            on_cancel: None,
        }
    }

    /// Displacement in logical pixels that has to be panned for the
    /// gesture to begin
    pub fn with_begin_threshold(mut self, threshold: f64) -> Self {
        self.begin_threshold = threshold;
        self
    }

    /// Constrain the pan to an axis
    pub fn with_pan_axis(mut self, axis: PanAxis) -> Self {
        self.pan_axis = axis;
        self
    }

    /// Callback invoked when the pan began, with the begin position of
    /// the tracked point
    pub fn on_begin(mut self, callback: impl FnMut(&mut D, Point) + Send + 'static) -> Self {
        self.on_begin = Some(Box::new(callback));
        self
    }

    /// Callback invoked on each update with the delta since the last
    /// update and the total panned distance
    pub fn on_update(mut self, callback: impl FnMut(&mut D, Vec2, f64) + Send + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }

    /// Callback invoked when the pan ended, with the end velocity in
    /// pixels per millisecond
    pub fn on_end(mut self, callback: impl FnMut(&mut D, Vec2) + Send + 'static) -> Self {
        self.on_end = Some(Box::new(callback));
        self
    }

    /// Callback invoked when the pan was cancelled; no velocity is
    /// reported
    pub fn on_cancel(mut self, callback: impl FnMut(&mut D) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(callback));
        self
    }

    /// The begin threshold in logical pixels
    pub fn begin_threshold(&self) -> f64 {
        self.begin_threshold
    }

    /// The axis constraint
    pub fn pan_axis(&self) -> PanAxis {
        self.pan_axis
    }

    /// The minimum number of points for the gesture to start
    pub fn min_n_points(&self) -> u32 {
        self.min_n_points
    }

    /// The maximum number of points to use, zero for unlimited
    pub fn max_n_points(&self) -> u32 {
        self.max_n_points
    }

    /// Set the minimum number of points for the gesture to start
    pub fn set_min_n_points(&mut self, min_n_points: u32) -> Result<(), GestureError> {
        if min_n_points < 1 || (self.max_n_points != 0 && min_n_points > self.max_n_points) {
            warn!(
                "rejecting pan point range: min {} with max {}",
                min_n_points, self.max_n_points
            );
            return Err(GestureError::InvalidPointRange {
                min: min_n_points,
                max: self.max_n_points,
            });
        }
        self.min_n_points = min_n_points;
        Ok(())
    }

    /// Set the maximum number of points to use, zero for unlimited
    pub fn set_max_n_points(&mut self, max_n_points: u32) -> Result<(), GestureError> {
        if max_n_points != 0 && max_n_points < self.min_n_points {
            warn!(
                "rejecting pan point range: min {} with max {}",
                self.min_n_points, max_n_points
            );
            return Err(GestureError::InvalidPointRange {
                min: self.min_n_points,
                max: max_n_points,
            });
        }
        self.max_n_points = max_n_points;
        Ok(())
    }

    /// Builder form of [`set_min_n_points`](PanGesture::set_min_n_points)
    pub fn with_min_n_points(mut self, min_n_points: u32) -> Self {
        let _ = self.set_min_n_points(min_n_points);
        self
    }

    /// Builder form of [`set_max_n_points`](PanGesture::set_max_n_points)
    pub fn with_max_n_points(mut self, max_n_points: u32) -> Self {
        let _ = self.set_max_n_points(max_n_points);
        self
    }

    fn n_points_in_range(&self, n_points: u32) -> bool {
        n_points >= self.min_n_points && (self.max_n_points == 0 || n_points <= self.max_n_points)
    }

    fn last_history_entry(&self) -> Option<&HistoryEntry> {
        if self.event_history.is_empty() {
            return None;
        }
        let index = (self.event_history_begin_index + EVENT_HISTORY_MAX_LENGTH - 1)
            % EVENT_HISTORY_MAX_LENGTH;
        self.event_history.get(index)
    }

    fn add_delta_to_event_history(&mut self, delta: Vec2, time: u32) {
        if let Some(last) = self.last_history_entry() {
            if last.time > time.saturating_sub(EVENT_HISTORY_MIN_STORE_INTERVAL_MS) {
                return;
            }
        }

        let entry = HistoryEntry { delta, time };
        if self.event_history.len() < EVENT_HISTORY_MAX_LENGTH {
            self.event_history.push(entry);
        } else {
            self.event_history[self.event_history_begin_index] = entry;
        }
        self.event_history_begin_index =
            (self.event_history_begin_index + 1) % EVENT_HISTORY_MAX_LENGTH;
    }

    fn calculate_velocity(&self, latest_event_time: u32) -> Vec2 {
        let window_start = latest_event_time.saturating_sub(EVENT_HISTORY_DURATION_MS);
        let mut first_time = None;
        let mut last_time = 0;
        let mut accumulated = Vec2::ZERO;

        let mut j = self.event_history_begin_index;
        for _ in 0..self.event_history.len() {
            if j >= self.event_history.len() {
                j = 0;
            }
            let entry = &self.event_history[j];
            if entry.time >= window_start {
                first_time.get_or_insert(entry.time);
                accumulated += entry.delta;
                last_time = entry.time;
            }
            j += 1;
        }

        let Some(first_time) = first_time else {
            return Vec2::ZERO;
        };
        if first_time == last_time {
            return Vec2::ZERO;
        }

        let time_delta = (last_time - first_time) as f64;
        Vec2::new(accumulated.x / time_delta, accumulated.y / time_delta)
    }

    /// Reduce the per-point deltas of simultaneous updates with an
    /// axis-wise signed maximum, preserving convergent and divergent
    /// movements without double-counting
    fn delta_from_points(points: &[GesturePoint]) -> Vec2 {
        let mut biggest_pos = Vec2::ZERO;
        let mut biggest_neg = Vec2::ZERO;

        for point in points {
            let delta = point.motion - point.last;

            if delta.x > 0.0 {
                biggest_pos.x = delta.x.max(biggest_pos.x);
            } else {
                biggest_neg.x = delta.x.min(biggest_neg.x);
            }

            if delta.y > 0.0 {
                biggest_pos.y = delta.y.max(biggest_pos.y);
            } else {
                biggest_neg.y = delta.y.min(biggest_neg.y);
            }
        }

        biggest_pos + biggest_neg
    }

    fn threshold_exceeded(&self, total_distance: f64) -> bool {
        match self.pan_axis {
            PanAxis::Both => total_distance >= self.begin_threshold,
            PanAxis::X => self.total_delta.x.abs() >= self.begin_threshold,
            PanAxis::Y => self.total_delta.y.abs() >= self.begin_threshold,
        }
    }
}

impl<D: StageHandler> GestureRecognizer<D> for PanGesture<D> {
    fn points_began(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
        let total_n_points = gesture.n_points() as u32;
        self.latest_event_time = points[0].event_time;

        if total_n_points < self.min_n_points {
            return;
        }

        if gesture.state() == GestureState::Possible
            && self.max_n_points != 0
            && total_n_points > self.max_n_points
        {
            gesture.set_state(self, data, GestureState::Cancelled);
            return;
        }

        if self.event_history.is_empty() {
            self.add_delta_to_event_history(Vec2::ZERO, points[0].event_time);
        }

        if gesture.state() == GestureState::Possible && self.begin_threshold == 0.0 {
            gesture.set_state(self, data, GestureState::Recognizing);
        }

        // If we're already recognizing, set the state again to claim the
        // new point, too
        if gesture.state() == GestureState::Recognizing {
            gesture.set_state(self, data, GestureState::Recognizing);
        }

        self.use_point = points[0].index;
    }

    fn points_moved(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
        if points[0].index != self.use_point {
            return;
        }
        self.latest_event_time = points[0].event_time;

        let delta = Self::delta_from_points(points);
        self.add_delta_to_event_history(delta, points[0].event_time);

        self.total_delta += delta;
        let total_distance = self.total_delta.length();

        let total_n_points = gesture.n_points() as u32;
        if gesture.state() == GestureState::Possible
            && self.n_points_in_range(total_n_points)
            && self.threshold_exceeded(total_distance)
        {
            gesture.set_state(self, data, GestureState::Recognizing);
        }

        if gesture.state() == GestureState::Recognizing {
            if let Some(callback) = self.on_update.as_mut() {
                callback(data, delta, total_distance);
            }
        }
    }

    fn points_ended(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
        let total_n_points = gesture.n_points() as u32;
        let ended = points.len() as u32;
        self.latest_event_time = points[0].event_time;

        if total_n_points - ended >= self.min_n_points {
            // Enough points remain; if the tracked point ended, move on
            // to the oldest remaining one.
            if points.iter().any(|p| p.index == self.use_point) {
                let remaining = gesture
                    .points()
                    .iter()
                    .find(|p| !points.iter().any(|e| e.index == p.index))
                    .map(|p| p.index);
                if let Some(index) = remaining {
                    self.use_point = index;
                }
            }
            return;
        }

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
        gesture: &mut GestureInnerHandle<'_, D>,
        old_state: GestureState,
        new_state: GestureState,
    ) {
        if old_state != GestureState::Recognizing && new_state == GestureState::Recognizing {
            let begin = gesture.points().first().map(|p| p.begin).unwrap_or(Point::ZERO);
            if let Some(callback) = self.on_begin.as_mut() {
                callback(data, begin);
            }
        }

        if old_state == GestureState::Recognizing && new_state == GestureState::Completed {
            let velocity = self.calculate_velocity(self.latest_event_time);
            if let Some(callback) = self.on_end.as_mut() {
                callback(data, velocity);
            }
        }

        if old_state == GestureState::Recognizing && new_state == GestureState::Cancelled {
            if let Some(callback) = self.on_cancel.as_mut() {
                callback(data);
            }
        }

        if matches!(new_state, GestureState::Completed | GestureState::Cancelled) {
            self.total_delta = Vec2::ZERO;
            self.event_history.clear();
            self.event_history_begin_index = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::gesture::{Gesture, GestureState};
    use crate::test_support::*;

    #[derive(Default)]
    struct PanLog {
        begins: Vec<Point>,
        updates: Vec<(Vec2, f64)>,
        ends: Vec<Vec2>,
        cancels: usize,
    }

    fn pan_setup(recognizer: PanGesture<TestStage>) -> (
        TestStage,
        TestActor,
        Gesture<TestStage>,
        Arc<Mutex<PanLog>>,
    ) {
        let mut stage = TestStage::new();
        let actor = TestActor::root("scroller");
        let log = Arc::new(Mutex::new(PanLog::default()));
        let (begin, update, end, cancel) = (log.clone(), log.clone(), log.clone(), log.clone());
        let recognizer = recognizer
            .on_begin(move |_, point| begin.lock().unwrap().begins.push(point))
            .on_update(move |_, delta, distance| {
                update.lock().unwrap().updates.push((delta, distance))
            })
            .on_end(move |_, velocity| end.lock().unwrap().ends.push(velocity))
            .on_cancel(move |_| cancel.lock().unwrap().cancels += 1);
        let gesture = stage.gestures.add_gesture(recognizer);
        gesture.attach(&mut stage, actor.clone());
        (stage, actor, gesture, log)
    }

    #[test]
    fn end_velocity_is_window_sum_over_time() {
        let (mut stage, actor, gesture, log) = pan_setup(PanGesture::new().with_begin_threshold(0.0));
        let device = touchscreen();

        stage.dispatch(&[actor.clone()], &touch_begin(device, 0, 0.0, 0.0, 0));
        assert_eq!(gesture.state(), GestureState::Recognizing);

        stage.dispatch(&[actor.clone()], &touch_update(device, 0, 10.0, 0.0, 50));
        stage.dispatch(&[actor.clone()], &touch_update(device, 0, 20.0, 0.0, 100));
        stage.dispatch(&[actor], &touch_end(device, 0, 20.0, 0.0, 100));

        let log = log.lock().unwrap();
        assert_eq!(log.ends.len(), 1);
        assert!((log.ends[0].x - 0.2).abs() < f64::EPSILON);
        assert_eq!(log.ends[0].y, 0.0);
        assert_eq!(gesture.state(), GestureState::Waiting);
    }

    #[test]
    fn begin_threshold_gates_recognition() {
        let (mut stage, actor, gesture, log) =
            pan_setup(PanGesture::new().with_begin_threshold(16.0));
        let device = pointer();

        stage.dispatch(&[actor.clone()], &press(device, 0.0, 0.0, 0));
        stage.dispatch(&[actor.clone()], &motion(device, 10.0, 0.0, 10));
        assert_eq!(gesture.state(), GestureState::Possible);
        assert!(log.lock().unwrap().begins.is_empty());

        stage.dispatch(&[actor.clone()], &motion(device, 20.0, 0.0, 20));
        assert_eq!(gesture.state(), GestureState::Recognizing);
        {
            let log = log.lock().unwrap();
            assert_eq!(log.begins, vec![Point::new(0.0, 0.0)]);
            // The threshold-crossing delta is reported as the first
            // update.
            assert_eq!(log.updates.len(), 1);
            assert_eq!(log.updates[0].0, Vec2::new(10.0, 0.0));
        }

        stage.dispatch(&[actor], &release(device, 20.0, 0.0, 30));
        assert_eq!(log.lock().unwrap().ends.len(), 1);
    }

    #[test]
    fn axis_constraint_ignores_cross_axis_travel() {
        let (mut stage, actor, gesture, _log) = pan_setup(
            PanGesture::new()
                .with_begin_threshold(16.0)
                .with_pan_axis(PanAxis::X),
        );
        let device = pointer();

        stage.dispatch(&[actor.clone()], &press(device, 0.0, 0.0, 0));
        stage.dispatch(&[actor.clone()], &motion(device, 0.0, 40.0, 10));
        assert_eq!(gesture.state(), GestureState::Possible);

        stage.dispatch(&[actor], &motion(device, 20.0, 40.0, 20));
        assert_eq!(gesture.state(), GestureState::Recognizing);
    }

    #[test]
    fn cancellation_reports_no_velocity() {
        let (mut stage, actor, gesture, log) = pan_setup(PanGesture::new().with_begin_threshold(0.0));
        let device = touchscreen();

        stage.dispatch(&[actor.clone()], &touch_begin(device, 0, 0.0, 0.0, 0));
        stage.dispatch(&[actor.clone()], &touch_update(device, 0, 10.0, 0.0, 50));
        stage.dispatch(&[actor], &touch_cancel(device, 0, 10.0, 0.0, 80));

        let log = log.lock().unwrap();
        assert_eq!(log.cancels, 1);
        assert!(log.ends.is_empty());
        assert_eq!(gesture.state(), GestureState::Waiting);
    }

    #[test]
    fn two_point_pan_requires_both_points() {
        let (mut stage, actor, gesture, _log) = pan_setup(
            PanGesture::new()
                .with_begin_threshold(0.0)
                .with_min_n_points(2),
        );
        let device = touchscreen();

        stage.dispatch(&[actor.clone()], &touch_begin(device, 0, 0.0, 0.0, 0));
        assert_eq!(gesture.state(), GestureState::Possible);

        stage.dispatch(&[actor], &touch_begin(device, 1, 10.0, 0.0, 10));
        assert_eq!(gesture.state(), GestureState::Recognizing);
    }

    #[test]
    fn tracking_switches_when_the_primary_point_ends() {
        let (mut stage, actor, gesture, log) = pan_setup(PanGesture::new().with_begin_threshold(0.0));
        let device = touchscreen();

        stage.dispatch(&[actor.clone()], &touch_begin(device, 0, 0.0, 0.0, 0));
        stage.dispatch(&[actor.clone()], &touch_begin(device, 1, 50.0, 0.0, 10));

        // The newest point is the tracked one; end it.
        stage.dispatch(&[actor.clone()], &touch_end(device, 1, 50.0, 0.0, 20));
        assert_eq!(gesture.state(), GestureState::Recognizing);

        stage.dispatch(&[actor.clone()], &touch_update(device, 0, 10.0, 0.0, 30));
        assert!(!log.lock().unwrap().updates.is_empty());

        stage.dispatch(&[actor], &touch_end(device, 0, 10.0, 0.0, 40));
        assert_eq!(log.lock().unwrap().ends.len(), 1);
        assert_eq!(gesture.state(), GestureState::Waiting);
    }

    #[test]
    fn convergent_deltas_do_not_double_count() {
        let points = [
            {
                let mut p = GesturePoint::new(
                    0,
                    &crate::event::InputEvent::new(
                        crate::event::EventKind::TouchBegin,
                        touchscreen(),
                        (0.0, 0.0),
                        0,
                    ),
                );
                p.update(&crate::event::InputEvent::new(
                    crate::event::EventKind::TouchUpdate,
                    touchscreen(),
                    (10.0, 0.0),
                    10,
                ));
                p
            },
            {
                let mut p = GesturePoint::new(
                    1,
                    &crate::event::InputEvent::new(
                        crate::event::EventKind::TouchBegin,
                        touchscreen(),
                        (100.0, 0.0),
                        0,
                    ),
                );
                p.update(&crate::event::InputEvent::new(
                    crate::event::EventKind::TouchUpdate,
                    touchscreen(),
                    (92.0, 0.0),
                    10,
                ));
                p
            },
        ];

        // One finger moves +10, the other -8: the reduced delta keeps
        // both extremes.
        let delta = PanGesture::<TestStage>::delta_from_points(&points);
        assert_eq!(delta, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn invalid_point_ranges_are_rejected() {
        let mut pan: PanGesture<TestStage> = PanGesture::new();
        pan.set_max_n_points(2).unwrap();
        assert!(pan.set_min_n_points(3).is_err());
        assert_eq!(pan.min_n_points(), 1);
        assert!(pan.set_min_n_points(0).is_err());
        pan.set_min_n_points(2).unwrap();
        assert!(pan.set_max_n_points(1).is_err());
        assert_eq!(pan.max_n_points(), 2);
    }
}
