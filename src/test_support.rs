//! Shared harness for the in-crate tests
//!
//! `TestStage` is a minimal compositor state: a manual timer queue, plus
//! recorders for sequence claims, crossing emissions and grab fan-out.
//! `TestActor` is an `Arc`-node tree with identity equality.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::event::{DeviceId, DeviceType, EventKind, InputEvent, Sequence};
use crate::gesture::{
    GestureInnerHandle, GesturePoint, GestureRecognizer, GestureState, GesturesState,
};
use crate::settings::Settings;
use crate::stage::{ActorTarget, CrossingEvent, StageHandler};
use crate::timer::{TimerCallback, TimerToken};

pub(crate) struct TestActor(Arc<ActorNode>);

struct ActorNode {
    name: &'static str,
    parent: Option<TestActor>,
}

impl TestActor {
    pub(crate) fn root(name: &'static str) -> TestActor {
        TestActor(Arc::new(ActorNode { name, parent: None }))
    }

    pub(crate) fn child_of(name: &'static str, parent: &TestActor) -> TestActor {
        TestActor(Arc::new(ActorNode {
            name,
            parent: Some(parent.clone()),
        }))
    }
}

impl Clone for TestActor {
    fn clone(&self) -> Self {
        TestActor(self.0.clone())
    }
}

impl PartialEq for TestActor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TestActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestActor({})", self.0.name)
    }
}

impl ActorTarget for TestActor {
    fn parent(&self) -> Option<TestActor> {
        self.0.parent.clone()
    }
}

pub(crate) struct ScheduledTimer {
    pub(crate) token: TimerToken,
    pub(crate) delay: Duration,
    pub(crate) callback: Option<TimerCallback<TestStage>>,
}

pub(crate) struct TestStage {
    pub(crate) gestures: GesturesState<TestStage>,
    pub(crate) settings: Settings,
    pub(crate) timers: Vec<ScheduledTimer>,
    pub(crate) claimed: Vec<(DeviceId, Option<Sequence>)>,
    pub(crate) crossings: Vec<CrossingEvent<TestActor>>,
    pub(crate) emitted: Vec<(TestActor, EventKind)>,
}

impl TestStage {
    pub(crate) fn new() -> TestStage {
        TestStage {
            gestures: GesturesState::new(),
            settings: Settings::default(),
            timers: Vec::new(),
            claimed: Vec::new(),
            crossings: Vec::new(),
            emitted: Vec::new(),
        }
    }

    /// Run the callback of the oldest pending timer
    pub(crate) fn fire_next_timer(&mut self) -> bool {
        let idx = match self.timers.iter().position(|t| t.callback.is_some()) {
            Some(idx) => idx,
            None => return false,
        };
        let mut timer = self.timers.remove(idx);
        let callback = timer.callback.take().unwrap();
        callback(self);
        true
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.iter().filter(|t| t.callback.is_some()).count()
    }

    pub(crate) fn dispatch(&mut self, actors: &[TestActor], event: &InputEvent) {
        let gestures = self.gestures.clone();
        gestures.handle_event(self, actors, event);
    }

    pub(crate) fn dispatch_crossing(
        &mut self,
        event: &InputEvent,
        source: &TestActor,
        related: Option<&TestActor>,
    ) {
        let gestures = self.gestures.clone();
        gestures.handle_crossing(self, event, source, related);
    }
}

impl StageHandler for TestStage {
    type Actor = TestActor;

    fn settings(&self) -> Settings {
        self.settings
    }

    fn schedule_once(&mut self, delay: Duration, callback: TimerCallback<Self>) -> TimerToken {
        let token = TimerToken::new();
        self.timers.push(ScheduledTimer {
            token,
            delay,
            callback: Some(callback),
        });
        token
    }

    fn cancel_timer(&mut self, timer: TimerToken) {
        self.timers.retain(|t| t.token != timer);
    }

    fn sequence_claimed(&mut self, device: DeviceId, sequence: Option<Sequence>) {
        self.claimed.push((device, sequence));
    }

    fn emit_crossing(&mut self, event: &CrossingEvent<TestActor>) {
        self.crossings.push(event.clone());
    }

    fn emit_event(&mut self, actor: &TestActor, event: &InputEvent) {
        self.emitted.push((actor.clone(), event.kind));
    }
}

// -----------------------------------------------------------------
// Event constructors
// -----------------------------------------------------------------

pub(crate) fn pointer() -> DeviceId {
    DeviceId::new(DeviceType::Pointer)
}

pub(crate) fn touchscreen() -> DeviceId {
    DeviceId::new(DeviceType::Touchscreen)
}

pub(crate) fn press(device: DeviceId, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::ButtonPress, device, (x, y), time).with_button(1)
}

pub(crate) fn motion(device: DeviceId, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::Motion, device, (x, y), time)
}

pub(crate) fn release(device: DeviceId, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::ButtonRelease, device, (x, y), time).with_button(1)
}

pub(crate) fn touch_begin(device: DeviceId, slot: u64, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::TouchBegin, device, (x, y), time).with_sequence(Sequence(slot))
}

pub(crate) fn touch_update(device: DeviceId, slot: u64, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::TouchUpdate, device, (x, y), time).with_sequence(Sequence(slot))
}

pub(crate) fn touch_end(device: DeviceId, slot: u64, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::TouchEnd, device, (x, y), time).with_sequence(Sequence(slot))
}

pub(crate) fn touch_cancel(device: DeviceId, slot: u64, x: f64, y: f64, time: u32) -> InputEvent {
    InputEvent::new(EventKind::TouchCancel, device, (x, y), time).with_sequence(Sequence(slot))
}

// -----------------------------------------------------------------
// Recording recognizer
// -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seen {
    Began(usize),
    Moved(usize),
    Ended(usize),
    Cancelled(usize),
    Crossing(EventKind),
    State(GestureState, GestureState),
}

/// A recognizer that records everything it sees and answers the
/// relationship hooks from a fixed configuration
#[derive(Default)]
pub(crate) struct TestRecognizer {
    pub(crate) seen: Arc<Mutex<Vec<Seen>>>,
    pub(crate) influence: Option<bool>,
    pub(crate) influenced_by: Option<bool>,
    pub(crate) start_while: Option<bool>,
    pub(crate) others_may_start: Option<bool>,
}

impl TestRecognizer {
    pub(crate) fn new() -> (TestRecognizer, Arc<Mutex<Vec<Seen>>>) {
        let recognizer = TestRecognizer::default();
        let seen = recognizer.seen.clone();
        (recognizer, seen)
    }
}

impl GestureRecognizer<TestStage> for TestRecognizer {
    fn points_began(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        points: &[GesturePoint],
    ) {
        self.seen.lock().unwrap().push(Seen::Began(points.len()));
    }

    fn points_moved(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        points: &[GesturePoint],
    ) {
        self.seen.lock().unwrap().push(Seen::Moved(points.len()));
    }

    fn points_ended(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        points: &[GesturePoint],
    ) {
        self.seen.lock().unwrap().push(Seen::Ended(points.len()));
    }

    fn points_cancelled(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        points: &[GesturePoint],
    ) {
        self.seen.lock().unwrap().push(Seen::Cancelled(points.len()));
    }

    fn crossing_event(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        _point: &GesturePoint,
        kind: EventKind,
        _time: u32,
        _flags: crate::event::EventFlags,
        _source: &TestActor,
        _related: Option<&TestActor>,
    ) {
        self.seen.lock().unwrap().push(Seen::Crossing(kind));
    }

    fn state_changed(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        old_state: GestureState,
        new_state: GestureState,
    ) {
        self.seen.lock().unwrap().push(Seen::State(old_state, new_state));
    }

    fn should_influence(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        _other: crate::gesture::GestureId,
        cancel_other_on_recognizing: &mut bool,
    ) {
        if let Some(cancel) = self.influence {
            *cancel_other_on_recognizing = cancel;
        }
    }

    fn should_be_influenced_by(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        _other: crate::gesture::GestureId,
        cancelled_on_other_recognizing: &mut bool,
    ) {
        if let Some(cancelled) = self.influenced_by {
            *cancelled_on_other_recognizing = cancelled;
        }
    }

    fn should_start_while(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        _other: crate::gesture::GestureId,
        should_start: &mut bool,
    ) {
        if let Some(start) = self.start_while {
            *should_start = start;
        }
    }

    fn other_gesture_may_start(
        &mut self,
        _data: &mut TestStage,
        _gesture: &mut GestureInnerHandle<'_, TestStage>,
        _other: crate::gesture::GestureId,
        should_start: &mut bool,
    ) {
        if let Some(start) = self.others_may_start {
            *should_start = start;
        }
    }
}
