//! Gesture recognition for touch and pointer input
//!
//! This module turns sequences of low-level input points into named
//! gestures and arbitrates among the recognizers that are simultaneously
//! plausible for the same points.
//!
//! ## How to use it
//!
//! Create a [`GesturesState`] and keep it in your compositor state, then
//! implement the [`StageHandler`](crate::stage::StageHandler) trait to give
//! the core access to settings and timers. Gestures are added with
//! [`GesturesState::add_gesture`] and attached to an actor with
//! [`Gesture::attach`]; the compositor feeds them by calling
//! [`GesturesState::handle_event`] with the hit actor chain of each
//! classified input event.
//!
//! ## Writing a recognizer
//!
//! A recognizer implements [`GestureRecognizer`], reacting to the
//! `points_began`/`points_moved`/`points_ended`/`points_cancelled`
//! callbacks and moving the gesture through the [`GestureState`] state
//! machine with [`GestureInnerHandle::set_state`]. Once the implementation
//! is reasonably sure the event sequence is its gesture, it requests
//! [`GestureState::Recognizing`]; a gesture that got added points must
//! always end up in either [`GestureState::Completed`] or
//! [`GestureState::Cancelled`].
//!
//! Note that it is not guaranteed that `set_state` will always (and
//! immediately) enter the requested state. Never assume the state changed
//! after requesting it; react to state changes in
//! [`GestureRecognizer::state_changed`] instead.
//!
//! ## Relationships of gestures
//!
//! By default, when multiple gestures try to recognize while sharing one
//! or more points, the first gesture to move to RECOGNIZING wins and
//! implicitly moves all conflicting gestures to CANCELLED. This can be
//! prohibited with [`Gesture::can_not_cancel`] or by implementing the
//! [`GestureRecognizer::should_influence`] /
//! [`GestureRecognizer::should_be_influenced_by`] hooks.
//!
//! Gestures on different actors that don't conflict over points are
//! related too: globally only a single gesture is allowed to be in
//! RECOGNIZING at a time. Starting a gesture while another one runs can
//! be allowed with [`Gesture::recognize_independently_from`] or the
//! [`GestureRecognizer::should_start_while`] /
//! [`GestureRecognizer::other_gesture_may_start`] hooks.
//!
//! Inside recognizer callbacks the arena is already locked; use the
//! provided [`GestureInnerHandle`], calling methods on an outer
//! [`Gesture`] handle there would deadlock.

use std::fmt;
use std::sync::{Arc, Mutex};

use downcast_rs::{impl_downcast, Downcast};
use tracing::{info_span, warn};

use crate::event::{DeviceId, DeviceTypes, EventFlags, EventKind, InputEvent, Sequence};
use crate::stage::StageHandler;

mod click;
mod long_press;
mod machine;
mod pan;
mod points;

pub use click::{ClickGesture, ClickInfo};
pub use long_press::LongPressGesture;
pub use machine::GestureId;
pub use pan::{PanAxis, PanGesture};
pub use points::GesturePoint;

use machine::{CurrentFrame, Frame, GesturesInternal, RecognizerSlot};

/// The lifecycle states of a gesture
///
/// A gesture starts out in WAITING and automatically moves to POSSIBLE
/// when its first point is added. The recognizer then drives it to
/// RECOGNIZING (possibly held in RECOGNIZE_PENDING by a failure
/// dependency) and finally to COMPLETED or CANCELLED; once the last point
/// ended, the gesture falls back to WAITING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    /// No points are available
    Waiting,
    /// Points were added and the sequence may still turn out to be the
    /// gesture
    Possible,
    /// The recognizer accepted, but a failure dependency holds the
    /// gesture back until the watched peers have been cancelled
    RecognizePending,
    /// A continuous gesture is being recognized
    Recognizing,
    /// The gesture was successfully recognized and has completed
    Completed,
    /// The gesture was not started or was cancelled
    Cancelled,
}

/// Errors returned when configuring a gesture with invalid parameters
///
/// The offending call is rejected and the previous value kept.
#[derive(Debug, thiserror::Error)]
pub enum GestureError {
    /// An empty device-type mask was passed
    #[error("a gesture must accept at least one device type")]
    NoDeviceTypes,
    /// A pan point range with `min > max` was passed
    #[error("invalid point range: min_n_points {min} exceeds max_n_points {max}")]
    InvalidPointRange {
        /// The requested minimum number of points
        min: u32,
        /// The requested maximum number of points
        max: u32,
    },
}

/// The override surface of a gesture
///
/// All methods default to doing nothing; a recognizer implements the ones
/// it cares about. Methods receive the compositor state and a
/// [`GestureInnerHandle`] for the gesture the recognizer belongs to.
#[allow(unused_variables)]
pub trait GestureRecognizer<D: StageHandler>: Downcast + Send {
    /// One or more points have begun
    fn points_began(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
    }

    /// One or more points have moved
    fn points_moved(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
    }

    /// One or more points have ended
    fn points_ended(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
    }

    /// One or more points have been cancelled
    fn points_cancelled(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        points: &[GesturePoint],
    ) {
    }

    /// A crossing event was received for one of the gesture's points
    #[allow(clippy::too_many_arguments)]
    fn crossing_event(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        point: &GesturePoint,
        kind: EventKind,
        time: u32,
        flags: EventFlags,
        source: &D::Actor,
        related: Option<&D::Actor>,
    ) {
    }

    /// The state of the gesture changed
    ///
    /// Invoked after the new state became observable, once per
    /// transition.
    fn state_changed(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        old_state: GestureState,
        new_state: GestureState,
    ) {
    }

    /// Consulted before the gesture may move to POSSIBLE or RECOGNIZING
    ///
    /// Returning `false` refuses the transition. Handlers connected with
    /// [`Gesture::connect_may_recognize`] are asked first.
    fn may_recognize(&mut self, data: &mut D, gesture: &mut GestureInnerHandle<'_, D>) -> bool {
        true
    }

    /// Decide whether recognizing should cancel `other`, a gesture this
    /// one shares points with
    fn should_influence(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        other: GestureId,
        cancel_other_on_recognizing: &mut bool,
    ) {
    }

    /// Decide whether `other`, a gesture this one shares points with,
    /// should cancel this one when it recognizes
    fn should_be_influenced_by(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        other: GestureId,
        cancelled_on_other_recognizing: &mut bool,
    ) {
    }

    /// Decide whether this gesture may start while the unrelated gesture
    /// `other` is already recognizing
    fn should_start_while(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        other: GestureId,
        should_start: &mut bool,
    ) {
    }

    /// Decide whether the unrelated gesture `other` may start while this
    /// gesture is recognizing
    ///
    /// Takes precedence over the candidate's
    /// [`should_start_while`](GestureRecognizer::should_start_while).
    fn other_gesture_may_start(
        &mut self,
        data: &mut D,
        gesture: &mut GestureInnerHandle<'_, D>,
        other: GestureId,
        should_start: &mut bool,
    ) {
    }
}

impl_downcast!(GestureRecognizer<D> where D: StageHandler);

/// Handle to a gesture from inside a recognizer callback
///
/// The arena is locked for the duration of the callback; this handle
/// works on the already-locked state, so it is the only safe way to
/// inspect and drive the gesture from recognizer code.
pub struct GestureInnerHandle<'a, D: StageHandler> {
    pub(crate) internal: &'a mut GesturesInternal<D>,
    pub(crate) id: GestureId,
}

impl<'a, D: StageHandler> fmt::Debug for GestureInnerHandle<'a, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GestureInnerHandle")
            .field("gesture", &self.id)
            .finish_non_exhaustive()
    }
}

impl<'a, D: StageHandler> GestureInnerHandle<'a, D> {
    /// The identity of the gesture
    pub fn id(&self) -> GestureId {
        self.id
    }

    /// The current state of the gesture
    pub fn state(&self) -> GestureState {
        self.internal
            .entries
            .get(&self.id)
            .map(|e| e.state)
            .unwrap_or(GestureState::Waiting)
    }

    /// The points the gesture is using, in the order they were added
    pub fn points(&self) -> &[GesturePoint] {
        self.internal
            .entries
            .get(&self.id)
            .map(|e| e.public_points.as_slice())
            .unwrap_or(&[])
    }

    /// Number of points the gesture is using
    pub fn n_points(&self) -> usize {
        self.points().len()
    }

    /// The actor the gesture is attached to
    pub fn actor(&self) -> Option<D::Actor> {
        self.internal.entries.get(&self.id).and_then(|e| e.actor.clone())
    }

    /// A cloneable handle to this gesture, for use outside the current
    /// callback (e.g. captured by a timer callback)
    pub fn gesture(&self) -> Gesture<D> {
        Gesture {
            id: self.id,
            inner: self
                .internal
                .self_ref
                .upgrade()
                .expect("gestures state destroyed while a callback is running"),
        }
    }

    /// Request a state transition
    ///
    /// The recognizer passes itself as `recognizer` so the machine can
    /// invoke its hooks for the side effects of the transition while the
    /// callback is still on the stack.
    pub fn set_state(
        &mut self,
        recognizer: &mut dyn GestureRecognizer<D>,
        data: &mut D,
        state: GestureState,
    ) {
        let mut cur: CurrentFrame<'_, D> = Some(Frame {
            id: self.id,
            recognizer,
        });
        machine::request_state(self.internal, data, &mut cur, self.id, state);
    }
}

/// A handle to a gesture
///
/// It can be cloned and all clones refer to the same gesture. Do not call
/// methods on this handle from inside a recognizer callback, that would
/// deadlock; use the provided [`GestureInnerHandle`] there instead.
pub struct Gesture<D: StageHandler> {
    pub(crate) id: GestureId,
    pub(crate) inner: Arc<Mutex<GesturesInternal<D>>>,
}

impl<D: StageHandler> Clone for Gesture<D> {
    #[inline]
    fn clone(&self) -> Self {
        Gesture {
            id: self.id,
            inner: self.inner.clone(),
        }
    }
}

impl<D: StageHandler> fmt::Debug for Gesture<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gesture").field("id", &self.id).finish()
    }
}

impl<D: StageHandler> PartialEq for Gesture<D> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<D: StageHandler> Eq for Gesture<D> {}

impl<D: StageHandler> std::hash::Hash for Gesture<D> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<D: StageHandler> Gesture<D> {
    /// The identity of the gesture
    pub fn id(&self) -> GestureId {
        self.id
    }

    /// The debug name of the gesture, if one was set
    pub fn name(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&self.id).and_then(|e| e.name.clone())
    }

    /// Set a debug name for the gesture, used in diagnostics
    pub fn set_name(&self, name: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.name = Some(name.into());
        }
    }

    /// The current state of the gesture
    pub fn state(&self) -> GestureState {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&self.id)
            .map(|e| e.state)
            .unwrap_or(GestureState::Waiting)
    }

    /// Request a state transition
    ///
    /// Illegal requests are logged and dropped, except that redundant
    /// requests to CANCELLED are always silently accepted.
    pub fn set_state(&self, data: &mut D, state: GestureState) {
        let mut inner = self.inner.lock().unwrap();
        let mut cur: CurrentFrame<'_, D> = None;
        machine::request_state(&mut inner, data, &mut cur, self.id, state);
    }

    /// The points the gesture is using, in the order they were added
    pub fn points(&self) -> Vec<GesturePoint> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&self.id)
            .map(|e| e.public_points.clone())
            .unwrap_or_default()
    }

    /// Attach the gesture to an actor
    ///
    /// A gesture is attached to exactly one actor at a time; attaching
    /// while points are live cancels them first.
    pub fn attach(&self, data: &mut D, actor: D::Actor) {
        let mut inner = self.inner.lock().unwrap();
        machine::set_actor(&mut inner, data, self.id, Some(actor));
    }

    /// Detach the gesture from its actor, cancelling live points
    pub fn detach(&self, data: &mut D) {
        let mut inner = self.inner.lock().unwrap();
        machine::set_actor(&mut inner, data, self.id, None);
    }

    /// The actor the gesture is attached to
    pub fn actor(&self) -> Option<D::Actor> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(&self.id).and_then(|e| e.actor.clone())
    }

    /// Restrict the device types that may add points to the gesture
    pub fn set_allowed_device_types(&self, types: DeviceTypes) -> Result<(), GestureError> {
        if types.is_empty() {
            warn!(gesture = ?self.id, "rejecting empty device-type mask");
            return Err(GestureError::NoDeviceTypes);
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.allowed_device_types = types;
        }
        Ok(())
    }

    /// The device types that may add points to the gesture
    pub fn allowed_device_types(&self) -> DeviceTypes {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .get(&self.id)
            .map(|e| e.allowed_device_types)
            .unwrap_or(DeviceTypes::GESTURE_DEFAULT)
    }

    /// Make sure this gesture does not cancel `other` when it moves to
    /// RECOGNIZING
    ///
    /// To let two gestures recognize simultaneously on the same points,
    /// call this twice with the roles swapped.
    pub fn can_not_cancel(&self, other: &Gesture<D>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.can_not_cancel.insert(other.id);
        }
    }

    /// Allow this gesture to start while `other` is already recognizing
    /// on a different set of points
    pub fn recognize_independently_from(&self, other: &Gesture<D>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.recognize_independently_from.insert(other.id);
        }
    }

    /// Hold this gesture in RECOGNIZE_PENDING until `other` has been
    /// cancelled
    ///
    /// Should `other` recognize instead, this gesture is cancelled.
    pub fn require_failure_of(&self, other: &Gesture<D>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.require_failure_of.insert(other.id);
        }
    }

    /// Invalidate every pairing decision negotiated for this gesture, so
    /// the next shared point renegotiates from scratch
    pub fn relationships_changed(&self) {
        let mut inner = self.inner.lock().unwrap();
        machine::relationships_changed(&mut inner, self.id);
    }

    /// Connect a veto handler consulted before the gesture may move to
    /// POSSIBLE or RECOGNIZING; any handler returning `false` refuses
    /// the transition
    pub fn connect_may_recognize(&self, handler: impl FnMut(&mut D) -> bool + Send + 'static) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.may_recognize.push(Box::new(handler));
        }
    }

    /// Cancel the gesture's points on `device` matching `sequences` (all
    /// of the device's points if `sequences` is empty)
    ///
    /// One `points_cancelled` batch is emitted for the affected points
    /// before they are unregistered.
    pub fn cancel_sequences(&self, data: &mut D, device: DeviceId, sequences: &[Sequence]) {
        let mut inner = self.inner.lock().unwrap();
        machine::cancel_sequences(&mut inner, data, self.id, device, sequences);
    }

    /// Cancel all of the gesture's points at once
    pub fn cancel_all_points(&self, data: &mut D) {
        let mut inner = self.inner.lock().unwrap();
        machine::cancel_all_points(&mut inner, data, self.id);
    }

    /// Run `f` against the concrete recognizer of this gesture
    ///
    /// Returns `None` if the recognizer is of a different type.
    pub fn with_recognizer<R: GestureRecognizer<D>, T>(&self, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        let slot = match inner.entries.get_mut(&self.id) {
            Some(entry) => std::mem::replace(&mut entry.recognizer, RecognizerSlot::Borrowed),
            None => return None,
        };
        let mut boxed = match slot {
            RecognizerSlot::Present(boxed) => boxed,
            RecognizerSlot::Borrowed => return None,
        };
        let result = boxed.downcast_mut::<R>().map(f);
        if let Some(entry) = inner.entries.get_mut(&self.id) {
            entry.recognizer = RecognizerSlot::Present(boxed);
        }
        result
    }
}

/// The process-wide gesture registry and event dispatcher
///
/// It can be cloned and all clones manipulate the same internal state.
/// Keep one in your compositor state and feed it the classified input
/// events together with the hit actor chain.
pub struct GesturesState<D: StageHandler> {
    inner: Arc<Mutex<GesturesInternal<D>>>,
    span: tracing::Span,
}

impl<D: StageHandler> fmt::Debug for GesturesState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GesturesState")
            .field("inner", &*self.inner.lock().unwrap())
            .finish_non_exhaustive()
    }
}

impl<D: StageHandler> Clone for GesturesState<D> {
    #[inline]
    fn clone(&self) -> Self {
        GesturesState {
            inner: self.inner.clone(),
            span: self.span.clone(),
        }
    }
}

impl<D: StageHandler> Default for GesturesState<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: StageHandler> GesturesState<D> {
    /// Create a new gesture registry
    pub fn new() -> GesturesState<D> {
        let inner = Arc::new_cyclic(|weak| Mutex::new(GesturesInternal::new(weak.clone())));
        GesturesState {
            inner,
            span: info_span!("gestures"),
        }
    }

    /// Register a new gesture driven by `recognizer`
    ///
    /// The gesture starts out detached; attach it to an actor with
    /// [`Gesture::attach`].
    pub fn add_gesture<R: GestureRecognizer<D> + 'static>(&self, recognizer: R) -> Gesture<D> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.add(Box::new(recognizer));
        Gesture {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Destroy a gesture
    ///
    /// Live points are cancelled, relationships torn down and the gesture
    /// dropped from every peer's override tables.
    pub fn remove_gesture(&self, data: &mut D, gesture: &Gesture<D>) {
        let _guard = self.span.enter();
        let mut inner = self.inner.lock().unwrap();
        machine::remove_gesture(&mut inner, data, gesture.id);
    }

    /// Feed a classified input event to the gestures attached to the
    /// actors of the hit chain
    ///
    /// Synthetic events and event kinds irrelevant to gesture
    /// recognition pass through without effect.
    pub fn handle_event(&self, data: &mut D, actors: &[D::Actor], event: &InputEvent) {
        let _guard = self.span.enter();
        let mut inner = self.inner.lock().unwrap();
        machine::dispatch(&mut inner, data, actors, event);
    }

    /// Forward an ENTER/LEAVE event to the gestures following its
    /// sequence
    pub fn handle_crossing(
        &self,
        data: &mut D,
        event: &InputEvent,
        source: &D::Actor,
        related: Option<&D::Actor>,
    ) {
        let _guard = self.span.enter();
        let mut inner = self.inner.lock().unwrap();
        machine::dispatch_crossing(&mut inner, data, event, source, related);
    }
}
