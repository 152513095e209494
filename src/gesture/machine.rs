//! Arena, state machine and arbitration internals
//!
//! All gestures of a compositor live in one [`GesturesInternal`] arena
//! behind a single mutex. Relationship tables hold [`GestureId`]s rather
//! than owning references; since ids are never reused, a destroyed gesture
//! simply stops matching and the cross-episode override tables need no
//! extra bookkeeping.
//!
//! While a recognizer callback runs, its box is taken out of the entry
//! ([`RecognizerSlot::Borrowed`]) so the arena stays uniquely borrowed. A
//! recognizer that requests a transition from inside one of its own
//! callbacks passes itself back down as `&mut dyn GestureRecognizer`, which
//! becomes the [`Frame`] the machine uses to reach the busy recognizer.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::event::{DeviceId, DeviceTypes, EventFlags, EventKind, InputEvent, Sequence};
use crate::stage::StageHandler;

use super::points::{GesturePoint, PointData};
use super::{GestureInnerHandle, GestureRecognizer, GestureState};

crate::utils::ids::id_gen!(next_gesture_id, GESTURE_ID);

/// Identity of a gesture within the process-wide registry
///
/// Ids are stable for the lifetime of the gesture and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GestureId(usize);

impl GestureId {
    pub(crate) fn new() -> GestureId {
        GestureId(next_gesture_id())
    }
}

pub(crate) enum RecognizerSlot<D: StageHandler> {
    Present(Box<dyn GestureRecognizer<D>>),
    Borrowed,
}

impl<D: StageHandler> std::fmt::Debug for RecognizerSlot<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognizerSlot::Present(_) => f.write_str("RecognizerSlot::Present"),
            RecognizerSlot::Borrowed => f.write_str("RecognizerSlot::Borrowed"),
        }
    }
}

/// The currently executing recognizer, threaded through the machine so
/// transitions requested from inside a callback can still reach it
pub(crate) struct Frame<'a, D: StageHandler> {
    pub(crate) id: GestureId,
    pub(crate) recognizer: &'a mut dyn GestureRecognizer<D>,
}

pub(crate) type CurrentFrame<'a, D> = Option<Frame<'a, D>>;

pub(crate) struct GestureEntry<D: StageHandler> {
    pub(crate) name: Option<String>,
    pub(crate) actor: Option<D::Actor>,
    pub(crate) recognizer: RecognizerSlot<D>,

    pub(crate) state: GestureState,
    pub(crate) points: Vec<PointData>,
    pub(crate) public_points: Vec<GesturePoint>,
    pub(crate) point_indices: u32,

    pub(crate) allowed_device_types: DeviceTypes,

    pub(crate) in_relationship_with: IndexSet<GestureId>,
    pub(crate) cancel_on_recognizing: Vec<GestureId>,

    // Overrides surviving across episodes; stale ids never match again.
    pub(crate) can_not_cancel: IndexSet<GestureId>,
    pub(crate) recognize_independently_from: IndexSet<GestureId>,
    pub(crate) require_failure_of: IndexSet<GestureId>,
    pub(crate) pending_target: Option<GestureState>,

    pub(crate) may_recognize: Vec<Box<dyn FnMut(&mut D) -> bool + Send>>,
}

impl<D: StageHandler> GestureEntry<D> {
    fn new(recognizer: Box<dyn GestureRecognizer<D>>) -> GestureEntry<D> {
        GestureEntry {
            name: None,
            actor: None,
            recognizer: RecognizerSlot::Present(recognizer),
            state: GestureState::Waiting,
            points: Vec::new(),
            public_points: Vec::new(),
            point_indices: 0,
            allowed_device_types: DeviceTypes::GESTURE_DEFAULT,
            in_relationship_with: IndexSet::new(),
            cancel_on_recognizing: Vec::new(),
            can_not_cancel: IndexSet::new(),
            recognize_independently_from: IndexSet::new(),
            require_failure_of: IndexSet::new(),
            pending_target: None,
            may_recognize: Vec::new(),
        }
    }

    fn find_point(&self, device: DeviceId, sequence: Option<Sequence>) -> Option<usize> {
        self.points.iter().position(|p| p.matches(device, sequence))
    }

    fn holds_point(&self, device: DeviceId, sequence: Option<Sequence>) -> bool {
        self.find_point(device, sequence).is_some()
    }
}

pub(crate) struct GesturesInternal<D: StageHandler> {
    pub(crate) self_ref: Weak<Mutex<GesturesInternal<D>>>,
    pub(crate) entries: IndexMap<GestureId, GestureEntry<D>>,
    /// Every gesture whose state is not WAITING
    pub(crate) active: Vec<GestureId>,
    /// Per-sequence delivery order, cancelling gestures first
    pub(crate) sequence_order: HashMap<(DeviceId, Option<Sequence>), Vec<GestureId>>,
}

impl<D: StageHandler> std::fmt::Debug for GesturesInternal<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GesturesInternal")
            .field("gestures", &self.entries.len())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl<D: StageHandler> GesturesInternal<D> {
    pub(crate) fn new(self_ref: Weak<Mutex<GesturesInternal<D>>>) -> GesturesInternal<D> {
        GesturesInternal {
            self_ref,
            entries: IndexMap::new(),
            active: Vec::new(),
            sequence_order: HashMap::new(),
        }
    }

    pub(crate) fn add(&mut self, recognizer: Box<dyn GestureRecognizer<D>>) -> GestureId {
        let id = GestureId::new();
        self.entries.insert(id, GestureEntry::new(recognizer));
        id
    }

    pub(crate) fn label(&self, id: GestureId) -> String {
        match self.entries.get(&id).and_then(|e| e.name.as_deref()) {
            Some(name) => format!("<{}> [{:?}]", name, id),
            None => format!("[{:?}]", id),
        }
    }
}

fn transition_allowed(from: GestureState, to: GestureState) -> bool {
    use GestureState::*;
    matches!(
        (from, to),
        (Waiting, Possible)
            | (Possible, Recognizing | RecognizePending | Cancelled)
            | (RecognizePending, Recognizing | Cancelled)
            | (Recognizing, Recognizing | Completed | Cancelled)
            | (Completed, Waiting)
            | (Cancelled, Waiting)
    )
}

/// Run `f` against the recognizer of `id`, taking its box out of the
/// entry for the duration of the call
///
/// If `id` is the gesture whose callback is currently executing, the
/// recognizer reference threaded through `cur` is used instead.
pub(crate) fn with_recognizer<D: StageHandler, R>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
    f: impl FnOnce(&mut dyn GestureRecognizer<D>, &mut D, &mut GestureInnerHandle<'_, D>) -> R,
) -> Option<R> {
    if let Some(frame) = cur.as_mut() {
        if frame.id == id {
            let mut handle = GestureInnerHandle {
                internal: &mut *internal,
                id,
            };
            return Some(f(&mut *frame.recognizer, data, &mut handle));
        }
    }

    let slot = match internal.entries.get_mut(&id) {
        Some(entry) => std::mem::replace(&mut entry.recognizer, RecognizerSlot::Borrowed),
        None => return None,
    };
    let mut recognizer = match slot {
        RecognizerSlot::Present(recognizer) => recognizer,
        RecognizerSlot::Borrowed => {
            trace!(gesture = %internal.label(id), "recognizer busy, hook skipped");
            return None;
        }
    };

    let result = {
        let mut handle = GestureInnerHandle {
            internal: &mut *internal,
            id,
        };
        f(&mut *recognizer, data, &mut handle)
    };

    if let Some(entry) = internal.entries.get_mut(&id) {
        entry.recognizer = RecognizerSlot::Present(recognizer);
    }
    Some(result)
}

/// Whether `candidate` may start while `existing` is in RECOGNIZING
fn other_gesture_allowed_to_start<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    existing: GestureId,
    candidate: GestureId,
) -> bool {
    let Some(candidate_entry) = internal.entries.get(&candidate) else {
        return false;
    };
    if candidate_entry.recognize_independently_from.contains(&existing) {
        return true;
    }

    // Default: only a single gesture can be recognizing globally at a time
    let mut should_start = false;

    with_recognizer(internal, data, cur, candidate, |r, data, handle| {
        r.should_start_while(data, handle, existing, &mut should_start)
    });
    with_recognizer(internal, data, cur, existing, |r, data, handle| {
        r.other_gesture_may_start(data, handle, candidate, &mut should_start)
    });

    should_start
}

fn new_gesture_allowed_to_start<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
) -> bool {
    let active: SmallVec<[GestureId; 8]> = internal.active.iter().copied().collect();

    for existing in active {
        if existing == id {
            continue;
        }
        let Some(existing_entry) = internal.entries.get(&existing) else {
            continue;
        };
        // For gestures in relationship we have different APIs
        if existing_entry.in_relationship_with.contains(&id) {
            continue;
        }

        if existing_entry.state == GestureState::Recognizing
            && !other_gesture_allowed_to_start(internal, data, cur, existing, id)
        {
            return false;
        }
    }

    true
}

fn gesture_may_start<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
) -> bool {
    if !new_gesture_allowed_to_start(internal, data, cur, id) {
        debug!(
            gesture = %internal.label(id),
            "gesture may not recognize, another gesture is already running"
        );
        return false;
    }

    // may-recognize veto, any handler returning false refuses the transition
    let mut handlers = match internal.entries.get_mut(&id) {
        Some(entry) => std::mem::take(&mut entry.may_recognize),
        None => return false,
    };
    let mut allowed = true;
    for handler in handlers.iter_mut() {
        if !handler(data) {
            allowed = false;
            break;
        }
    }
    if let Some(entry) = internal.entries.get_mut(&id) {
        let connected_meanwhile = std::mem::replace(&mut entry.may_recognize, handlers);
        entry.may_recognize.extend(connected_meanwhile);
    }

    // The recognizer itself has the last word.
    if allowed {
        allowed = with_recognizer(internal, data, cur, id, |r, data, handle| {
            r.may_recognize(data, handle)
        })
        .unwrap_or(true);
    }

    if !allowed {
        debug!(
            gesture = %internal.label(id),
            "may-recognize prevented gesture from recognizing"
        );
    }
    allowed
}

/// Cancel unrelated POSSIBLE gestures that are no longer allowed to start
/// now that `id` recognizes
fn maybe_cancel_independent_gestures<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
) {
    let active: SmallVec<[GestureId; 8]> = internal.active.iter().copied().collect();

    for other in active.into_iter().rev() {
        if other == id {
            continue;
        }
        let Some(entry) = internal.entries.get(&id) else {
            break;
        };
        // For gestures in relationship we have different APIs
        if entry.in_relationship_with.contains(&other) {
            continue;
        }
        let Some(other_entry) = internal.entries.get(&other) else {
            continue;
        };

        if other_entry.state == GestureState::Possible
            && !other_gesture_allowed_to_start(internal, data, cur, id, other)
        {
            set_state_authoritative(internal, data, cur, other, GestureState::Cancelled);
        }
    }
}

/// A watched peer of `id` that has not failed yet, if any
fn unresolved_failure_peer<D: StageHandler>(
    internal: &GesturesInternal<D>,
    id: GestureId,
) -> Option<GestureId> {
    let entry = internal.entries.get(&id)?;
    for &peer in &entry.require_failure_of {
        let Some(peer_entry) = internal.entries.get(&peer) else {
            continue;
        };
        match peer_entry.state {
            GestureState::Possible | GestureState::Recognizing => return Some(peer),
            GestureState::RecognizePending => {
                if peer_entry.require_failure_of.contains(&id) {
                    // Mutual wait, broken in favor of the peer that got
                    // into RECOGNIZE_PENDING first
                    debug!(
                        gesture = %internal.label(id),
                        peer = %internal.label(peer),
                        "mutual failure dependency, treating pending peer as failed"
                    );
                    continue;
                }
                return Some(peer);
            }
            _ => {}
        }
    }
    None
}

/// Promote or keep waiting the RECOGNIZE_PENDING watchers of `failed`
fn notify_watchers_of_failure<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    failed: GestureId,
) {
    let watchers: SmallVec<[GestureId; 4]> = internal
        .entries
        .iter()
        .filter(|(_, e)| {
            e.state == GestureState::RecognizePending && e.require_failure_of.contains(&failed)
        })
        .map(|(id, _)| *id)
        .collect();

    for watcher in watchers {
        let still_pending = internal
            .entries
            .get(&watcher)
            .map(|e| e.state == GestureState::RecognizePending)
            .unwrap_or(false);
        if !still_pending || unresolved_failure_peer(internal, watcher).is_some() {
            continue;
        }

        let target = internal
            .entries
            .get_mut(&watcher)
            .and_then(|e| e.pending_target.take())
            .unwrap_or(GestureState::Recognizing);

        apply_state(internal, data, cur, watcher, GestureState::Recognizing);
        if target == GestureState::Completed {
            let recognizing = internal
                .entries
                .get(&watcher)
                .map(|e| e.state == GestureState::Recognizing)
                .unwrap_or(false);
            if recognizing {
                apply_state(internal, data, cur, watcher, GestureState::Completed);
            }
        }
        maybe_influence_other_gestures(internal, data, cur, watcher);
        maybe_move_to_waiting(internal, data, cur, watcher);
    }
}

/// Cancel the RECOGNIZE_PENDING watchers of `recognized`
fn cancel_watchers<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    recognized: GestureId,
) {
    let watchers: SmallVec<[GestureId; 4]> = internal
        .entries
        .iter()
        .filter(|(_, e)| {
            e.state == GestureState::RecognizePending && e.require_failure_of.contains(&recognized)
        })
        .map(|(id, _)| *id)
        .collect();

    for watcher in watchers {
        apply_state(internal, data, cur, watcher, GestureState::Cancelled);
        maybe_move_to_waiting(internal, data, cur, watcher);
    }
}

fn maybe_move_to_waiting<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
) {
    let Some(entry) = internal.entries.get(&id) else {
        return;
    };
    if entry.points.is_empty()
        && matches!(entry.state, GestureState::Completed | GestureState::Cancelled)
    {
        apply_state(internal, data, cur, id, GestureState::Waiting);
    }
}

fn maybe_influence_other_gestures<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
) {
    let Some(entry) = internal.entries.get_mut(&id) else {
        return;
    };
    if !matches!(entry.state, GestureState::Recognizing | GestureState::Completed) {
        return;
    }

    // Clear the cancel-on-recognizing list before iterating so that other
    // gestures cancelling us won't clear it right underneath our feet.
    let snapshot: SmallVec<[GestureId; 4]> =
        std::mem::take(&mut entry.cancel_on_recognizing).into_iter().collect();

    for other in snapshot {
        let related = internal
            .entries
            .get(&id)
            .map(|e| e.in_relationship_with.contains(&other))
            .unwrap_or(false);
        if !related {
            continue;
        }

        apply_state(internal, data, cur, other, GestureState::Cancelled);
        maybe_move_to_waiting(internal, data, cur, other);
    }
}

/// The transition core, one legal edge at a time
fn apply_state<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
    new_state: GestureState,
) {
    let Some(entry) = internal.entries.get(&id) else {
        return;
    };
    let state = entry.state;

    if state == new_state && new_state != GestureState::Recognizing {
        trace!(
            gesture = %internal.label(id),
            "skipping state change {:?} -> {:?}", state, new_state
        );
        return;
    }

    debug_assert!(
        transition_allowed(state, new_state),
        "illegal machine transition {:?} -> {:?}",
        state,
        new_state
    );

    if state == GestureState::Waiting && new_state == GestureState::Possible {
        if !gesture_may_start(internal, data, cur, id) {
            // No hooks have fired yet, so pretend nothing happened and
            // remain in WAITING.
            return;
        }
        internal.active.push(id);
    }

    if new_state == GestureState::Recognizing
        && matches!(state, GestureState::Possible | GestureState::RecognizePending)
    {
        if !gesture_may_start(internal, data, cur, id) {
            apply_state(internal, data, cur, id, GestureState::Cancelled);
            return;
        }

        if state == GestureState::Possible && unresolved_failure_peer(internal, id).is_some() {
            apply_state(internal, data, cur, id, GestureState::RecognizePending);
            return;
        }
    }

    let Some(entry) = internal.entries.get_mut(&id) else {
        return;
    };
    let old_state = entry.state;
    entry.state = new_state;

    match new_state {
        GestureState::RecognizePending => {
            entry.pending_target.get_or_insert(GestureState::Recognizing);
        }
        GestureState::Recognizing => {
            debug_assert_eq!(entry.points.len(), entry.public_points.len());

            let claims: SmallVec<[(DeviceId, Option<Sequence>); 3]> =
                entry.points.iter().map(|p| (p.device, p.sequence)).collect();
            for (device, sequence) in claims {
                data.sequence_claimed(device, sequence);
            }

            maybe_cancel_independent_gestures(internal, data, cur, id);
        }
        GestureState::Cancelled | GestureState::Completed => {
            entry.public_points.clear();
            entry.point_indices = 0;
            entry.pending_target = None;
        }
        GestureState::Waiting => {
            internal.active.retain(|g| *g != id);
            entry.points.clear();
            entry.cancel_on_recognizing.clear();

            let peers: SmallVec<[GestureId; 4]> = entry.in_relationship_with.drain(..).collect();
            for peer in peers {
                if let Some(peer_entry) = internal.entries.get_mut(&peer) {
                    peer_entry.in_relationship_with.shift_remove(&id);
                }
            }

            for order in internal.sequence_order.values_mut() {
                order.retain(|g| *g != id);
            }
            internal.sequence_order.retain(|_, order| !order.is_empty());
        }
        GestureState::Possible => {}
    }

    // A RECOGNIZING self-transition re-runs the claim pass above but is
    // not a state change.
    if old_state != new_state {
        with_recognizer(internal, data, cur, id, |r, data, handle| {
            r.state_changed(data, handle, old_state, new_state)
        });

        debug!(
            gesture = %internal.label(id),
            "state changed: {:?} -> {:?}", old_state, new_state
        );

        match new_state {
            GestureState::Cancelled => notify_watchers_of_failure(internal, data, cur, id),
            GestureState::Recognizing | GestureState::Completed => {
                cancel_watchers(internal, data, cur, id)
            }
            _ => {}
        }
    }
}

/// A transition request with its side effects: the COMPLETED rewrite
/// through RECOGNIZING, the cancellation cascade and the fall back to
/// WAITING once the registry drained
pub(crate) fn set_state_authoritative<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
    new_state: GestureState,
) {
    let Some(entry) = internal.entries.get(&id) else {
        return;
    };

    // Moving to COMPLETED always goes through RECOGNIZING
    if entry.state != GestureState::Recognizing && new_state == GestureState::Completed {
        apply_state(internal, data, cur, id, GestureState::Recognizing);

        match internal.entries.get(&id).map(|e| e.state) {
            Some(GestureState::Recognizing) => {
                apply_state(internal, data, cur, id, GestureState::Completed);
            }
            Some(GestureState::RecognizePending) => {
                // Completion is owed once the watched peers have failed.
                if let Some(entry) = internal.entries.get_mut(&id) {
                    entry.pending_target = Some(GestureState::Completed);
                }
            }
            other => debug_assert!(matches!(other, Some(GestureState::Cancelled) | None)),
        }

        maybe_influence_other_gestures(internal, data, cur, id);
        maybe_move_to_waiting(internal, data, cur, id);
        return;
    }

    apply_state(internal, data, cur, id, new_state);
    if internal
        .entries
        .get(&id)
        .map(|e| matches!(e.state, GestureState::Recognizing | GestureState::Cancelled))
        .unwrap_or(false)
    {
        maybe_influence_other_gestures(internal, data, cur, id);
    }
    maybe_move_to_waiting(internal, data, cur, id);
}

/// Entry point for `set_state` requests from recognizers and users
pub(crate) fn request_state<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
    state: GestureState,
) {
    let Some(entry) = internal.entries.get(&id) else {
        return;
    };
    let current = entry.state;

    debug!(
        gesture = %internal.label(id),
        "state change requested: {:?} -> {:?}", current, state
    );

    use GestureState::*;
    let legal = matches!(
        (current, state),
        (Waiting, Possible)
            | (Possible, Recognizing | Completed | Cancelled)
            | (RecognizePending, Completed | Cancelled)
            | (Recognizing, Recognizing | Completed | Cancelled)
            | (Completed, Waiting)
            | (Cancelled, Waiting)
    );

    if legal {
        if current == RecognizePending && state == Completed {
            if let Some(entry) = internal.entries.get_mut(&id) {
                entry.pending_target = Some(Completed);
            }
            return;
        }
        set_state_authoritative(internal, data, cur, id, state);
    } else {
        // For sake of simplicity, never complain about unnecessary tries
        // to cancel
        if state == Cancelled {
            return;
        }
        warn!(
            gesture = %internal.label(id),
            "requested invalid state change: {:?} -> {:?}", current, state
        );
    }
}

// ---------------------------------------------------------------------
// Point registration and event dispatch
// ---------------------------------------------------------------------

fn register_point<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    id: GestureId,
    event: &InputEvent,
) {
    let Some(entry) = internal.entries.get_mut(&id) else {
        return;
    };
    entry.points.push(PointData::new(event));
    debug!(
        gesture = %internal.label(id),
        "registered new point, n points now: {}",
        internal.entries.get(&id).map(|e| e.points.len()).unwrap_or(0)
    );
}

fn unregister_point<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    cur: &mut CurrentFrame<'_, D>,
    id: GestureId,
    device: DeviceId,
    sequence: Option<Sequence>,
) {
    if let Some(entry) = internal.entries.get_mut(&id) {
        if let Some(idx) = entry.find_point(device, sequence) {
            entry.points.remove(idx);
            if idx < entry.public_points.len() {
                entry.public_points.remove(idx);
            }
        }
    }

    let key = (device, sequence);
    if let Some(order) = internal.sequence_order.get_mut(&key) {
        order.retain(|g| *g != id);
        if order.is_empty() {
            internal.sequence_order.remove(&key);
        }
    }

    match internal.entries.get(&id).map(|e| (e.points.is_empty(), e.state)) {
        Some((true, GestureState::Completed | GestureState::Cancelled)) => {
            set_state_authoritative(internal, data, cur, id, GestureState::Waiting);
        }
        Some((
            true,
            GestureState::Possible | GestureState::RecognizePending | GestureState::Recognizing,
        )) => {
            // The recognizer did not settle the episode before its last
            // point went away; collapse to CANCELLED, which drains to
            // WAITING right away.
            debug!(
                gesture = %internal.label(id),
                "last point removed without a terminal state, cancelling"
            );
            set_state_authoritative(internal, data, cur, id, GestureState::Cancelled);
        }
        _ => {}
    }
}

/// Whether the gesture accepts the sequence this event begins; registers
/// the point on acceptance
fn should_handle_sequence<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    id: GestureId,
    event: &InputEvent,
) -> bool {
    let Some(entry) = internal.entries.get(&id) else {
        return false;
    };

    if entry.state == GestureState::Cancelled {
        return false;
    }

    if !entry.points.is_empty() {
        // Only allow new points coming from the same input device
        if entry.points[0].source_device != event.source_device {
            return false;
        }
    } else {
        if !entry
            .allowed_device_types
            .contains(event.source_device.device_type().into())
        {
            return false;
        }

        if entry.state == GestureState::Waiting {
            let mut cur: CurrentFrame<'_, D> = None;
            set_state_authoritative(internal, data, &mut cur, id, GestureState::Possible);
            let possible = internal
                .entries
                .get(&id)
                .map(|e| e.state == GestureState::Possible)
                .unwrap_or(false);
            if !possible {
                return false;
            }
        }
    }

    register_point(internal, id, event);
    true
}

fn influence_on<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    from: GestureId,
    to: GestureId,
) -> bool {
    // The default: we cancel other gestures when we recognize
    let mut cancel = true;
    let mut cur: CurrentFrame<'_, D> = None;

    with_recognizer(internal, data, &mut cur, from, |r, data, handle| {
        r.should_influence(data, handle, to, &mut cancel)
    });
    with_recognizer(internal, data, &mut cur, to, |r, data, handle| {
        r.should_be_influenced_by(data, handle, from, &mut cancel)
    });

    // Then apply overrides made using the public methods
    if internal
        .entries
        .get(&from)
        .map(|e| e.can_not_cancel.contains(&to))
        .unwrap_or(false)
    {
        cancel = false;
    }

    cancel
}

/// Establish (or reuse) the relationship between two gestures that share
/// a point, returning the delivery-ordering hint
///
/// `-1` means `a` has to be asked first, `+1` means `b` does, `0` leaves
/// the order free.
pub(crate) fn setup_sequence_relationship<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    a: GestureId,
    b: GestureId,
) -> i32 {
    let linked = internal
        .entries
        .get(&a)
        .map(|e| e.in_relationship_with.contains(&b))
        .unwrap_or(false);

    let (cancel_a_on_recognizing, cancel_b_on_recognizing);

    if linked {
        // Already negotiated for an earlier shared sequence, reuse the
        // cancellation polarities.
        cancel_a_on_recognizing = internal
            .entries
            .get(&b)
            .map(|e| e.cancel_on_recognizing.contains(&a))
            .unwrap_or(false);
        cancel_b_on_recognizing = internal
            .entries
            .get(&a)
            .map(|e| e.cancel_on_recognizing.contains(&b))
            .unwrap_or(false);
    } else {
        cancel_b_on_recognizing = influence_on(internal, data, a, b);
        cancel_a_on_recognizing = influence_on(internal, data, b, a);

        debug!(
            "setting up relation between {} (cancel: {}) and {} (cancel: {})",
            internal.label(a),
            cancel_a_on_recognizing,
            internal.label(b),
            cancel_b_on_recognizing,
        );

        if let Some(entry) = internal.entries.get_mut(&a) {
            entry.in_relationship_with.insert(b);
            if cancel_b_on_recognizing {
                entry.cancel_on_recognizing.push(b);
            }
        }
        if let Some(entry) = internal.entries.get_mut(&b) {
            entry.in_relationship_with.insert(a);
            if cancel_a_on_recognizing {
                entry.cancel_on_recognizing.push(a);
            }
        }
    }

    if cancel_b_on_recognizing && !cancel_a_on_recognizing {
        -1
    } else if !cancel_b_on_recognizing && cancel_a_on_recognizing {
        1
    } else {
        0
    }
}

/// Insert `id` into the per-sequence delivery order, negotiating the
/// relationship with every gesture already holding the sequence
fn insert_ordered<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    order: &mut Vec<GestureId>,
    id: GestureId,
) {
    let mut position = order.len();
    for (i, &member) in order.clone().iter().enumerate() {
        let hint = setup_sequence_relationship(internal, data, id, member);
        if hint < 0 {
            position = position.min(i);
        }
    }
    order.insert(position, id);
}

fn deliver_event_to_gesture<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    id: GestureId,
    event: &InputEvent,
) {
    let Some(entry) = internal.entries.get_mut(&id) else {
        return;
    };
    let Some(idx) = entry.find_point(event.device, event.sequence) else {
        return;
    };

    debug_assert!(entry.state != GestureState::Waiting);

    match event.kind {
        EventKind::ButtonPress => {
            let point = &mut entry.points[idx];
            point.n_buttons_pressed += 1;
            if point.n_buttons_pressed >= 2 {
                return;
            }
        }
        EventKind::ButtonRelease => {
            let point = &mut entry.points[idx];
            point.n_buttons_pressed = point.n_buttons_pressed.saturating_sub(1);
            if point.n_buttons_pressed >= 1 {
                return;
            }
        }
        _ => {}
    }

    let mut cur: CurrentFrame<'_, D> = None;

    if matches!(entry.state, GestureState::Cancelled | GestureState::Completed) {
        // Expected tail behavior: absorb events until the sequence ends.
        debug_assert!(entry.public_points.is_empty());

        if matches!(
            event.kind,
            EventKind::ButtonRelease | EventKind::TouchEnd | EventKind::TouchCancel
        ) {
            unregister_point(internal, data, &mut cur, id, event.device, event.sequence);
        }
        return;
    }

    match event.kind {
        EventKind::ButtonPress | EventKind::TouchBegin => {
            debug_assert_eq!(idx, entry.public_points.len());

            let index = entry.point_indices;
            entry.point_indices += 1;
            entry.points[idx].latest_event = Some(event.clone());

            let public = GesturePoint::new(index, event);
            entry.public_points.push(public.clone());

            let points = [public];
            with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
                r.points_began(data, handle, &points)
            });
        }
        EventKind::Motion | EventKind::TouchUpdate => {
            let Some(public) = entry.public_points.get_mut(idx) else {
                return;
            };
            entry.points[idx].latest_event = Some(event.clone());
            public.update(event);

            let points = [public.clone()];
            with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
                r.points_moved(data, handle, &points)
            });
        }
        EventKind::ButtonRelease | EventKind::TouchEnd => {
            let Some(public) = entry.public_points.get_mut(idx) else {
                return;
            };
            entry.points[idx].latest_event = Some(event.clone());
            public.update(event);

            let points = [public.clone()];
            with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
                r.points_ended(data, handle, &points)
            });
            unregister_point(internal, data, &mut cur, id, event.device, event.sequence);
        }
        EventKind::TouchCancel => {
            let Some(public) = entry.public_points.get(idx) else {
                return;
            };

            let points = [public.clone()];
            with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
                r.points_cancelled(data, handle, &points)
            });
            unregister_point(internal, data, &mut cur, id, event.device, event.sequence);
        }
        _ => {}
    }
}

/// The per-actor event dispatcher
pub(crate) fn dispatch<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    actors: &[D::Actor],
    event: &InputEvent,
) {
    if event.flags.contains(EventFlags::SYNTHETIC) {
        return;
    }
    if !matches!(
        event.kind,
        EventKind::ButtonPress
            | EventKind::Motion
            | EventKind::ButtonRelease
            | EventKind::TouchBegin
            | EventKind::TouchUpdate
            | EventKind::TouchEnd
            | EventKind::TouchCancel
    ) {
        return;
    }

    let key = (event.device, event.sequence);

    if event.begins_sequence() {
        let mut accepted: SmallVec<[GestureId; 4]> = SmallVec::new();
        for actor in actors {
            let candidates: SmallVec<[GestureId; 4]> = internal
                .entries
                .iter()
                .filter(|(_, e)| e.actor.as_ref() == Some(actor))
                .map(|(id, _)| *id)
                .collect();

            for id in candidates {
                let holds = internal
                    .entries
                    .get(&id)
                    .map(|e| e.holds_point(event.device, event.sequence))
                    .unwrap_or(false);
                if holds {
                    // A press on a point we already track only bumps the
                    // button depth below.
                    continue;
                }
                if should_handle_sequence(internal, data, id, event) {
                    accepted.push(id);
                }
            }
        }

        let mut order = internal.sequence_order.remove(&key).unwrap_or_default();
        for id in accepted {
            insert_ordered(internal, data, &mut order, id);
        }
        if !order.is_empty() {
            internal.sequence_order.insert(key, order.clone());
        }

        for id in order {
            deliver_event_to_gesture(internal, data, id, event);
        }
    } else {
        let order = internal.sequence_order.get(&key).cloned().unwrap_or_default();
        for id in order {
            deliver_event_to_gesture(internal, data, id, event);
        }
    }
}

/// Forward an ENTER/LEAVE event to the gestures following its sequence
pub(crate) fn dispatch_crossing<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    event: &InputEvent,
    source: &D::Actor,
    related: Option<&D::Actor>,
) {
    if event.flags.contains(EventFlags::SYNTHETIC) {
        return;
    }
    if !matches!(event.kind, EventKind::Enter | EventKind::Leave) {
        return;
    }

    let key = (event.device, event.sequence);
    let order = internal.sequence_order.get(&key).cloned().unwrap_or_default();
    let mut cur: CurrentFrame<'_, D> = None;

    for id in order {
        let point = internal.entries.get(&id).and_then(|entry| {
            let idx = entry.find_point(event.device, event.sequence)?;
            entry.public_points.get(idx).cloned()
        });
        let Some(point) = point else {
            continue;
        };

        with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
            r.crossing_event(
                data,
                handle,
                &point,
                event.kind,
                event.time,
                event.flags,
                source,
                related,
            )
        });
    }
}

// ---------------------------------------------------------------------
// Batch cancellation, attachment and teardown
// ---------------------------------------------------------------------

/// Cancel the points of `id` matching `device` (all of them if
/// `sequences` is empty), emitting one `points_cancelled` batch
pub(crate) fn cancel_sequences<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    id: GestureId,
    device: DeviceId,
    sequences: &[Sequence],
) {
    let Some(entry) = internal.entries.get(&id) else {
        return;
    };

    let affected: SmallVec<[Option<Sequence>; 3]> = entry
        .points
        .iter()
        .filter(|p| {
            p.device == device
                && (sequences.is_empty()
                    || p.sequence.map(|s| sequences.contains(&s)).unwrap_or(false))
        })
        .map(|p| p.sequence)
        .collect();

    let mut cur: CurrentFrame<'_, D> = None;

    if matches!(entry.state, GestureState::Cancelled | GestureState::Completed) {
        debug_assert!(entry.public_points.is_empty());
        for sequence in affected {
            unregister_point(internal, data, &mut cur, id, device, sequence);
        }
        return;
    }

    let batch: SmallVec<[GesturePoint; 3]> = affected
        .iter()
        .filter_map(|sequence| {
            let entry = internal.entries.get(&id)?;
            let idx = entry.find_point(device, *sequence)?;
            entry.public_points.get(idx).cloned()
        })
        .collect();

    if batch.is_empty() {
        return;
    }

    with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
        r.points_cancelled(data, handle, &batch)
    });

    for sequence in affected {
        unregister_point(internal, data, &mut cur, id, device, sequence);
    }
}

/// Cancel every point of `id` at once
pub(crate) fn cancel_all_points<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    id: GestureId,
) {
    let Some(entry) = internal.entries.get_mut(&id) else {
        return;
    };
    let mut cur: CurrentFrame<'_, D> = None;

    if matches!(entry.state, GestureState::Cancelled | GestureState::Completed) {
        debug_assert!(entry.public_points.is_empty());

        let keys: SmallVec<[(DeviceId, Option<Sequence>); 3]> =
            entry.points.iter().map(|p| (p.device, p.sequence)).collect();
        entry.points.clear();
        for (device, sequence) in keys {
            if let Some(order) = internal.sequence_order.get_mut(&(device, sequence)) {
                order.retain(|g| *g != id);
                if order.is_empty() {
                    internal.sequence_order.remove(&(device, sequence));
                }
            }
        }
        set_state_authoritative(internal, data, &mut cur, id, GestureState::Waiting);
        return;
    }

    let batch: SmallVec<[GesturePoint; 3]> = entry.public_points.iter().cloned().collect();
    if batch.is_empty() {
        return;
    }

    with_recognizer(internal, data, &mut cur, id, |r, data, handle| {
        r.points_cancelled(data, handle, &batch)
    });

    if let Some(entry) = internal.entries.get_mut(&id) {
        let keys: SmallVec<[(DeviceId, Option<Sequence>); 3]> =
            entry.points.iter().map(|p| (p.device, p.sequence)).collect();
        entry.points.clear();
        entry.public_points.clear();
        for (device, sequence) in keys {
            if let Some(order) = internal.sequence_order.get_mut(&(device, sequence)) {
                order.retain(|g| *g != id);
                if order.is_empty() {
                    internal.sequence_order.remove(&(device, sequence));
                }
            }
        }
    }

    // The recognizer may have moved to CANCELLED while handling the batch.
    match internal.entries.get(&id).map(|e| e.state) {
        Some(GestureState::Cancelled | GestureState::Completed) => {
            set_state_authoritative(internal, data, &mut cur, id, GestureState::Waiting);
        }
        Some(
            GestureState::Possible | GestureState::RecognizePending | GestureState::Recognizing,
        ) => {
            set_state_authoritative(internal, data, &mut cur, id, GestureState::Cancelled);
        }
        _ => {}
    }
}

/// Attach the gesture to an actor (or detach with `None`), cancelling
/// live points first
pub(crate) fn set_actor<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    id: GestureId,
    actor: Option<D::Actor>,
) {
    let has_points = internal
        .entries
        .get(&id)
        .map(|e| !e.public_points.is_empty())
        .unwrap_or(false);
    if has_points {
        debug!(
            gesture = %internal.label(id),
            "detaching from actor while gesture has points, cancelling points"
        );
        cancel_all_points(internal, data, id);
    }

    if let Some(entry) = internal.entries.get_mut(&id) {
        entry.actor = actor;
    }
}

/// Destroy a gesture: cancel its points, tear down every relationship and
/// drop it from the peers' override tables
pub(crate) fn remove_gesture<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    data: &mut D,
    id: GestureId,
) {
    set_actor(internal, data, id, None);

    // A recognizer that ignores points_cancelled can leave the gesture
    // mid-episode; force the episode closed.
    let state = internal.entries.get(&id).map(|e| e.state);
    let mut cur: CurrentFrame<'_, D> = None;
    match state {
        Some(GestureState::Waiting) | None => {}
        Some(_) => {
            set_state_authoritative(internal, data, &mut cur, id, GestureState::Cancelled);
            set_state_authoritative(internal, data, &mut cur, id, GestureState::Waiting);
        }
    }

    internal.active.retain(|g| *g != id);
    internal.entries.shift_remove(&id);
    for order in internal.sequence_order.values_mut() {
        order.retain(|g| *g != id);
    }
    internal.sequence_order.retain(|_, order| !order.is_empty());

    // Weak-reference semantics for the override tables.
    for entry in internal.entries.values_mut() {
        entry.in_relationship_with.shift_remove(&id);
        entry.cancel_on_recognizing.retain(|g| *g != id);
        entry.can_not_cancel.shift_remove(&id);
        entry.recognize_independently_from.shift_remove(&id);
        entry.require_failure_of.shift_remove(&id);
    }
}

/// Forget every negotiated pairing of `id` so the next shared point
/// renegotiates from scratch
pub(crate) fn relationships_changed<D: StageHandler>(
    internal: &mut GesturesInternal<D>,
    id: GestureId,
) {
    let Some(entry) = internal.entries.get_mut(&id) else {
        return;
    };
    let peers: SmallVec<[GestureId; 4]> = entry.in_relationship_with.drain(..).collect();
    entry.cancel_on_recognizing.clear();

    for peer in peers {
        if let Some(peer_entry) = internal.entries.get_mut(&peer) {
            peer_entry.in_relationship_with.shift_remove(&id);
            peer_entry.cancel_on_recognizing.retain(|g| *g != id);
        }
    }
}
