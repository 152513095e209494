//! Interfaces connecting the gesture core to the surrounding compositor
//!
//! The core never walks the scene graph, reads configuration or arms
//! timers itself; it consumes those services through [`StageHandler`],
//! implemented once by the compositor state. This mirrors how the actor
//! tree stays in charge of hit-testing and event routing while gestures
//! only see the per-actor event stream.

use std::fmt;
use std::time::Duration;

use crate::event::{DeviceId, InputEvent, Sequence};
use crate::settings::Settings;
use crate::timer::{TimerCallback, TimerToken};

/// Trait implemented by scene-graph elements that gestures attach to
///
/// Only the tree structure is needed: a parent pointer and the derived
/// containment predicate. Equality must identify the same actor, not
/// structural likeness.
pub trait ActorTarget: Clone + PartialEq + fmt::Debug + Send {
    /// The parent of this actor, `None` for the root
    fn parent(&self) -> Option<Self>;

    /// Whether `descendant` is this actor or inside the sub-tree rooted
    /// at this actor
    fn contains(&self, descendant: &Self) -> bool {
        let mut current = Some(descendant.clone());
        while let Some(actor) = current {
            if actor == *self {
                return true;
            }
            current = actor.parent();
        }
        false
    }
}

/// The way a crossing event was provoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingMode {
    /// The pointer or touch point actually moved between actors
    Normal,
    /// The crossing was synthesized because a grab was installed
    Grab,
    /// The crossing was synthesized because a grab was removed
    Ungrab,
}

/// A crossing event as emitted towards the stage
///
/// `topmost` and `bottommost` bound the stretch of the actor chain the
/// stage delivers enter/leave notifications to.
#[derive(Debug, Clone)]
pub struct CrossingEvent<A> {
    /// The device the crossing belongs to
    pub device: DeviceId,
    /// Touch sequence, `None` for pointer crossings
    pub sequence: Option<Sequence>,
    /// Actor that was left, if any
    pub old: Option<A>,
    /// Actor that was entered, if any
    pub new: Option<A>,
    /// Upper bound of the notified chain
    pub topmost: Option<A>,
    /// Lower bound of the notified chain
    pub bottommost: Option<A>,
    /// How the crossing was provoked
    pub mode: CrossingMode,
}

/// Handler trait connecting the gesture core to the compositor
///
/// Only `schedule_once` and `cancel_timer` have no default; a compositor
/// that does not care about sequence claims or grab fan-out can leave the
/// rest alone.
pub trait StageHandler: Sized + 'static {
    /// Type used to represent actors of the scene graph
    type Actor: ActorTarget + 'static;

    /// Snapshot of the input settings
    fn settings(&self) -> Settings {
        Settings::default()
    }

    /// Schedule a one-shot timer
    fn schedule_once(&mut self, delay: Duration, callback: TimerCallback<Self>) -> TimerToken;

    /// Cancel a previously scheduled timer
    ///
    /// Cancelling a timer that already fired is a no-op.
    fn cancel_timer(&mut self, timer: TimerToken);

    /// A recognizing gesture claimed an input sequence
    ///
    /// The event router should suppress non-gesture delivery for the
    /// sequence until it ends.
    fn sequence_claimed(&mut self, _device: DeviceId, _sequence: Option<Sequence>) {}

    /// A grab asks the stage to emit a crossing event
    fn emit_crossing(&mut self, _event: &CrossingEvent<Self::Actor>) {}

    /// A grab asks the stage to deliver an event to an actor
    fn emit_event(&mut self, _actor: &Self::Actor, _event: &InputEvent) {}
}
