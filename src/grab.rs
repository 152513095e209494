//! Event-delivery grabs
//!
//! A grab captures event delivery onto a chosen target while it is
//! active, typically installed when a gesture moved to RECOGNIZING or
//! while a popup is open. The [`Grab`] trait has one method per event
//! family with no-op defaults; [`ActorGrab`] redirects delivery onto an
//! actor sub-tree and rewrites crossing events against it.
//!
//! Grabs stack: installing a new grab asks the currently active one to
//! [`cancel`](Grab::cancel). A grab answering `true` is released for
//! good, one answering `false` stays suspended underneath and becomes
//! active again once the superseding grab is removed.

use tracing::debug;

use crate::event::{DeviceId, InputEvent, Sequence};
use crate::stage::{ActorTarget, CrossingEvent, CrossingMode, StageHandler};

crate::utils::ids::id_gen!(next_grab_id, GRAB_ID);

/// Identity of an installed grab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrabId(usize);

/// A delivery override routing events while it is active
///
/// All event methods default to dropping the event; an implementation
/// forwards what it cares about.
#[allow(unused_variables)]
pub trait Grab<D: StageHandler>: Send {
    /// A crossing between two actors was observed for the device
    #[allow(clippy::too_many_arguments)]
    fn crossing(
        &mut self,
        data: &mut D,
        device: DeviceId,
        sequence: Option<Sequence>,
        old: Option<&D::Actor>,
        new: Option<&D::Actor>,
        mode: CrossingMode,
    ) {
    }

    /// A key event was received
    fn key(&mut self, data: &mut D, event: &InputEvent) {}

    /// A motion event was received
    fn motion(&mut self, data: &mut D, event: &InputEvent) {}

    /// A button event was received
    fn button(&mut self, data: &mut D, event: &InputEvent) {}

    /// A scroll event was received
    fn scroll(&mut self, data: &mut D, event: &InputEvent) {}

    /// A touchpad swipe/pinch/hold gesture event was received
    fn touchpad_gesture(&mut self, data: &mut D, event: &InputEvent) {}

    /// A touch event was received
    fn touch(&mut self, data: &mut D, event: &InputEvent) {}

    /// A tablet pad event was received
    fn pad(&mut self, data: &mut D, event: &InputEvent) {}

    /// A newer grab superseded this one
    ///
    /// Return `true` to release the grab permanently, `false` to be put
    /// in place again after the superseding grab ended.
    fn cancel(&mut self, data: &mut D) -> bool {
        true
    }
}

/// A grab binding event delivery to the sub-tree below an actor
///
/// Crossing events are forwarded only while at least one side of the
/// crossing lies within the sub-tree; all other event families are
/// delivered to the grab actor unconditionally.
pub struct ActorGrab<D: StageHandler> {
    grab_actor: D::Actor,
}

impl<D: StageHandler> std::fmt::Debug for ActorGrab<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorGrab")
            .field("grab_actor", &self.grab_actor)
            .finish()
    }
}

impl<D: StageHandler> ActorGrab<D> {
    /// Create a grab targeting the sub-tree rooted at `grab_actor`
    pub fn new(grab_actor: D::Actor) -> ActorGrab<D> {
        ActorGrab { grab_actor }
    }

    /// The actor the grab routes event delivery to
    pub fn grab_actor(&self) -> &D::Actor {
        &self.grab_actor
    }
}

impl<D: StageHandler> Grab<D> for ActorGrab<D> {
    fn crossing(
        &mut self,
        data: &mut D,
        device: DeviceId,
        sequence: Option<Sequence>,
        old: Option<&D::Actor>,
        new: Option<&D::Actor>,
        mode: CrossingMode,
    ) {
        let mut topmost = None;
        let mut bottommost = None;

        // For grab-induced crossings the grab actor itself is the
        // bottommost reference, so the recipient can tell the crossing
        // apart from real pointer movement.
        if mode == CrossingMode::Grab {
            if let Some(old) = old {
                if self.grab_actor.contains(old) {
                    bottommost = Some(self.grab_actor.clone());
                }
            }
        }
        if mode == CrossingMode::Ungrab {
            if let Some(new) = new {
                if self.grab_actor.contains(new) {
                    bottommost = Some(self.grab_actor.clone());
                }
            }
        }

        let mut old = old.cloned();
        let mut new = new.cloned();

        if let (Some(old_actor), Some(new_actor)) = (old.as_ref(), new.as_ref()) {
            topmost = Some(self.grab_actor.clone());

            let contains_old = self.grab_actor.contains(old_actor);
            let contains_new = self.grab_actor.contains(new_actor);

            if !contains_old && !contains_new {
                return;
            }
            if contains_old && !contains_new {
                new = None;
            }
            if !contains_old && contains_new {
                old = None;
            }
        }

        data.emit_crossing(&CrossingEvent {
            device,
            sequence,
            old,
            new,
            topmost,
            bottommost,
            mode,
        });
    }

    fn key(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    fn motion(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    fn button(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    fn scroll(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    fn touchpad_gesture(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    fn touch(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    fn pad(&mut self, data: &mut D, event: &InputEvent) {
        data.emit_event(&self.grab_actor, event);
    }

    // The default cancel applies: were an actor grab reinstated, it
    // might regain control after the button was already released.
}

struct GrabEntry<D: StageHandler> {
    id: GrabId,
    grab: Box<dyn Grab<D>>,
}

/// The stack of installed grabs
///
/// The topmost grab is the active one; everything below is suspended
/// waiting to be reinstated.
pub struct GrabStack<D: StageHandler> {
    stack: Vec<GrabEntry<D>>,
}

impl<D: StageHandler> std::fmt::Debug for GrabStack<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrabStack")
            .field("depth", &self.stack.len())
            .field("current", &self.stack.last().map(|e| e.id))
            .finish()
    }
}

impl<D: StageHandler> Default for GrabStack<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: StageHandler> GrabStack<D> {
    /// Create an empty grab stack
    pub fn new() -> GrabStack<D> {
        GrabStack { stack: Vec::new() }
    }

    /// Install `grab`, superseding the currently active one
    ///
    /// The active grab is asked to cancel; if it agrees it is released
    /// permanently, otherwise it stays suspended in the stack.
    pub fn grab(&mut self, data: &mut D, grab: Box<dyn Grab<D>>) -> GrabId {
        if let Some(top) = self.stack.last_mut() {
            if top.grab.cancel(data) {
                let released = self.stack.pop().unwrap();
                debug!(grab = ?released.id, "superseded grab released");
            } else {
                debug!(grab = ?top.id, "superseded grab suspended");
            }
        }

        let id = GrabId(next_grab_id());
        self.stack.push(GrabEntry { id, grab });
        id
    }

    /// Remove a grab from the stack
    ///
    /// If it was the active one, the topmost suspended grab is
    /// reinstated. Unknown ids are ignored.
    pub fn ungrab(&mut self, id: GrabId) {
        self.stack.retain(|entry| entry.id != id);
    }

    /// Whether any grab is installed
    pub fn is_grabbed(&self) -> bool {
        !self.stack.is_empty()
    }

    /// The active grab, if any
    pub fn current(&self) -> Option<GrabId> {
        self.stack.last().map(|entry| entry.id)
    }

    /// Route a crossing to the active grab; returns whether a grab
    /// consumed it
    #[allow(clippy::too_many_arguments)]
    pub fn crossing(
        &mut self,
        data: &mut D,
        device: DeviceId,
        sequence: Option<Sequence>,
        old: Option<&D::Actor>,
        new: Option<&D::Actor>,
        mode: CrossingMode,
    ) -> bool {
        match self.stack.last_mut() {
            Some(top) => {
                top.grab.crossing(data, device, sequence, old, new, mode);
                true
            }
            None => false,
        }
    }

    /// Route an event to the active grab; returns whether a grab
    /// consumed it
    pub fn handle_event(&mut self, data: &mut D, event: &InputEvent) -> bool {
        use crate::event::EventKind::*;

        let Some(top) = self.stack.last_mut() else {
            return false;
        };
        match event.kind {
            Key => top.grab.key(data, event),
            Motion => top.grab.motion(data, event),
            ButtonPress | ButtonRelease => top.grab.button(data, event),
            Scroll => top.grab.scroll(data, event),
            TouchpadGesture => top.grab.touchpad_gesture(data, event),
            TouchBegin | TouchUpdate | TouchEnd | TouchCancel => top.grab.touch(data, event),
            Pad => top.grab.pad(data, event),
            Enter | Leave => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::event::EventKind;
    use crate::test_support::*;

    struct CountingGrab {
        cancels: Arc<AtomicUsize>,
        release_on_cancel: bool,
        motions: Arc<AtomicUsize>,
    }

    impl Grab<TestStage> for CountingGrab {
        fn motion(&mut self, _data: &mut TestStage, _event: &InputEvent) {
            self.motions.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&mut self, _data: &mut TestStage) -> bool {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.release_on_cancel
        }
    }

    fn counting_grab(release_on_cancel: bool) -> (CountingGrab, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let cancels = Arc::new(AtomicUsize::new(0));
        let motions = Arc::new(AtomicUsize::new(0));
        (
            CountingGrab {
                cancels: cancels.clone(),
                release_on_cancel,
                motions: motions.clone(),
            },
            cancels,
            motions,
        )
    }

    #[test]
    fn crossing_inside_the_subtree_is_forwarded_unchanged() {
        let mut stage = TestStage::new();
        let root = TestActor::root("root");
        let panel = TestActor::child_of("panel", &root);
        let button = TestActor::child_of("button", &panel);
        let entry = TestActor::child_of("entry", &panel);

        let mut grab: ActorGrab<TestStage> = ActorGrab::new(panel.clone());
        grab.crossing(
            &mut stage,
            pointer(),
            None,
            Some(&button),
            Some(&entry),
            CrossingMode::Normal,
        );

        assert_eq!(stage.crossings.len(), 1);
        let crossing = &stage.crossings[0];
        assert_eq!(crossing.old.as_ref(), Some(&button));
        assert_eq!(crossing.new.as_ref(), Some(&entry));
        assert_eq!(crossing.topmost.as_ref(), Some(&panel));
        assert_eq!(crossing.bottommost, None);
    }

    #[test]
    fn leaving_the_subtree_reports_only_the_leave() {
        let mut stage = TestStage::new();
        let root = TestActor::root("root");
        let panel = TestActor::child_of("panel", &root);
        let button = TestActor::child_of("button", &panel);
        let outside = TestActor::child_of("outside", &root);

        let mut grab: ActorGrab<TestStage> = ActorGrab::new(panel.clone());
        grab.crossing(
            &mut stage,
            pointer(),
            None,
            Some(&button),
            Some(&outside),
            CrossingMode::Normal,
        );

        let crossing = &stage.crossings[0];
        assert_eq!(crossing.old.as_ref(), Some(&button));
        assert_eq!(crossing.new, None);
    }

    #[test]
    fn entering_the_subtree_reports_only_the_enter() {
        let mut stage = TestStage::new();
        let root = TestActor::root("root");
        let panel = TestActor::child_of("panel", &root);
        let button = TestActor::child_of("button", &panel);
        let outside = TestActor::child_of("outside", &root);

        let mut grab: ActorGrab<TestStage> = ActorGrab::new(panel.clone());
        grab.crossing(
            &mut stage,
            pointer(),
            None,
            Some(&outside),
            Some(&button),
            CrossingMode::Normal,
        );

        let crossing = &stage.crossings[0];
        assert_eq!(crossing.old, None);
        assert_eq!(crossing.new.as_ref(), Some(&button));
    }

    #[test]
    fn crossings_outside_the_subtree_are_dropped() {
        let mut stage = TestStage::new();
        let root = TestActor::root("root");
        let panel = TestActor::child_of("panel", &root);
        let elsewhere = TestActor::child_of("elsewhere", &root);
        let more = TestActor::child_of("more", &elsewhere);

        let mut grab: ActorGrab<TestStage> = ActorGrab::new(panel);
        grab.crossing(
            &mut stage,
            pointer(),
            None,
            Some(&elsewhere),
            Some(&more),
            CrossingMode::Normal,
        );

        assert!(stage.crossings.is_empty());
    }

    #[test]
    fn grab_induced_crossings_reference_the_grab_actor() {
        let mut stage = TestStage::new();
        let root = TestActor::root("root");
        let panel = TestActor::child_of("panel", &root);
        let button = TestActor::child_of("button", &panel);

        let mut grab: ActorGrab<TestStage> = ActorGrab::new(panel.clone());
        grab.crossing(
            &mut stage,
            pointer(),
            None,
            Some(&button),
            None,
            CrossingMode::Grab,
        );

        let crossing = &stage.crossings[0];
        assert_eq!(crossing.bottommost.as_ref(), Some(&panel));
        assert_eq!(crossing.mode, CrossingMode::Grab);
    }

    #[test]
    fn other_event_families_fan_out_to_the_actor() {
        let mut stage = TestStage::new();
        let root = TestActor::root("root");
        let panel = TestActor::child_of("panel", &root);

        let mut stack = GrabStack::new();
        stack.grab(&mut stage, Box::new(ActorGrab::new(panel.clone())));

        assert!(stack.handle_event(&mut stage, &motion(pointer(), 1.0, 1.0, 0)));
        assert!(stack.handle_event(&mut stage, &press(pointer(), 1.0, 1.0, 5)));

        assert_eq!(stage.emitted.len(), 2);
        assert_eq!(stage.emitted[0], (panel.clone(), EventKind::Motion));
        assert_eq!(stage.emitted[1], (panel, EventKind::ButtonPress));
    }

    #[test]
    fn consenting_grab_is_released_on_supersede() {
        let mut stage = TestStage::new();
        let mut stack = GrabStack::new();

        let (first, cancels, motions) = counting_grab(true);
        stack.grab(&mut stage, Box::new(first));
        let (second, _, second_motions) = counting_grab(true);
        let second_id = stack.grab(&mut stage, Box::new(second));

        assert_eq!(cancels.load(Ordering::SeqCst), 1);

        stack.ungrab(second_id);
        assert!(!stack.is_grabbed());

        // The first grab is gone for good.
        stack.handle_event(&mut stage, &motion(pointer(), 0.0, 0.0, 0));
        assert_eq!(motions.load(Ordering::SeqCst), 0);
        assert_eq!(second_motions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn refusing_grab_is_reinstated_after_the_superseder() {
        let mut stage = TestStage::new();
        let mut stack = GrabStack::new();

        let (first, cancels, motions) = counting_grab(false);
        let first_id = stack.grab(&mut stage, Box::new(first));
        let (second, _, _) = counting_grab(true);
        let second_id = stack.grab(&mut stage, Box::new(second));

        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(stack.current(), Some(second_id));

        stack.ungrab(second_id);
        assert_eq!(stack.current(), Some(first_id));

        stack.handle_event(&mut stage, &motion(pointer(), 0.0, 0.0, 0));
        assert_eq!(motions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_superseder_asks_the_active_grab() {
        let mut stage = TestStage::new();
        let mut stack = GrabStack::new();

        let (first, first_cancels, _) = counting_grab(false);
        stack.grab(&mut stage, Box::new(first));
        let (second, second_cancels, _) = counting_grab(false);
        stack.grab(&mut stage, Box::new(second));
        let (third, _, _) = counting_grab(true);
        stack.grab(&mut stage, Box::new(third));

        // Only the grab that was active at install time is asked.
        assert_eq!(first_cancels.load(Ordering::SeqCst), 1);
        assert_eq!(second_cancels.load(Ordering::SeqCst), 1);
    }
}
