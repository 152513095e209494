//! Per-gesture input point registry
//!
//! Every gesture keeps a private list of the live input sequences it is
//! following, in arrival order, together with a public projection that is
//! handed to the recognizer. A public point exists only once its sequence
//! has fully begun; while the gesture sits in a terminal state the public
//! list is empty and remaining sequences are merely tracked until they end.

use crate::event::{DeviceId, EventKind, InputEvent, Sequence};
use crate::utils::Point;

/// Private per-sequence bookkeeping
#[derive(Debug)]
pub(crate) struct PointData {
    pub(crate) device: DeviceId,
    pub(crate) source_device: DeviceId,
    pub(crate) sequence: Option<Sequence>,
    /// Owned copy of the last event seen for this sequence, released
    /// together with the point
    pub(crate) latest_event: Option<InputEvent>,
    /// Only the first button press and the last release of a pointer
    /// point count; everything in between is absorbed
    pub(crate) n_buttons_pressed: u32,
}

impl PointData {
    pub(crate) fn new(event: &InputEvent) -> PointData {
        PointData {
            device: event.device,
            source_device: event.source_device,
            sequence: event.sequence,
            latest_event: None,
            n_buttons_pressed: 0,
        }
    }

    pub(crate) fn matches(&self, device: DeviceId, sequence: Option<Sequence>) -> bool {
        self.device == device && self.sequence == sequence
    }
}

/// A live input point as seen by a gesture recognizer
///
/// The coordinate fields keep the begin, latest motion and end positions
/// of the sequence around separately, so recognizers can measure both
/// travel since the press and per-event deltas (`latest` - `last`).
#[derive(Debug, Clone)]
pub struct GesturePoint {
    /// Stable index of the point within the current recognition episode
    pub index: u32,
    /// Position of the event that began the sequence
    pub begin: Point,
    /// Position of the most recent motion event
    pub motion: Point,
    /// Position of the event that ended the sequence
    pub end: Point,
    /// Position of the event before the latest one
    pub last: Point,
    /// Position of the latest event
    pub latest: Point,
    /// Timestamp of the latest event, with millisecond granularity
    pub event_time: u32,
    /// Copy of the latest event
    pub latest_event: InputEvent,
}

impl GesturePoint {
    pub(crate) fn new(index: u32, event: &InputEvent) -> GesturePoint {
        let mut point = GesturePoint {
            index,
            begin: Point::ZERO,
            motion: Point::ZERO,
            end: Point::ZERO,
            last: Point::ZERO,
            latest: Point::ZERO,
            event_time: 0,
            latest_event: event.clone(),
        };
        point.update(event);
        point
    }

    /// Fold a new event for the sequence into the point
    pub(crate) fn update(&mut self, event: &InputEvent) {
        self.latest_event = event.clone();
        self.event_time = event.time;

        match event.kind {
            EventKind::ButtonPress | EventKind::TouchBegin => self.begin = event.position,
            EventKind::Motion | EventKind::TouchUpdate => self.motion = event.position,
            _ => self.end = event.position,
        }

        self.last = self.latest;
        self.latest = event.position;
    }
}
