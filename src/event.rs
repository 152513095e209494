//! Input event model consumed by the gesture core
//!
//! The compositor's input pipeline classifies raw device events and hands
//! them to [`GesturesState::handle_event`](crate::gesture::GesturesState::handle_event)
//! as [`InputEvent`]s. The types here deliberately carry only what gesture
//! recognition needs; everything else about an event stays with the
//! compositor.

use std::fmt;

use bitflags::bitflags;

use crate::utils::Point;

crate::utils::ids::id_gen!(next_device_id, DEVICE_ID);

/// The type of an input device, as advertised by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// A relative pointing device, like a mouse or trackball
    Pointer,
    /// A touchpad
    Touchpad,
    /// A direct-touch screen
    Touchscreen,
    /// A drawing tablet stylus
    Tablet,
    /// A keyboard
    Keyboard,
    /// A pad of buttons and rings on a drawing tablet
    Pad,
}

bitflags! {
    /// A set of [`DeviceType`]s, used to restrict which devices may add
    /// points to a gesture
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceTypes: u32 {
        /// Pointer devices
        const POINTER = 1 << 0;
        /// Touchpads
        const TOUCHPAD = 1 << 1;
        /// Touchscreens
        const TOUCHSCREEN = 1 << 2;
        /// Tablet styli
        const TABLET = 1 << 3;
        /// Keyboards
        const KEYBOARD = 1 << 4;
        /// Tablet pads
        const PAD = 1 << 5;
    }
}

impl DeviceTypes {
    /// The device types gestures accept by default
    pub const GESTURE_DEFAULT: DeviceTypes = DeviceTypes::POINTER
        .union(DeviceTypes::TOUCHPAD)
        .union(DeviceTypes::TOUCHSCREEN)
        .union(DeviceTypes::TABLET);
}

impl From<DeviceType> for DeviceTypes {
    fn from(ty: DeviceType) -> DeviceTypes {
        match ty {
            DeviceType::Pointer => DeviceTypes::POINTER,
            DeviceType::Touchpad => DeviceTypes::TOUCHPAD,
            DeviceType::Touchscreen => DeviceTypes::TOUCHSCREEN,
            DeviceType::Tablet => DeviceTypes::TABLET,
            DeviceType::Keyboard => DeviceTypes::KEYBOARD,
            DeviceType::Pad => DeviceTypes::PAD,
        }
    }
}

/// Handle of an input device
///
/// Two handles compare equal exactly when they refer to the same device.
/// The id is never reused, even after the device is unplugged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    id: usize,
    ty: DeviceType,
}

impl DeviceId {
    /// Allocate a handle for a newly seen device of the given type
    pub fn new(ty: DeviceType) -> DeviceId {
        DeviceId {
            id: next_device_id(),
            ty,
        }
    }

    /// The type of the device
    pub fn device_type(&self) -> DeviceType {
        self.ty
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{}", self.ty, self.id)
    }
}

/// Opaque per-touch token distinguishing concurrent touches from the
/// same device
///
/// Pointer events carry no sequence; every touch point of a running
/// touch session carries the one it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sequence(pub u64);

bitflags! {
    /// Flags carried by an [`InputEvent`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        /// The event was synthesized by the compositor rather than
        /// produced by a device
        const SYNTHETIC = 1 << 0;
    }
}

bitflags! {
    /// The state of the keyboard modifiers and pointer buttons at the
    /// time of an event
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModifiersState: u32 {
        /// Shift
        const SHIFT = 1 << 0;
        /// Control
        const CTRL = 1 << 1;
        /// Alt
        const ALT = 1 << 2;
        /// Super / logo
        const SUPER = 1 << 3;
        /// Caps lock
        const CAPS_LOCK = 1 << 4;
        /// First pointer button held
        const BUTTON1 = 1 << 8;
        /// Second pointer button held
        const BUTTON2 = 1 << 9;
        /// Third pointer button held
        const BUTTON3 = 1 << 10;
        /// Fourth pointer button held
        const BUTTON4 = 1 << 11;
        /// Fifth pointer button held
        const BUTTON5 = 1 << 12;
    }
}

impl ModifiersState {
    /// All pointer-button bits
    pub const BUTTON_MASK: ModifiersState = ModifiersState::BUTTON1
        .union(ModifiersState::BUTTON2)
        .union(ModifiersState::BUTTON3)
        .union(ModifiersState::BUTTON4)
        .union(ModifiersState::BUTTON5);
}

/// Classification of an [`InputEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A pointer button was pressed
    ButtonPress,
    /// The pointer moved
    Motion,
    /// A pointer button was released
    ButtonRelease,
    /// A new touch point appeared
    TouchBegin,
    /// A touch point changed coordinates
    TouchUpdate,
    /// A touch point disappeared
    TouchEnd,
    /// A touch session was cancelled by the backend
    TouchCancel,
    /// The pointer or a touch point entered an actor
    Enter,
    /// The pointer or a touch point left an actor
    Leave,
    /// A key was pressed or released
    Key,
    /// A scroll axis moved
    Scroll,
    /// A touchpad swipe/pinch/hold gesture event
    TouchpadGesture,
    /// A tablet pad button, ring or strip event
    Pad,
}

/// A single input event as seen by the gesture core
///
/// The struct is an owned snapshot; each live gesture point keeps a copy
/// of the latest event it saw, released together with the point.
#[derive(Debug, Clone)]
pub struct InputEvent {
    /// Event classification
    pub kind: EventKind,
    /// The logical device the event belongs to
    pub device: DeviceId,
    /// The hardware device that produced the event
    pub source_device: DeviceId,
    /// Touch sequence of the event, `None` for pointer events
    pub sequence: Option<Sequence>,
    /// Position in the stage coordinate space
    pub position: Point,
    /// Timestamp of the event, with millisecond granularity
    pub time: u32,
    /// Event flags
    pub flags: EventFlags,
    /// Modifier state at the time of the event
    pub modifiers: ModifiersState,
    /// Button index for button events, `0` otherwise
    pub button: u32,
}

impl InputEvent {
    /// Create an event with the given kind and no payload beyond the
    /// device and position
    pub fn new(kind: EventKind, device: DeviceId, position: impl Into<Point>, time: u32) -> InputEvent {
        InputEvent {
            kind,
            device,
            source_device: device,
            sequence: None,
            position: position.into(),
            time,
            flags: EventFlags::empty(),
            modifiers: ModifiersState::empty(),
            button: 0,
        }
    }

    /// Attach a touch sequence to the event
    pub fn with_sequence(mut self, sequence: Sequence) -> InputEvent {
        self.sequence = Some(sequence);
        self
    }

    /// Attach a button index to the event
    pub fn with_button(mut self, button: u32) -> InputEvent {
        self.button = button;
        self
    }

    /// Attach a modifier state to the event
    pub fn with_modifiers(mut self, modifiers: ModifiersState) -> InputEvent {
        self.modifiers = modifiers;
        self
    }

    /// Mark the event as synthesized by the compositor
    pub fn synthetic(mut self) -> InputEvent {
        self.flags |= EventFlags::SYNTHETIC;
        self
    }

    /// Whether this event opens a new point sequence
    pub(crate) fn begins_sequence(&self) -> bool {
        matches!(self.kind, EventKind::ButtonPress | EventKind::TouchBegin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_unique() {
        let a = DeviceId::new(DeviceType::Pointer);
        let b = DeviceId::new(DeviceType::Pointer);
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn default_mask_covers_pointing_devices() {
        for ty in [
            DeviceType::Pointer,
            DeviceType::Touchpad,
            DeviceType::Touchscreen,
            DeviceType::Tablet,
        ] {
            assert!(DeviceTypes::GESTURE_DEFAULT.contains(ty.into()));
        }
        assert!(!DeviceTypes::GESTURE_DEFAULT.contains(DeviceType::Keyboard.into()));
    }

    #[test]
    fn button_mask_strips_only_buttons() {
        let state = ModifiersState::SHIFT | ModifiersState::BUTTON1 | ModifiersState::BUTTON3;
        assert_eq!(
            state.difference(ModifiersState::BUTTON_MASK),
            ModifiersState::SHIFT
        );
    }
}
