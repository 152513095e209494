//! Input-related settings consumed by the bundled recognizers
//!
//! The compositor exposes its settings store through
//! [`StageHandler::settings`](crate::stage::StageHandler::settings). A
//! negative value means "use the built-in default", mirroring how desktop
//! settings daemons report unset keys.

/// Snapshot of the input settings relevant to gesture recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Maximum time between the clicks of a multi-click, in milliseconds.
    /// Negative for the built-in default.
    pub double_click_time: i32,
    /// Distance in logical pixels a press may travel before drag-like
    /// recognizers give up on click-like ones. Negative for the built-in
    /// default.
    pub dnd_drag_threshold: i32,
    /// Time a press has to be held to count as a long press, in
    /// milliseconds. Negative for the built-in default.
    pub long_press_duration: i32,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            double_click_time: -1,
            dnd_drag_threshold: -1,
            long_press_duration: -1,
        }
    }
}

impl Settings {
    /// Resolved double-click time in milliseconds
    pub fn double_click_time_ms(&self) -> u32 {
        if self.double_click_time < 0 {
            100
        } else {
            self.double_click_time as u32
        }
    }

    /// Resolved drag threshold in logical pixels
    pub fn drag_threshold_px(&self) -> u32 {
        if self.dnd_drag_threshold < 0 {
            0
        } else {
            self.dnd_drag_threshold as u32
        }
    }

    /// Resolved long-press duration in milliseconds
    pub fn long_press_duration_ms(&self) -> u32 {
        if self.long_press_duration < 0 {
            500
        } else {
            self.long_press_duration as u32
        }
    }
}
