//! One-shot timer service
//!
//! Duration-based recognizers (long-press, multi-click) schedule one-shot
//! callbacks through [`StageHandler::schedule_once`](crate::stage::StageHandler::schedule_once).
//! The callback runs as an ordinary main-loop work item with full access to
//! the compositor state.
//!
//! [`EventLoopTimers`] is a ready-made implementation backed by a
//! [`calloop`] event loop; compositors using a different loop can implement
//! the two `StageHandler` methods themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::warn;

crate::utils::ids::id_gen!(next_timer_id, TIMER_ID);

/// Token identifying a scheduled one-shot timer
///
/// Tokens are never reused; cancelling a timer that has already fired is
/// a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(usize);

impl TimerToken {
    pub(crate) fn new() -> TimerToken {
        TimerToken(next_timer_id())
    }
}

/// Callback invoked when a one-shot timer fires
pub type TimerCallback<D> = Box<dyn FnOnce(&mut D) + Send>;

/// Timer service backed by a [`calloop`] event loop
///
/// Stores one [`RegistrationToken`] per pending timer; the registration is
/// dropped both when the timer fires and when it is cancelled.
pub struct EventLoopTimers<D> {
    handle: LoopHandle<'static, D>,
    pending: Arc<Mutex<HashMap<TimerToken, RegistrationToken>>>,
}

impl<D> std::fmt::Debug for EventLoopTimers<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopTimers")
            .field("pending", &self.pending.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl<D: 'static> EventLoopTimers<D> {
    /// Create a timer service dispatching on the given event loop
    pub fn new(handle: LoopHandle<'static, D>) -> EventLoopTimers<D> {
        EventLoopTimers {
            handle,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `callback` to run once after `delay`
    ///
    /// If the event loop refuses the timer source, the callback never
    /// fires; the returned token stays valid and cancelling it is a
    /// no-op.
    pub fn schedule_once(&mut self, delay: Duration, callback: TimerCallback<D>) -> TimerToken {
        let token = TimerToken::new();
        let pending = self.pending.clone();
        let mut callback = Some(callback);
        let registration = self
            .handle
            .insert_source(Timer::from_duration(delay), move |_, _, data| {
                pending.lock().unwrap().remove(&token);
                if let Some(callback) = callback.take() {
                    callback(data);
                }
                TimeoutAction::Drop
            });
        match registration {
            Ok(registration) => {
                self.pending.lock().unwrap().insert(token, registration);
            }
            Err(err) => {
                warn!("failed to arm one-shot timer: {}", calloop::Error::from(err));
            }
        }
        token
    }

    /// Cancel a pending timer
    ///
    /// Unknown or already-fired tokens are ignored.
    pub fn cancel(&mut self, token: TimerToken) {
        if let Some(registration) = self.pending.lock().unwrap().remove(&token) {
            self.handle.remove(registration);
        }
    }
}
