#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Tactile: gesture recognition for scene-graph compositors
//!
//! This crate turns the low-level input points delivered by pointers,
//! touch sequences, tablet styli and touchpads into higher-level, named
//! gestures (click, long-press, pan) and arbitrates among the gesture
//! recognizers that are simultaneously plausible for the same points.
//!
//! ## Structure of the crate
//!
//! The core lives in [`gesture`]: the per-gesture recognition state
//! machine, the global arbitration engine and the event dispatcher,
//! together with the bundled recognizers. [`grab`] provides the delivery
//! override installed while a gesture is recognized. The surrounding
//! compositor is reached exclusively through the
//! [`stage::StageHandler`] trait; scene-graph management, hit-testing
//! and the input backends stay with the embedder.
//!
//! ## The event loop and state handling
//!
//! Everything here is single-threaded and event-driven: gesture state
//! transitions, recognizer callbacks, arbitration cascades and timer
//! firings all execute synchronously on the compositor's main event
//! loop. Duration-based recognizers schedule one-shot callbacks through
//! the [`timer`] abstraction; [`timer::EventLoopTimers`] implements it on
//! top of a [`calloop`] event loop.

pub mod event;
pub mod gesture;
pub mod grab;
pub mod settings;
pub mod stage;
pub mod timer;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;
