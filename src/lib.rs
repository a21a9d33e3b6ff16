//! Pulse train capture and generation on RP2040 PIO state machines.
//!
//! A capture times a number of alternating-level pulses on one pin; a
//! generation replays a list of hold durations on another. Durations are in
//! ticks of a configurable rate, see [`Config`].
#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to the other modules.
mod fmt;

pub mod completion;
pub mod config;
pub mod error;
pub mod program;
pub mod pulses;
pub mod regs;
pub mod strobe;

#[cfg(target_os = "none")]
pub mod hw;

#[cfg(test)]
mod sim;

pub use completion::{CompletionFlag, CAPTURE_DONE, GENERATE_DONE};
pub use config::{ClockDivider, Clocks, Config};
pub use error::Error;
pub use pulses::{Coprocessor, Level, Pulses, RunParameters, Unbound};
pub use strobe::Strobe;
