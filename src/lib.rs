//! Retrace - recording HTTP proxy with differential replay
//!
//! Captures live traffic through a transparent proxy, then replays it
//! against two environments and diffs the responses to surface
//! behavioral drift.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod generate;
pub mod recorder;
pub mod replay;

pub use error::{Result, RetraceError};
