//! Pipehook - ephemeral webhook capture endpoints
//!
//! Captures arbitrary HTTP traffic sent to short-lived endpoints, pushes each
//! capture to live WebSocket and SSE viewers, and replays stored requests.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod live;
pub mod network;
pub mod record;
pub mod replay;
pub mod storage;
pub mod sweeper;

pub use error::{HookError, Result};
