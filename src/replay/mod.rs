//! Replay of stored requests against their own capture path

mod client;
mod engine;

pub use client::{HttpClient, OutboundRequest};
pub use engine::{
    build_target_url, infer_base_url, is_replayable_header, replayable_headers, ReplayEngine,
    ReplayOutcome, EXCLUDED_HEADERS,
};
