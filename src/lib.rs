//! redis-tap: GET/SET correlation for Redis traffic
//!
//! Pairs each RESP `GET`/`SET` request observed on a connection with the
//! response that follows it and emits one fixed-layout event per completed
//! transaction. Captured data arrives as bounded byte windows that may be
//! truncated or fragmented, so decoding never reads past a window and a
//! window that does not decode changes nothing.
//!
//! Components:
//! - `protocols::redis`: bounded cursor, request decoder, response classifier
//! - `runtime`: connection tuples, pending-transaction store, event emitter,
//!   socket and instrumented-library entry points
//! - `tap`: TCP proxy feeding relayed traffic through the entry points
//! - `stats`: per-key aggregation of emitted events

pub mod clock;
pub mod config;
pub mod protocols;
pub mod runtime;
pub mod stats;
pub mod tap;
