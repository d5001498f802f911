//! Protocol implementations.
//!
//! Each protocol module decodes captured traffic for one wire protocol.
//!
//! - `redis`: RESP `GET`/`SET` request and response classification

pub mod redis;
