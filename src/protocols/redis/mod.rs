//! Redis request/response correlation over captured byte windows.
//!
//! Recognizes `GET` and `SET` requests, keeps just enough of them (command,
//! key, start time) to pair with the response, and classifies the response
//! from its first byte. Nothing here buffers data across windows: each
//! window is decoded from scratch.

pub mod cursor;
pub mod decoding;
pub mod transaction;

pub use cursor::{PacketCursor, SliceCursor};
pub use decoding::{classify_response, decode_request, Verdict};
pub use transaction::{Command, Transaction, MAX_KEY_LEN};
