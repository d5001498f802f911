//! Pending Redis transaction record.

use std::fmt;

/// Size of the key storage. One byte is reserved, so at most
/// `MAX_KEY_LEN - 1` key bytes are kept.
pub const MAX_KEY_LEN: usize = 128;

/// Commands the decoder recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Get = 1,
    Set = 2,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Get => "GET",
            Command::Set => "SET",
        }
    }

    /// Inverse of `self as u8`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Command::Get),
            2 => Some(Command::Set),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request waiting for its response.
///
/// `key_len` never exceeds `MAX_KEY_LEN - 1`, and `truncated` is set when
/// the request declared a longer key than was stored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub command: Command,
    pub key: [u8; MAX_KEY_LEN],
    pub key_len: u16,
    pub truncated: bool,
    pub is_error: bool,
    /// Monotonic nanoseconds when the request was decoded.
    pub request_started: u64,
    /// Monotonic nanoseconds when the response was classified.
    pub response_last_seen: u64,
}

impl Transaction {
    pub fn new(command: Command, request_started: u64) -> Self {
        Self {
            command,
            key: [0; MAX_KEY_LEN],
            key_len: 0,
            truncated: false,
            is_error: false,
            request_started,
            response_last_seen: 0,
        }
    }

    /// The stored key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key[..self.key_len as usize]
    }

    /// Request-to-response latency, 0 until the response was seen.
    pub fn latency_ns(&self) -> u64 {
        self.response_last_seen.saturating_sub(self.request_started)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("command", &self.command)
            .field("key", &String::from_utf8_lossy(self.key()))
            .field("truncated", &self.truncated)
            .field("is_error", &self.is_error)
            .field("request_started", &self.request_started)
            .field("response_last_seen", &self.response_last_seen)
            .finish()
    }
}
