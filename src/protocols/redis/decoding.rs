//! Bounded RESP decoding for `GET`/`SET` requests and their responses.
//!
//! Only the array header, the command name and the key are decoded:
//!
//! ```text
//! *<n>\r\n$<len>\r\n<method>\r\n$<len>\r\n<key>\r\n[ignored arguments]
//! ```
//!
//! Every reader works on a `PacketCursor` and never reads past the window
//! end. A reader that fails returns a sentinel (`false`, `0` or `None`) and
//! the caller abandons the whole message; the cursor position is not
//! meaningful after a failure.

use super::cursor::PacketCursor;
use super::transaction::{Command, Transaction, MAX_KEY_LEN};
use crate::clock;

const RESP_ARRAY_PREFIX: u8 = b'*';
const RESP_BULK_PREFIX: u8 = b'$';
const RESP_SIMPLE_STRING_PREFIX: u8 = b'+';
const RESP_ERROR_PREFIX: u8 = b'-';
const RESP_TERMINATOR: [u8; RESP_FIELD_TERMINATOR_LEN] = *b"\r\n";
const RESP_FIELD_TERMINATOR_LEN: usize = 2;

/// Width of the command names we compare against.
pub const METHOD_LEN: usize = 3;
const REDIS_CMD_GET: &[u8; METHOD_LEN] = b"GET";
const REDIS_CMD_SET: &[u8; METHOD_LEN] = b"SET";

/// Bulk lengths are read as at most this many ASCII digits.
const BULK_LEN_DIGITS: usize = 3;
const MAX_BULK_LEN: u16 = 999;

/// GET carries 2 parameters, SET carries 3 to 5 (key, value, modifiers).
const MIN_PARAM_COUNT: u32 = 2;
const MAX_PARAM_COUNT: u32 = 5;

/// Read a `\r\n` terminator.
///
/// The cursor moves forward by 2 bytes whether or not the read succeeds.
pub fn read_crlf<C: PacketCursor + ?Sized>(pkt: &mut C) -> bool {
    let mut terminator = [0u8; RESP_FIELD_TERMINATOR_LEN];
    let loaded = pkt.load_bytes(&mut terminator).is_ok();
    pkt.advance(RESP_FIELD_TERMINATOR_LEN);
    loaded && terminator == RESP_TERMINATOR
}

/// Read an array header `*<digit>\r\n` and return the element count.
///
/// Only single-digit counts are supported. Returns 0 on failure.
pub fn read_array_message<C: PacketCursor + ?Sized>(pkt: &mut C) -> u32 {
    let mut prefix = [0u8; 1];
    if pkt.load_bytes(&mut prefix).is_err() || prefix[0] != RESP_ARRAY_PREFIX {
        return 0;
    }
    pkt.advance(prefix.len());

    let mut param_count = [0u8; 1];
    if pkt.load_bytes(&mut param_count).is_err() {
        return 0;
    }
    pkt.advance(param_count.len());

    if !param_count[0].is_ascii_digit() {
        return 0;
    }

    if !read_crlf(pkt) {
        return 0;
    }

    u32::from(param_count[0] - b'0')
}

/// Read a bulk string length `$<1-3 digits>\r\n`.
///
/// The digits are probed at absolute offsets, then the cursor is placed right
/// after the last digit so the terminator read starts on the `\r`. Returns
/// the length in `1..=999`, or 0 when the header is not decodable.
pub fn read_bulk_len<C: PacketCursor + ?Sized>(pkt: &mut C) -> u16 {
    let mut offset = pkt.offset();
    let data_end = pkt.data_end();

    let mut bulk_prefix = [0u8; 1];
    if offset.saturating_add(bulk_prefix.len()) > data_end {
        return 0;
    }
    if pkt.load_bytes_at(offset, &mut bulk_prefix).is_err() || bulk_prefix[0] != RESP_BULK_PREFIX {
        return 0;
    }
    offset += bulk_prefix.len();

    let mut digits = [0u8; BULK_LEN_DIGITS];
    if offset.saturating_add(digits.len()) > data_end {
        return 0;
    }
    if pkt.load_bytes_at(offset, &mut digits).is_err() {
        return 0;
    }

    let mut len: u16 = 0;
    let mut digits_read = 0;
    for &digit in &digits {
        if digit == RESP_TERMINATOR[0] {
            break;
        }
        if !digit.is_ascii_digit() {
            return 0;
        }
        len = len * 10 + u16::from(digit - b'0');
        digits_read += 1;
    }

    pkt.set_offset(offset + digits_read);
    if !read_crlf(pkt) {
        return 0;
    }

    if len == 0 || len > MAX_BULK_LEN {
        return 0;
    }

    len
}

/// Outcome of a successful key read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRead {
    /// Bytes actually stored in the destination.
    pub len: u16,
    /// The declared key was longer than what was stored.
    pub truncated: bool,
}

/// Copy a key of `declared_len` bytes into `dst` and consume its terminator.
///
/// At most `min(MAX_KEY_LEN - 1, dst.len())` bytes are copied, but the
/// cursor always moves past the full declared length so the terminator read
/// lands on the real field boundary.
pub fn read_key_name<C: PacketCursor + ?Sized>(
    pkt: &mut C,
    dst: &mut [u8],
    declared_len: u16,
) -> Option<KeyRead> {
    let declared_len = usize::from(declared_len);
    let copied = declared_len.min(MAX_KEY_LEN - 1).min(dst.len());
    if copied == 0 {
        return None;
    }

    pkt.load_bytes(&mut dst[..copied]).ok()?;
    pkt.advance(declared_len);

    if !read_crlf(pkt) {
        return None;
    }

    Some(KeyRead {
        len: copied as u16,
        truncated: copied < declared_len,
    })
}

/// Decode a `GET` or `SET` request starting at the cursor.
///
/// Returns `None` for anything that is not a complete, well-formed request
/// header within the window. Arguments after the key are never read.
pub fn decode_request<C: PacketCursor + ?Sized>(pkt: &mut C) -> Option<Transaction> {
    let param_count = read_array_message(pkt);
    if !(MIN_PARAM_COUNT..=MAX_PARAM_COUNT).contains(&param_count) {
        return None;
    }

    let method_len = usize::from(read_bulk_len(pkt));
    if method_len == 0 || method_len > METHOD_LEN {
        return None;
    }

    let mut method = [0u8; METHOD_LEN];
    pkt.load_bytes(&mut method).ok()?;
    pkt.advance(method_len);

    if !read_crlf(pkt) {
        return None;
    }

    let command = match &method {
        REDIS_CMD_GET => Command::Get,
        REDIS_CMD_SET => Command::Set,
        _ => return None,
    };

    let mut transaction = Transaction::new(command, clock::now_ns());

    let key_len = read_bulk_len(pkt);
    if key_len == 0 {
        return None;
    }

    let key = read_key_name(pkt, &mut transaction.key, key_len)?;
    transaction.key_len = key.len;
    transaction.truncated = key.truncated;

    Some(transaction)
}

/// What to do with a pending transaction once its response starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Finalize and emit the transaction.
    Emit { is_error: bool },
    /// The response does not match the request; drop without emitting.
    Drop,
}

/// Classify a response by its first byte without consuming it.
///
/// Returns `None` when the window holds no byte to look at.
pub fn classify_response<C: PacketCursor + ?Sized>(pkt: &C, command: Command) -> Option<Verdict> {
    let mut first_byte = [0u8; 1];
    pkt.load_bytes(&mut first_byte).ok()?;

    let expected = match command {
        Command::Get => RESP_BULK_PREFIX,
        Command::Set => RESP_SIMPLE_STRING_PREFIX,
    };

    let verdict = match first_byte[0] {
        RESP_ERROR_PREFIX => Verdict::Emit { is_error: true },
        byte if byte == expected => Verdict::Emit { is_error: false },
        _ => Verdict::Drop,
    };
    Some(verdict)
}
