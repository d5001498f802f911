//! Completed transaction events and their fixed-layout record format.
//!
//! ## Record layout (little-endian, `EVENT_SIZE` bytes)
//!
//! ```text
//! offset  size  field
//!      0    16  source address (IPv4 in the first 4 bytes)
//!     16    16  destination address
//!     32     2  source port
//!     34     2  destination port
//!     36     1  address family (4 or 6)
//!     37     1  transport (IANA protocol number)
//!     38     1  command
//!     39     1  flags (bit 0 truncated, bit 1 error)
//!     40     2  key length
//!     42   128  key bytes, zero padded
//!    170     8  request started (ns)
//!    178     8  response last seen (ns)
//! ```

use crate::protocols::redis::{Command, Transaction, MAX_KEY_LEN};
use crate::runtime::tuple::{ConnTuple, Transport};
use bytes::{Buf, BufMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

const ADDR_LEN: usize = 16;
const TUPLE_SIZE: usize = 2 * ADDR_LEN + 2 + 2 + 1 + 1;
const TRANSACTION_SIZE: usize = 1 + 1 + 2 + MAX_KEY_LEN + 8 + 8;

/// Size of one encoded event record.
pub const EVENT_SIZE: usize = TUPLE_SIZE + TRANSACTION_SIZE;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

const FLAG_TRUNCATED: u8 = 1 << 0;
const FLAG_ERROR: u8 = 1 << 1;

/// A finalized transaction together with its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub tuple: ConnTuple,
    pub tx: Transaction,
}

/// Errors decoding an event record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("event record is {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("address families differ or are unknown: {0}")]
    Family(u8),

    #[error("unknown transport: {0}")]
    Transport(u8),

    #[error("unknown command: {0}")]
    Command(u8),

    #[error("key length {0} exceeds key storage")]
    KeyLength(u16),
}

impl Event {
    /// Append the fixed-layout record for `tuple` and `tx` to `buf`.
    pub fn encode_into<B: BufMut>(tuple: &ConnTuple, tx: &Transaction, buf: &mut B) {
        let family = match (tuple.saddr, tuple.daddr) {
            (IpAddr::V4(_), IpAddr::V4(_)) => FAMILY_V4,
            _ => FAMILY_V6,
        };
        put_addr(buf, tuple.saddr, family);
        put_addr(buf, tuple.daddr, family);
        buf.put_u16_le(tuple.sport);
        buf.put_u16_le(tuple.dport);
        buf.put_u8(family);
        buf.put_u8(tuple.transport as u8);

        let mut flags = 0;
        if tx.truncated {
            flags |= FLAG_TRUNCATED;
        }
        if tx.is_error {
            flags |= FLAG_ERROR;
        }
        buf.put_u8(tx.command as u8);
        buf.put_u8(flags);
        buf.put_u16_le(tx.key_len);
        buf.put_slice(&tx.key);
        buf.put_u64_le(tx.request_started);
        buf.put_u64_le(tx.response_last_seen);
    }

    /// Parse one record produced by `encode_into`.
    pub fn decode(mut record: &[u8]) -> Result<Self, EventDecodeError> {
        if record.len() != EVENT_SIZE {
            return Err(EventDecodeError::Length {
                expected: EVENT_SIZE,
                actual: record.len(),
            });
        }

        let mut saddr = [0u8; ADDR_LEN];
        let mut daddr = [0u8; ADDR_LEN];
        record.copy_to_slice(&mut saddr);
        record.copy_to_slice(&mut daddr);
        let sport = record.get_u16_le();
        let dport = record.get_u16_le();
        let family = record.get_u8();
        let transport = record.get_u8();
        let transport = Transport::from_u8(transport).ok_or(EventDecodeError::Transport(transport))?;

        let tuple = ConnTuple {
            saddr: get_addr(saddr, family)?,
            daddr: get_addr(daddr, family)?,
            sport,
            dport,
            transport,
        };

        let command = record.get_u8();
        let command = Command::from_u8(command).ok_or(EventDecodeError::Command(command))?;
        let flags = record.get_u8();
        let key_len = record.get_u16_le();
        if usize::from(key_len) >= MAX_KEY_LEN {
            return Err(EventDecodeError::KeyLength(key_len));
        }

        let mut tx = Transaction::new(command, 0);
        record.copy_to_slice(&mut tx.key);
        tx.key_len = key_len;
        tx.truncated = flags & FLAG_TRUNCATED != 0;
        tx.is_error = flags & FLAG_ERROR != 0;
        tx.request_started = record.get_u64_le();
        tx.response_last_seen = record.get_u64_le();

        Ok(Event { tuple, tx })
    }
}

fn put_addr<B: BufMut>(buf: &mut B, addr: IpAddr, family: u8) {
    let mut octets = [0u8; ADDR_LEN];
    match addr {
        IpAddr::V4(v4) if family == FAMILY_V4 => octets[..4].copy_from_slice(&v4.octets()),
        IpAddr::V4(v4) => octets = v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => octets = v6.octets(),
    }
    buf.put_slice(&octets);
}

fn get_addr(octets: [u8; ADDR_LEN], family: u8) -> Result<IpAddr, EventDecodeError> {
    match family {
        FAMILY_V4 => Ok(IpAddr::V4(Ipv4Addr::new(
            octets[0], octets[1], octets[2], octets[3],
        ))),
        FAMILY_V6 => Ok(IpAddr::V6(Ipv6Addr::from(octets))),
        other => Err(EventDecodeError::Family(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn sample(tuple: ConnTuple) -> Event {
        let mut tx = Transaction::new(Command::Get, 100);
        tx.key[..7].copy_from_slice(b"user:42");
        tx.key_len = 7;
        tx.is_error = true;
        tx.response_last_seen = 350;
        Event { tuple, tx }
    }

    #[test]
    fn test_record_is_fixed_size() {
        let tuple = ConnTuple::tcp(
            "10.0.0.1:50000".parse().unwrap(),
            "10.0.0.2:6379".parse().unwrap(),
        );
        let event = sample(tuple);
        let mut buf = BytesMut::new();
        Event::encode_into(&event.tuple, &event.tx, &mut buf);
        assert_eq!(buf.len(), EVENT_SIZE);
        assert_eq!(Event::decode(&buf).unwrap(), event);
    }

    #[test]
    fn test_ipv6_and_mixed_families() {
        let tuple = ConnTuple::tcp(
            "[::1]:50000".parse().unwrap(),
            "127.0.0.1:6379".parse().unwrap(),
        );
        let mut buf = BytesMut::new();
        let event = sample(tuple);
        Event::encode_into(&event.tuple, &event.tx, &mut buf);

        let decoded = Event::decode(&buf).unwrap();
        assert_eq!(decoded.tuple.saddr, tuple.saddr);
        assert_eq!(
            decoded.tuple.daddr,
            IpAddr::V6("::ffff:127.0.0.1".parse().unwrap())
        );
        assert_eq!(decoded.tx.key(), b"user:42");
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert_eq!(
            Event::decode(&[0u8; 10]),
            Err(EventDecodeError::Length {
                expected: EVENT_SIZE,
                actual: 10
            })
        );

        let tuple = ConnTuple::tcp(
            "10.0.0.1:50000".parse().unwrap(),
            "10.0.0.2:6379".parse().unwrap(),
        );
        let event = sample(tuple);
        let mut buf = BytesMut::new();
        Event::encode_into(&event.tuple, &event.tx, &mut buf);

        let mut bad_command = buf.clone();
        bad_command[TUPLE_SIZE] = 9;
        assert_eq!(Event::decode(&bad_command), Err(EventDecodeError::Command(9)));

        let mut bad_family = buf.clone();
        bad_family[36] = 5;
        assert_eq!(Event::decode(&bad_family), Err(EventDecodeError::Family(5)));
    }
}
