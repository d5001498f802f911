//! Connection identity.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Transport protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transport {
    Tcp = 6,
    Udp = 17,
}

impl Transport {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            6 => Some(Transport::Tcp),
            17 => Some(Transport::Udp),
            _ => None,
        }
    }
}

/// Source/destination endpoints of one direction of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnTuple {
    pub saddr: IpAddr,
    pub daddr: IpAddr,
    pub sport: u16,
    pub dport: u16,
    pub transport: Transport,
}

impl ConnTuple {
    /// A TCP tuple for traffic flowing from `src` to `dst`.
    pub fn tcp(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            saddr: src.ip(),
            daddr: dst.ip(),
            sport: src.port(),
            dport: dst.port(),
            transport: Transport::Tcp,
        }
    }

    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.saddr, self.sport)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.daddr, self.dport)
    }

    /// The same connection seen from the other direction.
    pub fn flipped(&self) -> Self {
        Self {
            saddr: self.daddr,
            daddr: self.saddr,
            sport: self.dport,
            dport: self.sport,
            transport: self.transport,
        }
    }

    /// Orient the tuple so both directions of a connection give the same
    /// value. The endpoint with the higher port (normally the client's
    /// ephemeral port) becomes the source; equal ports fall back to
    /// address order.
    pub fn normalized(&self) -> Self {
        let source_first = match self.sport.cmp(&self.dport) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.saddr >= self.daddr,
        };
        if source_first {
            *self
        } else {
            self.flipped()
        }
    }
}

impl fmt::Display for ConnTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}
