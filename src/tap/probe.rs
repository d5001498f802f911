//! Hands relayed chunks to the dispatcher as captured windows.

use crate::config::CaptureMode;
use crate::protocols::redis::SliceCursor;
use crate::runtime::{ConnTuple, Dispatcher, PacketInfo};
use std::sync::Arc;

/// Direction of a relayed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

/// Capture point for one proxied connection.
///
/// In socket mode each chunk is presented like a TCP segment, with the tuple
/// oriented by direction. In library mode it is presented like an
/// intercepted library call, always with the client-side tuple.
#[derive(Clone)]
pub struct Probe {
    dispatcher: Arc<Dispatcher>,
    capture: CaptureMode,
    client_tuple: ConnTuple,
}

impl Probe {
    pub fn new(dispatcher: Arc<Dispatcher>, capture: CaptureMode, client_tuple: ConnTuple) -> Self {
        Self {
            dispatcher,
            capture,
            client_tuple,
        }
    }

    pub fn observe(&self, direction: Direction, chunk: &[u8]) {
        let mut pkt = SliceCursor::new(chunk);
        match self.capture {
            CaptureMode::Socket => {
                let tuple = match direction {
                    Direction::Request => self.client_tuple,
                    Direction::Response => self.client_tuple.flipped(),
                };
                self.dispatcher
                    .on_socket_packet(tuple, &PacketInfo::default(), &mut pkt);
            }
            CaptureMode::Library => self.dispatcher.on_library_call(self.client_tuple, &mut pkt),
        }
    }

    /// Signal that the connection is gone.
    pub fn close(&self) {
        match self.capture {
            CaptureMode::Socket => self.dispatcher.on_socket_packet(
                self.client_tuple,
                &PacketInfo::fin(),
                &mut SliceCursor::new(&[]),
            ),
            CaptureMode::Library => self.dispatcher.on_library_close(self.client_tuple),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Event, EventEmitter, EventReceiver, TransactionStore};

    fn probe(capture: CaptureMode) -> (Probe, Arc<Dispatcher>, EventReceiver) {
        let (emitter, receiver) = EventEmitter::channel();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransactionStore::new()), emitter));
        let tuple = ConnTuple::tcp(
            "127.0.0.1:51000".parse().unwrap(),
            "127.0.0.1:6379".parse().unwrap(),
        );
        (Probe::new(Arc::clone(&dispatcher), capture, tuple), dispatcher, receiver)
    }

    #[test]
    fn test_both_modes_correlate() {
        for capture in [CaptureMode::Socket, CaptureMode::Library] {
            let (probe, dispatcher, mut receiver) = probe(capture);

            probe.observe(Direction::Request, b"*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n");
            assert_eq!(dispatcher.store().len(), 1);

            probe.observe(Direction::Response, b"$5\r\nworld\r\n");
            let record = receiver.try_recv().unwrap();
            let event = Event::decode(&record).unwrap();
            assert_eq!(event.tx.key(), b"hello");
            assert_eq!(event.tuple.destination().port(), 6379);
        }
    }

    #[test]
    fn test_close_clears_pending() {
        for capture in [CaptureMode::Socket, CaptureMode::Library] {
            let (probe, dispatcher, _receiver) = probe(capture);
            probe.observe(Direction::Request, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
            assert_eq!(dispatcher.store().len(), 1);

            probe.close();
            assert!(dispatcher.store().is_empty());
            probe.close();
            assert!(dispatcher.store().is_empty());
        }
    }
}
