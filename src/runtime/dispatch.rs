//! Entry points that feed captured byte windows into the Redis decoder.
//!
//! A window either starts a new transaction (no entry pending for the
//! connection) or answers the pending one:
//!
//! ```text
//! IDLE --request decoded--> AWAITING_RESPONSE --response matches--> IDLE (+ event)
//!                                             --mismatch---------> IDLE
//! any state --termination--> IDLE
//! ```
//!
//! Every call is synchronous and processes exactly one window. Nothing that
//! fails to decode changes any state.

use crate::clock;
use crate::protocols::redis::{
    classify_response, decode_request, PacketCursor, Transaction, Verdict,
};
use crate::runtime::emitter::EventEmitter;
use crate::runtime::store::TransactionStore;
use crate::runtime::tuple::ConnTuple;
use std::sync::Arc;
use tracing::trace;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_RST: u8 = 0x04;

/// Transport metadata of a captured packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketInfo {
    pub tcp_flags: u8,
}

impl PacketInfo {
    /// Metadata of a segment closing the connection.
    pub fn fin() -> Self {
        Self { tcp_flags: TCP_FIN }
    }

    pub fn is_termination(&self) -> bool {
        self.tcp_flags & (TCP_FIN | TCP_RST) != 0
    }
}

/// Routes windows from any capture source to the decoder and classifier.
pub struct Dispatcher {
    store: Arc<TransactionStore>,
    emitter: EventEmitter,
}

impl Dispatcher {
    pub fn new(store: Arc<TransactionStore>, emitter: EventEmitter) -> Self {
        Self { store, emitter }
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// A packet captured at the socket layer.
    ///
    /// Socket captures see both directions, so the tuple is normalized before
    /// lookup. Termination packets only clear state.
    pub fn on_socket_packet<C: PacketCursor + ?Sized>(
        &self,
        tuple: ConnTuple,
        info: &PacketInfo,
        pkt: &mut C,
    ) {
        if info.is_termination() {
            self.terminate(tuple);
            return;
        }
        self.process(tuple.normalized(), pkt);
    }

    /// A read or write intercepted in an instrumented library (TLS plaintext).
    ///
    /// The library reports the tuple from its own side of the connection, the
    /// same for both directions, so it is used as given.
    pub fn on_library_call<C: PacketCursor + ?Sized>(&self, tuple: ConnTuple, pkt: &mut C) {
        self.process(tuple, pkt);
    }

    /// A connection close intercepted in an instrumented library.
    pub fn on_library_close(&self, tuple: ConnTuple) {
        self.terminate(tuple);
    }

    /// Clear pending state for both orientations of `tuple`.
    ///
    /// Safe to call repeatedly and for connections that never had a request.
    pub fn terminate(&self, tuple: ConnTuple) {
        let direct = self.store.delete(&tuple).is_some();
        let flipped = self.store.delete(&tuple.flipped()).is_some();
        trace!(%tuple, cleared = direct || flipped, "Connection terminated");
    }

    fn process<C: PacketCursor + ?Sized>(&self, tuple: ConnTuple, pkt: &mut C) {
        match self.store.lookup(&tuple) {
            None => self.process_request(tuple, pkt),
            Some(transaction) => self.process_response(tuple, transaction, pkt),
        }
    }

    fn process_request<C: PacketCursor + ?Sized>(&self, tuple: ConnTuple, pkt: &mut C) {
        if let Some(transaction) = decode_request(pkt) {
            trace!(%tuple, ?transaction, "Decoded request");
            self.store.upsert(tuple, transaction);
        }
    }

    fn process_response<C: PacketCursor + ?Sized>(
        &self,
        tuple: ConnTuple,
        mut transaction: Transaction,
        pkt: &mut C,
    ) {
        let Some(verdict) = classify_response(pkt, transaction.command) else {
            return;
        };

        match verdict {
            Verdict::Emit { is_error } => {
                transaction.is_error = is_error;
                transaction.response_last_seen = clock::now_ns();
                trace!(%tuple, ?transaction, "Response matched");
                self.emitter.emit(&tuple, &transaction);
            }
            Verdict::Drop => {
                trace!(%tuple, command = %transaction.command, "Response mismatch, dropping");
            }
        }
        self.store.delete(&tuple);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::redis::{Command, SliceCursor, MAX_KEY_LEN};
    use crate::runtime::emitter::EventReceiver;
    use crate::runtime::event::Event;

    const GET_FOO: &[u8] = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
    const SET_BAR: &[u8] = b"*3\r\n$3\r\nSET\r\n$3\r\nbar\r\n$3\r\nval\r\n";

    fn setup() -> (Dispatcher, EventReceiver) {
        let (emitter, receiver) = EventEmitter::channel();
        (Dispatcher::new(Arc::new(TransactionStore::new()), emitter), receiver)
    }

    fn client() -> ConnTuple {
        ConnTuple::tcp(
            "10.0.0.1:50000".parse().unwrap(),
            "10.0.0.2:6379".parse().unwrap(),
        )
    }

    fn socket(dispatcher: &Dispatcher, tuple: ConnTuple, data: &[u8]) {
        dispatcher.on_socket_packet(tuple, &PacketInfo::default(), &mut SliceCursor::new(data));
    }

    fn next_event(receiver: &mut EventReceiver) -> Option<Event> {
        receiver
            .try_recv()
            .ok()
            .map(|record| Event::decode(&record).unwrap())
    }

    #[test]
    fn test_get_round_trip() {
        let (dispatcher, mut receiver) = setup();

        socket(&dispatcher, client(), GET_FOO);
        let pending = dispatcher.store().lookup(&client()).unwrap();
        assert_eq!(pending.command, Command::Get);
        assert_eq!(pending.key(), b"foo");

        socket(&dispatcher, client().flipped(), b"$3\r\nbar\r\n");
        assert!(dispatcher.store().is_empty());

        let event = next_event(&mut receiver).unwrap();
        assert_eq!(event.tuple, client());
        assert_eq!(event.tx.command, Command::Get);
        assert_eq!(event.tx.key(), b"foo");
        assert!(!event.tx.is_error);
        assert!(event.tx.response_last_seen >= event.tx.request_started);
        assert!(next_event(&mut receiver).is_none());
    }

    #[test]
    fn test_set_round_trip() {
        let (dispatcher, mut receiver) = setup();
        socket(&dispatcher, client(), SET_BAR);
        socket(&dispatcher, client().flipped(), b"+OK\r\n");

        let event = next_event(&mut receiver).unwrap();
        assert_eq!(event.tx.command, Command::Set);
        assert_eq!(event.tx.key(), b"bar");
        assert!(dispatcher.store().is_empty());
    }

    #[test]
    fn test_error_response_is_emitted() {
        let (dispatcher, mut receiver) = setup();
        for request in [GET_FOO, SET_BAR] {
            socket(&dispatcher, client(), request);
            socket(&dispatcher, client().flipped(), b"-WRONGTYPE\r\n");
            let event = next_event(&mut receiver).unwrap();
            assert!(event.tx.is_error);
            assert!(dispatcher.store().is_empty());
        }
    }

    #[test]
    fn test_mismatch_is_dropped() {
        let (dispatcher, mut receiver) = setup();
        socket(&dispatcher, client(), GET_FOO);
        socket(&dispatcher, client().flipped(), b"+OK\r\n");

        assert!(dispatcher.store().is_empty());
        assert!(next_event(&mut receiver).is_none());
    }

    #[test]
    fn test_empty_response_window_keeps_pending() {
        let (dispatcher, mut receiver) = setup();
        socket(&dispatcher, client(), GET_FOO);
        socket(&dispatcher, client().flipped(), b"");

        assert!(dispatcher.store().lookup(&client()).is_some());
        assert!(next_event(&mut receiver).is_none());
    }

    #[test]
    fn test_invalid_request_leaves_store_untouched() {
        let (dispatcher, _receiver) = setup();
        for data in [
            &b"*1\r\n$3\r\nGET\r\n"[..],
            b"*6\r\n$3\r\nSET\r\n$3\r\nbar\r\n",
            b"*2\r\n$3\r\nGET\r\n$3\r\nfo",
            b"PING\r\n",
        ] {
            socket(&dispatcher, client(), data);
        }
        assert!(dispatcher.store().is_empty());
    }

    #[test]
    fn test_request_while_pending_is_classified() {
        let (dispatcher, mut receiver) = setup();
        let store = dispatcher.store();

        socket(&dispatcher, client(), GET_FOO);
        // A second request starts with '*', which does not answer a GET.
        socket(&dispatcher, client(), SET_BAR);
        assert!(store.is_empty());
        assert!(next_event(&mut receiver).is_none());

        socket(&dispatcher, client(), SET_BAR);
        assert_eq!(store.lookup(&client()).unwrap().command, Command::Set);
    }

    #[test]
    fn test_oversized_key_truncated() {
        let (dispatcher, mut receiver) = setup();
        let key = vec![b'k'; 999];
        let mut request = b"*2\r\n$3\r\nGET\r\n$999\r\n".to_vec();
        request.extend_from_slice(&key);
        request.extend_from_slice(b"\r\n");

        socket(&dispatcher, client(), &request);
        socket(&dispatcher, client().flipped(), b"$-1\r\n");

        let event = next_event(&mut receiver).unwrap();
        assert!(event.tx.truncated);
        assert_eq!(event.tx.key(), &key[..MAX_KEY_LEN - 1]);
    }

    #[test]
    fn test_termination_clears_both_orientations() {
        let (dispatcher, mut receiver) = setup();
        let store = dispatcher.store();

        socket(&dispatcher, client(), GET_FOO);
        assert_eq!(store.len(), 1);

        // A FIN seen from the server side still clears the client-keyed entry.
        dispatcher.on_socket_packet(
            client().flipped(),
            &PacketInfo::fin(),
            &mut SliceCursor::new(b"$3\r\nbar\r\n"),
        );
        assert!(store.is_empty());
        assert!(next_event(&mut receiver).is_none());

        // Idempotent.
        let rst = PacketInfo { tcp_flags: TCP_RST };
        dispatcher.on_socket_packet(client(), &rst, &mut SliceCursor::new(b""));
        dispatcher.on_library_close(client());
        assert!(store.is_empty());
    }

    #[test]
    fn test_library_calls_use_tuple_as_given() {
        let (dispatcher, mut receiver) = setup();
        let tuple = client();

        dispatcher.on_library_call(tuple, &mut SliceCursor::new(SET_BAR));
        assert!(dispatcher.store().lookup(&tuple).is_some());

        dispatcher.on_library_call(tuple, &mut SliceCursor::new(b"+OK\r\n"));
        let event = next_event(&mut receiver).unwrap();
        assert_eq!(event.tuple, tuple);
        assert_eq!(event.tx.key(), b"bar");

        dispatcher.on_library_call(tuple, &mut SliceCursor::new(GET_FOO));
        dispatcher.on_library_close(tuple);
        assert!(dispatcher.store().is_empty());
    }

    #[test]
    fn test_windows_inside_larger_buffer() {
        let (dispatcher, mut receiver) = setup();
        let mut packet = vec![0xAAu8; 40];
        packet.extend_from_slice(GET_FOO);
        let end = packet.len();
        packet.extend_from_slice(b"trailing");

        dispatcher.on_socket_packet(
            client(),
            &PacketInfo::default(),
            &mut SliceCursor::window(&packet, 40, end),
        );
        socket(&dispatcher, client().flipped(), b"$1\r\nx\r\n");
        assert_eq!(next_event(&mut receiver).unwrap().tx.key(), b"foo");
    }
}
