//! Event emission to the output channel.
//!
//! Each finalized transaction is encoded into a fixed-layout record and
//! pushed as one message. Records are staged in a per-thread slot of
//! `EVENT_SIZE` bytes: every worker thread owns its own, reused for each
//! event, so concurrent finalizations on different threads never share one.
//! The channel receives a copy of the staged bytes.

use crate::protocols::redis::Transaction;
use crate::runtime::event::{Event, EVENT_SIZE};
use crate::runtime::tuple::ConnTuple;
use bytes::Bytes;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

thread_local! {
    static STAGING: RefCell<[u8; EVENT_SIZE]> = const { RefCell::new([0u8; EVENT_SIZE]) };
}

/// Receiving end of the event channel. Each message is one encoded record.
pub type EventReceiver = mpsc::UnboundedReceiver<Bytes>;

/// Pushes encoded events to a single consumer.
pub struct EventEmitter {
    sender: mpsc::UnboundedSender<Bytes>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl EventEmitter {
    /// Create an emitter and the receiver its events are delivered to.
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let emitter = Self {
            sender,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (emitter, receiver)
    }

    /// Encode and push one event.
    ///
    /// Events are dropped (and counted) once the receiver is gone.
    pub fn emit(&self, tuple: &ConnTuple, tx: &Transaction) {
        let record = STAGING.with(|staging| {
            let mut staging = staging.borrow_mut();
            let mut slot = &mut staging[..];
            Event::encode_into(tuple, tx, &mut slot);
            Bytes::copy_from_slice(&staging[..])
        });

        if self.sender.send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(%tuple, "Event receiver closed, dropping event");
            return;
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Events delivered to the channel.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Events lost because the receiver was closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
