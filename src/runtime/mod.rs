//! Correlation runtime shared by every capture source.
//!
//! - `ConnTuple`: connection identity, with normalization and flipping
//! - `TransactionStore`: at most one pending transaction per connection
//! - `EventEmitter`: per-thread staged, fixed-layout event records
//! - `Dispatcher`: socket and instrumented-library entry points

pub mod dispatch;
pub mod emitter;
pub mod event;
pub mod store;
pub mod tuple;

pub use dispatch::{Dispatcher, PacketInfo};
pub use emitter::{EventEmitter, EventReceiver};
pub use event::{Event, EventDecodeError, EVENT_SIZE};
pub use store::TransactionStore;
pub use tuple::{ConnTuple, Transport};
