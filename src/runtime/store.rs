//! In-flight transaction store.
//!
//! Maps a connection tuple to its single pending transaction. The map is
//! split into shards, each behind its own lock, so every operation on one
//! key is atomic and operations on different connections rarely contend.

use crate::protocols::redis::Transaction;
use crate::runtime::tuple::ConnTuple;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Number of independently locked shards.
const SHARD_COUNT: usize = 16;

type Shard = RwLock<HashMap<ConnTuple, Transaction>>;

/// Thread-safe map from connection to pending transaction.
pub struct TransactionStore {
    shards: Vec<Shard>,
}

impl TransactionStore {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, tuple: &ConnTuple) -> &Shard {
        let mut hasher = DefaultHasher::new();
        tuple.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    // Entries are `Copy` values, a poisoned shard still holds a consistent map.
    fn read(shard: &Shard) -> RwLockReadGuard<'_, HashMap<ConnTuple, Transaction>> {
        shard.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(shard: &Shard) -> RwLockWriteGuard<'_, HashMap<ConnTuple, Transaction>> {
        shard.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace the pending transaction for `tuple`.
    pub fn upsert(&self, tuple: ConnTuple, transaction: Transaction) {
        let replaced = Self::write(self.shard(&tuple))
            .insert(tuple, transaction)
            .is_some();
        trace!(%tuple, replaced, "Stored pending transaction");
    }

    /// Copy of the pending transaction for `tuple`, if any.
    pub fn lookup(&self, tuple: &ConnTuple) -> Option<Transaction> {
        Self::read(self.shard(tuple)).get(tuple).copied()
    }

    /// Remove the pending transaction for `tuple`. Absent keys are a no-op.
    pub fn delete(&self, tuple: &ConnTuple) -> Option<Transaction> {
        Self::write(self.shard(tuple)).remove(tuple)
    }

    /// Number of pending transactions across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| Self::read(shard).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}
