use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::entity::EntityKind;
use crate::error::StoreResult;

/// Bucket-addressed raw key/value persistence.
///
/// The engine talks to storage exclusively through this trait; durability is
/// the backend's concern. Implementations must provide:
/// - atomic single-key get/put/delete per bucket,
/// - ordered prefix scans (the bookings index relies on them),
/// - safe concurrent access from multiple threads.
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    fn get(&self, bucket: EntityKind, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value.
    fn put(&self, bucket: EntityKind, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove the value under `key`. Returns `true` if it existed.
    fn delete(&self, bucket: EntityKind, key: &[u8]) -> StoreResult<bool>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, bucket: EntityKind, prefix: &[u8])
        -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory backend: one ordered map per bucket behind a read-write lock.
///
/// The persistence seam for tests and embedding.
#[derive(Default)]
pub struct MemoryBackend {
    buckets: [RwLock<BTreeMap<Vec<u8>, Vec<u8>>>; EntityKind::COUNT],
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the given bucket.
    pub fn len(&self, bucket: EntityKind) -> usize {
        self.buckets[bucket.index()].read().len()
    }

    /// Returns `true` if the given bucket holds no keys.
    pub fn is_empty(&self, bucket: EntityKind) -> bool {
        self.buckets[bucket.index()].read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, bucket: EntityKind, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.buckets[bucket.index()].read().get(key).cloned())
    }

    fn put(&self, bucket: EntityKind, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.buckets[bucket.index()]
            .write()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: EntityKind, key: &[u8]) -> StoreResult<bool> {
        Ok(self.buckets[bucket.index()].write().remove(key).is_some())
    }

    fn scan_prefix(
        &self,
        bucket: EntityKind,
        prefix: &[u8],
    ) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.buckets[bucket.index()].read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("realities", &self.len(EntityKind::Reality))
            .field("conflicts", &self.len(EntityKind::Conflict))
            .field("transfer_outputs", &self.len(EntityKind::TransferOutput))
            .field("bookings", &self.len(EntityKind::Booking))
            .finish()
    }
}
