use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::backend::StorageBackend;
use crate::entity::Storable;
use crate::error::StoreResult;
use crate::handle::CachedEntity;

pub(crate) struct StoreShared<T: Storable> {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) cache: RwLock<HashMap<Vec<u8>, Arc<T>>>,
}

/// A typed, reference-counted cache over one storage bucket.
///
/// All access to entities of type `T` flows through this store. The cache
/// guarantees that concurrent stores and loads of the same key observe the
/// same in-memory object; entity mutation is serialized by the entities'
/// interior locks, and persistence is explicit via [`CachedEntity::store`]
/// or [`CachedEntity::consume`].
pub struct CachedStore<T: Storable> {
    shared: Arc<StoreShared<T>>,
}

impl<T: Storable> Clone for CachedStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Storable> CachedStore<T> {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                backend,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Insert an entity and return a handle to it.
    ///
    /// If an entity with the same key is already cached, the *existing*
    /// in-memory object is returned and the argument is dropped — concurrent
    /// stores of one key always converge on a single shared object. The
    /// cached state is persisted to the backend before returning.
    pub fn store(&self, entity: T) -> StoreResult<CachedEntity<T>> {
        let key = entity.storage_key();
        let value = {
            let mut cache = self.shared.cache.write();
            match cache.entry(key.clone()) {
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
                Entry::Vacant(vacant) => Arc::clone(vacant.insert(Arc::new(entity))),
            }
        };
        self.shared.backend.put(T::KIND, &key, &value.to_bytes())?;
        trace!(bucket = %T::KIND.bucket(), key = %hex::encode(&key[..key.len().min(4)]), "stored entity");
        Ok(CachedEntity::new(key, Some(value), Arc::clone(&self.shared)))
    }

    /// Load the entity under `key`.
    ///
    /// Cache hits return the shared in-memory object. Misses fall through to
    /// the backend; a key absent there yields a handle whose
    /// [`CachedEntity::exists`] is `false`.
    pub fn load(&self, key: &[u8]) -> StoreResult<CachedEntity<T>> {
        if let Some(value) = self.shared.cache.read().get(key) {
            return Ok(CachedEntity::new(
                key.to_vec(),
                Some(Arc::clone(value)),
                Arc::clone(&self.shared),
            ));
        }

        let Some(bytes) = self.shared.backend.get(T::KIND, key)? else {
            return Ok(CachedEntity::new(
                key.to_vec(),
                None,
                Arc::clone(&self.shared),
            ));
        };

        let decoded = Arc::new(T::from_bytes(key, &bytes)?);
        let value = {
            let mut cache = self.shared.cache.write();
            match cache.entry(key.to_vec()) {
                // Another thread decoded the same entity first; use its copy.
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
                Entry::Vacant(vacant) => Arc::clone(vacant.insert(decoded)),
            }
        };
        Ok(CachedEntity::new(
            key.to_vec(),
            Some(value),
            Arc::clone(&self.shared),
        ))
    }

    /// Remove the entity under `key` from the cache and the backend.
    ///
    /// Handles that are still held keep their reference alive; only the
    /// store forgets the entity. Returns `true` if the key was present in
    /// the backend.
    pub fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        self.shared.cache.write().remove(key);
        let existed = self.shared.backend.delete(T::KIND, key)?;
        trace!(bucket = %T::KIND.bucket(), key = %hex::encode(&key[..key.len().min(4)]), existed, "deleted entity");
        Ok(existed)
    }

    /// Persist the current state of a cache-resident entity.
    pub fn persist(&self, entity: &T) -> StoreResult<()> {
        self.shared
            .backend
            .put(T::KIND, &entity.storage_key(), &entity.to_bytes())
    }

    /// Decode every persisted entity whose key starts with `prefix`, in key
    /// order. Bypasses the cache; intended for index enumeration.
    pub fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<T>> {
        self.shared
            .backend
            .scan_prefix(T::KIND, prefix)?
            .into_iter()
            .map(|(key, value)| T::from_bytes(&key, &value))
            .collect()
    }
}

impl<T: Storable> std::fmt::Debug for CachedStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("bucket", &T::KIND.bucket())
            .field("cached", &self.shared.cache.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::codec::{ByteReader, ByteWriter};
    use crate::entity::EntityKind;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        id: [u8; 32],
        value: AtomicU64,
    }

    impl Counter {
        fn new(id_byte: u8, value: u64) -> Self {
            Self {
                id: [id_byte; 32],
                value: AtomicU64::new(value),
            }
        }
    }

    impl Storable for Counter {
        const KIND: EntityKind = EntityKind::Reality;

        fn storage_key(&self) -> Vec<u8> {
            self.id.to_vec()
        }

        fn to_bytes(&self) -> Vec<u8> {
            let mut writer = ByteWriter::new();
            writer.put_u64(self.value.load(Ordering::SeqCst));
            writer.into_bytes()
        }

        fn from_bytes(key: &[u8], bytes: &[u8]) -> StoreResult<Self> {
            let id = key.try_into().map_err(|_| StoreError::Corrupt {
                bucket: Self::KIND.bucket(),
                reason: format!("bad key length {}", key.len()),
            })?;
            let mut reader = ByteReader::new(Self::KIND.bucket(), bytes);
            let value = reader.take_u64()?;
            reader.expect_end()?;
            Ok(Self {
                id,
                value: AtomicU64::new(value),
            })
        }
    }

    fn new_store() -> CachedStore<Counter> {
        CachedStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn store_then_load_shares_the_object() {
        let store = new_store();
        let stored = store.store(Counter::new(1, 10)).unwrap();
        let loaded = store.load(&[1u8; 32]).unwrap();

        // Mutations through one handle are visible through the other.
        stored.get().value.store(99, Ordering::SeqCst);
        assert_eq!(loaded.get().value.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn store_of_existing_key_returns_the_cached_object() {
        let store = new_store();
        let first = store.store(Counter::new(1, 10)).unwrap();
        let second = store.store(Counter::new(1, 555)).unwrap();
        // The second entity was dropped; the cached value survives.
        assert_eq!(second.get().value.load(Ordering::SeqCst), 10);
        assert_eq!(first.get().value.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn load_missing_does_not_exist() {
        let store = new_store();
        let handle = store.load(&[9u8; 32]).unwrap();
        assert!(!handle.exists());
        assert!(handle.try_get().is_none());
    }

    #[test]
    fn load_falls_through_to_the_backend() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        {
            let store: CachedStore<Counter> = CachedStore::new(Arc::clone(&backend));
            store.store(Counter::new(2, 42)).unwrap();
        }
        // Fresh cache over the same backend.
        let store: CachedStore<Counter> = CachedStore::new(backend);
        let handle = store.load(&[2u8; 32]).unwrap();
        assert!(handle.exists());
        assert_eq!(handle.get().value.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn handle_store_persists_mutations() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store: CachedStore<Counter> = CachedStore::new(Arc::clone(&backend));
        let handle = store.store(Counter::new(3, 1)).unwrap();

        handle.get().value.store(7, Ordering::SeqCst);
        handle.store().unwrap();

        let raw = backend.get(EntityKind::Reality, &[3u8; 32]).unwrap().unwrap();
        assert_eq!(raw, 7u64.to_be_bytes().to_vec());
    }

    #[test]
    fn consume_applies_then_persists() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let store: CachedStore<Counter> = CachedStore::new(Arc::clone(&backend));
        let handle = store.store(Counter::new(4, 0)).unwrap();

        let seen = handle
            .consume(|counter| {
                counter.value.store(12, Ordering::SeqCst);
                counter.value.load(Ordering::SeqCst)
            })
            .unwrap();
        assert_eq!(seen, Some(12));

        let raw = backend.get(EntityKind::Reality, &[4u8; 32]).unwrap().unwrap();
        assert_eq!(raw, 12u64.to_be_bytes().to_vec());
    }

    #[test]
    fn consume_of_missing_entity_is_a_noop() {
        let store = new_store();
        let handle = store.load(&[8u8; 32]).unwrap();
        let seen = handle.consume(|_| 1).unwrap();
        assert_eq!(seen, None);
    }

    #[test]
    fn delete_keeps_held_handles_alive() {
        let store = new_store();
        let handle = store.store(Counter::new(5, 5)).unwrap();

        assert!(store.delete(&[5u8; 32]).unwrap());
        // The held handle still dereferences.
        assert_eq!(handle.get().value.load(Ordering::SeqCst), 5);
        // But a fresh load sees nothing.
        assert!(!store.load(&[5u8; 32]).unwrap().exists());
    }

    #[test]
    fn scan_prefix_decodes_persisted_entities() {
        let store = new_store();
        store.store(Counter::new(1, 10)).unwrap();
        store.store(Counter::new(2, 20)).unwrap();

        let all = store.scan_prefix(&[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].value.load(Ordering::SeqCst), 10);
        assert_eq!(all[1].value.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn concurrent_stores_of_one_key_converge() {
        use std::thread;

        let store = new_store();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let handle = store.store(Counter::new(7, 0)).unwrap();
                    handle.get().value.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        // Every thread incremented the same shared object.
        let handle = store.load(&[7u8; 32]).unwrap();
        assert_eq!(handle.get().value.load(Ordering::SeqCst), 8);
    }
}
