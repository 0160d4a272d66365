use std::collections::BTreeSet;

use parking_lot::RwLock;

use realm_store::{ByteReader, ByteWriter, EntityKind, Storable, StoreError, StoreResult};
use realm_types::{ConflictId, RealityId};

/// The conflict set of one disputed transfer output.
///
/// Created lazily the moment a second consumer appears on an output; from
/// then on it accumulates the reality of every transfer spending the output.
/// Conflict sets are never destroyed.
pub struct Conflict {
    id: ConflictId,
    reality_ids: RwLock<BTreeSet<RealityId>>,
}

impl Conflict {
    /// Create an empty conflict set.
    pub fn new(id: ConflictId) -> Self {
        Self {
            id,
            reality_ids: RwLock::new(BTreeSet::new()),
        }
    }

    /// The derived conflict id.
    pub fn id(&self) -> ConflictId {
        self.id
    }

    /// Record that `reality_id` books one of the competing spends.
    /// Idempotent.
    pub fn add_reality(&self, reality_id: RealityId) {
        self.reality_ids.write().insert(reality_id);
    }

    /// Snapshot of the member realities.
    pub fn reality_ids(&self) -> BTreeSet<RealityId> {
        self.reality_ids.read().clone()
    }

    /// Returns `true` if `reality_id` is a member.
    pub fn contains_reality(&self, reality_id: RealityId) -> bool {
        self.reality_ids.read().contains(&reality_id)
    }
}

impl Storable for Conflict {
    const KIND: EntityKind = EntityKind::Conflict;

    fn storage_key(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let reality_ids = self.reality_ids.read();
        let mut writer = ByteWriter::with_capacity(4 + reality_ids.len() * 32);
        writer.put_u32(reality_ids.len() as u32);
        for id in reality_ids.iter() {
            writer.put_bytes32(id.as_bytes());
        }
        writer.into_bytes()
    }

    fn from_bytes(key: &[u8], bytes: &[u8]) -> StoreResult<Self> {
        if key.len() != 32 {
            return Err(StoreError::Corrupt {
                bucket: Self::KIND.bucket(),
                reason: format!("key length {} instead of 32", key.len()),
            });
        }
        let id = ConflictId::from_raw(key.try_into().expect("32-byte slice"));

        let mut reader = ByteReader::new(Self::KIND.bucket(), bytes);
        let count = reader.take_u32()?;
        let mut reality_ids = BTreeSet::new();
        for _ in 0..count {
            reality_ids.insert(RealityId::from_raw(reader.take_bytes32()?));
        }
        reader.expect_end()?;

        Ok(Self {
            id,
            reality_ids: RwLock::new(reality_ids),
        })
    }
}

impl std::fmt::Debug for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conflict")
            .field("id", &self.id)
            .field("realities", &self.reality_ids.read().len())
            .finish()
    }
}
