use std::fmt;

use crate::error::StoreResult;

/// The kind of entity stored. Each kind maps to its own storage bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A branch of history in the reality DAG.
    Reality,
    /// The set of realities spending one disputed output.
    Conflict,
    /// A consumable bundle of colored balances.
    TransferOutput,
    /// A presence entry in the secondary bookings index.
    Booking,
}

impl EntityKind {
    pub(crate) const COUNT: usize = 4;

    /// The bucket name this kind persists under.
    pub const fn bucket(&self) -> &'static str {
        match self {
            Self::Reality => "realities",
            Self::Conflict => "conflicts",
            Self::TransferOutput => "transfer_outputs",
            Self::Booking => "bookings",
        }
    }

    pub(crate) const fn index(&self) -> usize {
        match self {
            Self::Reality => 0,
            Self::Conflict => 1,
            Self::TransferOutput => 2,
            Self::Booking => 3,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bucket())
    }
}

/// The encoding contract for storable entities.
///
/// An entity owns its storage key and encodes its value portion with the
/// fixed big-endian layout of the persistence format. Decoding receives both
/// the key and the value bytes, since some entities (the bookings index)
/// carry all their data in the key.
pub trait Storable: Sized + Send + Sync + 'static {
    /// The variant tag, selecting the storage bucket.
    const KIND: EntityKind;

    /// The storage key this entity persists under. Stable for the lifetime
    /// of the entity.
    fn storage_key(&self) -> Vec<u8>;

    /// Encode the value portion.
    fn to_bytes(&self) -> Vec<u8>;

    /// Decode an entity from its key and value bytes.
    fn from_bytes(key: &[u8], bytes: &[u8]) -> StoreResult<Self>;
}
