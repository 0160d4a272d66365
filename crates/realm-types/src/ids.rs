use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

fn parse_hex_32(s: &str) -> Result<[u8; 32], TypeError> {
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(TypeError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ---------------------------------------------------------------------------
// TransferHash
// ---------------------------------------------------------------------------

/// Identifies a value transfer.
///
/// When a transfer turns out to double-spend an output, its hash doubles as
/// the id of the reality created for it (`RealityId::from(transfer_hash)`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferHash([u8; 32]);

impl TransferHash {
    /// Create a `TransferHash` from raw bytes.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_hex_32(s).map(Self)
    }
}

impl fmt::Debug for TransferHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferHash({})", self.short_hex())
    }
}

impl fmt::Display for TransferHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for TransferHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// RealityId
// ---------------------------------------------------------------------------

/// Identifies a reality: one branch of history in the reality DAG.
///
/// Two ids are distinguished: [`RealityId::MAIN`] (all zeros) is the permanent
/// root of the DAG, and [`RealityId::EMPTY`] (all `0xFF`) is the sentinel for
/// a transfer output that has not been booked into any reality yet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RealityId([u8; 32]);

impl RealityId {
    /// The root reality. Permanent; never deleted.
    pub const MAIN: Self = Self([0u8; 32]);

    /// Sentinel meaning "not assigned to any reality".
    pub const EMPTY: Self = Self([0xFFu8; 32]);

    /// Create a `RealityId` from raw bytes.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The canonical id of the aggregated reality whose parent set is exactly
    /// the given ids.
    ///
    /// The ids are deduplicated and sorted before hashing, so the result does
    /// not depend on argument order. Domain-separated BLAKE3, in the same way
    /// [`ConflictId::derive`] separates its inputs from other hashes.
    pub fn aggregate<I: IntoIterator<Item = RealityId>>(parent_ids: I) -> Self {
        let sorted: std::collections::BTreeSet<RealityId> = parent_ids.into_iter().collect();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"realm-aggregated-v1:");
        for id in sorted {
            hasher.update(id.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Returns `true` if this is the root reality.
    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }

    /// Returns `true` if this is the unassigned sentinel.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// The raw 32-byte id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_hex_32(s).map(Self)
    }
}

impl fmt::Debug for RealityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "RealityId(MAIN)")
        } else if self.is_empty() {
            write!(f, "RealityId(EMPTY)")
        } else {
            write!(f, "RealityId({})", self.short_hex())
        }
    }
}

impl fmt::Display for RealityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A conflicting transfer's hash is reused as the id of the reality created
/// for it.
impl From<TransferHash> for RealityId {
    fn from(hash: TransferHash) -> Self {
        Self(*hash.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// AddressHash
// ---------------------------------------------------------------------------

/// Identifies the recipient of a transfer output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressHash([u8; 32]);

impl AddressHash {
    /// Create an `AddressHash` from raw bytes.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_hex_32(s).map(Self)
    }
}

impl fmt::Debug for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressHash({})", self.short_hex())
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for AddressHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// ConflictId
// ---------------------------------------------------------------------------

/// Identifies the conflict set of one disputed transfer output.
///
/// A `ConflictId` is derived deterministically from the reference of the
/// contested output, so each output contributes at most one conflict set.
/// The same reference always produces the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictId([u8; 32]);

impl ConflictId {
    /// Derive the `ConflictId` for the output `(transfer_hash, address_hash)`.
    ///
    /// Domain-separated BLAKE3 over the concatenated reference, preventing
    /// collisions with any other id in the system.
    pub fn derive(transfer_hash: TransferHash, address_hash: AddressHash) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"realm-conflict-v1:");
        hasher.update(transfer_hash.as_bytes());
        hasher.update(address_hash.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a `ConflictId` from raw bytes. Use [`ConflictId::derive`] for
    /// production code.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32-byte id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConflictId({})", self.short_hex())
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_and_empty_are_distinct() {
        assert_ne!(RealityId::MAIN, RealityId::EMPTY);
        assert!(RealityId::MAIN.is_main());
        assert!(!RealityId::MAIN.is_empty());
        assert!(RealityId::EMPTY.is_empty());
        assert!(!RealityId::EMPTY.is_main());
    }

    #[test]
    fn transfer_hash_casts_to_reality_id() {
        let hash = TransferHash::from_raw([7u8; 32]);
        let reality_id = RealityId::from(hash);
        assert_eq!(reality_id.as_bytes(), hash.as_bytes());
    }

    #[test]
    fn conflict_id_is_deterministic() {
        let th = TransferHash::from_raw([1u8; 32]);
        let addr = AddressHash::from_raw([2u8; 32]);
        assert_eq!(ConflictId::derive(th, addr), ConflictId::derive(th, addr));
    }

    #[test]
    fn conflict_id_depends_on_both_inputs() {
        let th = TransferHash::from_raw([1u8; 32]);
        let a1 = AddressHash::from_raw([2u8; 32]);
        let a2 = AddressHash::from_raw([3u8; 32]);
        assert_ne!(ConflictId::derive(th, a1), ConflictId::derive(th, a2));

        let other = TransferHash::from_raw([4u8; 32]);
        assert_ne!(ConflictId::derive(th, a1), ConflictId::derive(other, a1));
    }

    #[test]
    fn aggregate_is_order_independent() {
        let a = RealityId::from_raw([1u8; 32]);
        let b = RealityId::from_raw([2u8; 32]);
        let c = RealityId::from_raw([3u8; 32]);
        assert_eq!(
            RealityId::aggregate([a, b, c]),
            RealityId::aggregate([c, a, b])
        );
    }

    #[test]
    fn aggregate_deduplicates() {
        let a = RealityId::from_raw([1u8; 32]);
        let b = RealityId::from_raw([2u8; 32]);
        assert_eq!(
            RealityId::aggregate([a, b, a]),
            RealityId::aggregate([a, b])
        );
    }

    #[test]
    fn aggregate_differs_from_members() {
        let a = RealityId::from_raw([1u8; 32]);
        let b = RealityId::from_raw([2u8; 32]);
        let agg = RealityId::aggregate([a, b]);
        assert_ne!(agg, a);
        assert_ne!(agg, b);
    }

    #[test]
    fn hex_roundtrip() {
        let id = RealityId::from_raw([0xAB; 32]);
        let parsed = RealityId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(matches!(
            TransferHash::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
        assert!(matches!(
            TransferHash::from_hex("abcd"),
            Err(TypeError::InvalidLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn debug_uses_short_form() {
        let hash = TransferHash::from_raw([0xCD; 32]);
        assert_eq!(format!("{hash:?}"), "TransferHash(cdcdcdcd)");
        assert_eq!(format!("{:?}", RealityId::MAIN), "RealityId(MAIN)");
        assert_eq!(format!("{:?}", RealityId::EMPTY), "RealityId(EMPTY)");
    }

    #[test]
    fn serde_roundtrip() {
        let id = ConflictId::derive(
            TransferHash::from_raw([9u8; 32]),
            AddressHash::from_raw([8u8; 32]),
        );
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ConflictId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
