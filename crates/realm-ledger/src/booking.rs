use realm_store::{EntityKind, Storable, StoreError, StoreResult};
use realm_types::{AddressHash, RealityId, TransferHash, TransferOutputReference};

/// Secondary-index entry mirroring one transfer output's placement.
///
/// The key is `reality id ‖ address ‖ spent byte ‖ transfer hash`; the value
/// is empty — presence is the datum. The leading reality id makes
/// enumeration of a reality's outputs a prefix scan, with the spent flag
/// filtered out of the scanned keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputBooking {
    reality_id: RealityId,
    address_hash: AddressHash,
    spent: bool,
    transfer_hash: TransferHash,
}

/// Byte offset of the spent flag within a booking key.
const SPENT_OFFSET: usize = 64;
/// Total booking key length.
const KEY_LEN: usize = 97;

impl OutputBooking {
    /// Create a booking entry.
    pub fn new(
        reality_id: RealityId,
        address_hash: AddressHash,
        spent: bool,
        transfer_hash: TransferHash,
    ) -> Self {
        Self {
            reality_id,
            address_hash,
            spent,
            transfer_hash,
        }
    }

    /// Build the storage key for the given booking coordinates.
    pub fn key_for(
        reality_id: RealityId,
        address_hash: AddressHash,
        spent: bool,
        transfer_hash: TransferHash,
    ) -> Vec<u8> {
        let mut key = Vec::with_capacity(KEY_LEN);
        key.extend_from_slice(reality_id.as_bytes());
        key.extend_from_slice(address_hash.as_bytes());
        key.push(u8::from(spent));
        key.extend_from_slice(transfer_hash.as_bytes());
        key
    }

    /// The reality this booking places the output in.
    pub fn reality_id(&self) -> RealityId {
        self.reality_id
    }

    /// The recipient address of the booked output.
    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    /// Whether the booked output was spent when this entry was written.
    pub fn spent(&self) -> bool {
        self.spent
    }

    /// The transfer that produced the booked output.
    pub fn transfer_hash(&self) -> TransferHash {
        self.transfer_hash
    }

    /// The reference of the booked output.
    pub fn output_reference(&self) -> TransferOutputReference {
        TransferOutputReference::new(self.transfer_hash, self.address_hash)
    }
}

impl Storable for OutputBooking {
    const KIND: EntityKind = EntityKind::Booking;

    fn storage_key(&self) -> Vec<u8> {
        Self::key_for(
            self.reality_id,
            self.address_hash,
            self.spent,
            self.transfer_hash,
        )
    }

    fn to_bytes(&self) -> Vec<u8> {
        Vec::new()
    }

    fn from_bytes(key: &[u8], _bytes: &[u8]) -> StoreResult<Self> {
        if key.len() != KEY_LEN {
            return Err(StoreError::Corrupt {
                bucket: Self::KIND.bucket(),
                reason: format!("key length {} instead of {KEY_LEN}", key.len()),
            });
        }
        let spent = match key[SPENT_OFFSET] {
            0 => false,
            1 => true,
            other => {
                return Err(StoreError::Corrupt {
                    bucket: Self::KIND.bucket(),
                    reason: format!("spent byte {other} is neither 0 nor 1"),
                })
            }
        };
        Ok(Self {
            reality_id: RealityId::from_raw(key[..32].try_into().expect("32-byte slice")),
            address_hash: AddressHash::from_raw(key[32..64].try_into().expect("32-byte slice")),
            spent,
            transfer_hash: TransferHash::from_raw(
                key[SPENT_OFFSET + 1..].try_into().expect("32-byte slice"),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> OutputBooking {
        OutputBooking::new(
            RealityId::from_raw([1u8; 32]),
            AddressHash::from_raw([2u8; 32]),
            true,
            TransferHash::from_raw([3u8; 32]),
        )
    }

    #[test]
    fn key_layout() {
        let key = booking().storage_key();
        assert_eq!(key.len(), KEY_LEN);
        assert_eq!(&key[..32], &[1u8; 32]);
        assert_eq!(&key[32..64], &[2u8; 32]);
        assert_eq!(key[SPENT_OFFSET], 1);
        assert_eq!(&key[65..], &[3u8; 32]);
    }

    #[test]
    fn value_is_empty() {
        assert!(booking().to_bytes().is_empty());
    }

    #[test]
    fn decodes_entirely_from_the_key() {
        let original = booking();
        let decoded = OutputBooking::from_bytes(&original.storage_key(), &[]).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_malformed_spent_byte() {
        let mut key = booking().storage_key();
        key[SPENT_OFFSET] = 9;
        let err = OutputBooking::from_bytes(&key, &[]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn spent_and_unspent_keys_differ() {
        let reality = RealityId::from_raw([1u8; 32]);
        let address = AddressHash::from_raw([2u8; 32]);
        let hash = TransferHash::from_raw([3u8; 32]);
        assert_ne!(
            OutputBooking::key_for(reality, address, false, hash),
            OutputBooking::key_for(reality, address, true, hash)
        );
    }
}
