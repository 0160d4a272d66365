use std::collections::BTreeMap;

use parking_lot::RwLock;

use realm_store::{ByteReader, ByteWriter, EntityKind, Storable, StoreError, StoreResult};
use realm_types::{
    AddressHash, Color, ColoredBalance, RealityId, TransferHash, TransferOutputReference,
};

/// Result of recording a consumer on a transfer output.
///
/// The interesting case is [`SpendOutcome::ConflictDetected`]: the output has
/// exactly one earlier consumer, which makes this the moment the double-spend
/// is discovered. The earlier consumer (and transitively its descendant
/// spends) must be elevated into its own child reality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendOutcome {
    /// The consumer was already recorded; nothing changed.
    AlreadyRecorded,
    /// First consumer of this output; no conflict.
    FirstConsumer,
    /// Second consumer: the conflict is materialized now, and the listed
    /// prior consumers (transfer hash plus their output addresses) must be
    /// elevated.
    ConflictDetected(Vec<(TransferHash, Vec<AddressHash>)>),
    /// Third or later consumer: the conflict set already exists and the
    /// prior consumers already live in their own realities.
    ConflictKnown,
}

/// A transfer output: colored balances addressed to a recipient, owned by
/// exactly one reality.
///
/// Identity (producing transfer, address, balances) is frozen at creation.
/// Only the owning reality and the consumers map ever change: the owning
/// reality moves when the output is booked or elevated, and the consumers
/// map records every transfer that spent this output together with the
/// addresses of that transfer's own outputs (the handles needed to elevate
/// the spend chain later).
pub struct TransferOutput {
    reality_id: RwLock<RealityId>,
    transfer_hash: TransferHash,
    address_hash: AddressHash,
    balances: Vec<ColoredBalance>,
    consumers: RwLock<BTreeMap<TransferHash, Vec<AddressHash>>>,
}

impl TransferOutput {
    /// Create an output that has not been booked into any reality yet.
    pub fn new(
        transfer_hash: TransferHash,
        address_hash: AddressHash,
        balances: Vec<ColoredBalance>,
    ) -> Self {
        Self {
            reality_id: RwLock::new(RealityId::EMPTY),
            transfer_hash,
            address_hash,
            balances,
            consumers: RwLock::new(BTreeMap::new()),
        }
    }

    /// The reality currently owning this output.
    pub fn reality_id(&self) -> RealityId {
        *self.reality_id.read()
    }

    pub(crate) fn set_reality_id(&self, reality_id: RealityId) {
        *self.reality_id.write() = reality_id;
    }

    /// The transfer that produced this output.
    pub fn transfer_hash(&self) -> TransferHash {
        self.transfer_hash
    }

    /// The recipient address.
    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    /// The colored balances carried by this output.
    pub fn balances(&self) -> &[ColoredBalance] {
        &self.balances
    }

    /// Snapshot of the consumers map: consuming transfer hash to the
    /// addresses of that transfer's outputs.
    pub fn consumers(&self) -> BTreeMap<TransferHash, Vec<AddressHash>> {
        self.consumers.read().clone()
    }

    /// Returns `true` once at least one transfer has spent this output.
    pub fn is_spent(&self) -> bool {
        !self.consumers.read().is_empty()
    }

    /// The `(transfer hash, address)` reference addressing this output.
    pub fn reference(&self) -> TransferOutputReference {
        TransferOutputReference::new(self.transfer_hash, self.address_hash)
    }

    /// Record `consumer` as a spender of this output.
    ///
    /// `outputs` are the consuming transfer's own outputs; their addresses
    /// are remembered so a later conflict can locate and elevate the
    /// descendant spend chain.
    pub(crate) fn add_consumer(
        &self,
        consumer: TransferHash,
        outputs: &BTreeMap<AddressHash, Vec<ColoredBalance>>,
    ) -> SpendOutcome {
        let mut consumers = self.consumers.write();

        if consumers.contains_key(&consumer) {
            // Re-booking a transfer that is already recorded. If other
            // consumers exist too, the caller still has to link into the
            // existing conflict set.
            return if consumers.len() == 1 {
                SpendOutcome::AlreadyRecorded
            } else {
                SpendOutcome::ConflictKnown
            };
        }

        let outcome = match consumers.len() {
            0 => SpendOutcome::FirstConsumer,
            1 => SpendOutcome::ConflictDetected(
                consumers
                    .iter()
                    .map(|(hash, addresses)| (*hash, addresses.clone()))
                    .collect(),
            ),
            _ => SpendOutcome::ConflictKnown,
        };

        consumers.insert(consumer, outputs.keys().copied().collect());
        outcome
    }
}

impl Storable for TransferOutput {
    const KIND: EntityKind = EntityKind::TransferOutput;

    fn storage_key(&self) -> Vec<u8> {
        self.reference().storage_key()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let reality_id = self.reality_id.read();
        let consumers = self.consumers.read();

        let mut writer = ByteWriter::with_capacity(32 + 4 + self.balances.len() * 40);
        writer.put_bytes32(reality_id.as_bytes());

        writer.put_u32(self.balances.len() as u32);
        for balance in &self.balances {
            writer.put_bytes32(balance.color().as_bytes());
            writer.put_u64(balance.value());
        }

        writer.put_u32(consumers.len() as u32);
        for (hash, addresses) in consumers.iter() {
            writer.put_bytes32(hash.as_bytes());
            writer.put_u32(addresses.len() as u32);
            for address in addresses {
                writer.put_bytes32(address.as_bytes());
            }
        }

        writer.into_bytes()
    }

    fn from_bytes(key: &[u8], bytes: &[u8]) -> StoreResult<Self> {
        if key.len() != 64 {
            return Err(StoreError::Corrupt {
                bucket: Self::KIND.bucket(),
                reason: format!("key length {} instead of 64", key.len()),
            });
        }
        let transfer_hash = TransferHash::from_raw(key[..32].try_into().expect("32-byte slice"));
        let address_hash = AddressHash::from_raw(key[32..].try_into().expect("32-byte slice"));

        let mut reader = ByteReader::new(Self::KIND.bucket(), bytes);
        let reality_id = RealityId::from_raw(reader.take_bytes32()?);

        let balance_count = reader.take_u32()?;
        let mut balances = Vec::with_capacity(balance_count as usize);
        for _ in 0..balance_count {
            let color = Color::from_raw(reader.take_bytes32()?);
            let value = reader.take_u64()?;
            balances.push(ColoredBalance::new(color, value));
        }

        let consumer_count = reader.take_u32()?;
        let mut consumers = BTreeMap::new();
        for _ in 0..consumer_count {
            let hash = TransferHash::from_raw(reader.take_bytes32()?);
            let address_count = reader.take_u32()?;
            let mut addresses = Vec::with_capacity(address_count as usize);
            for _ in 0..address_count {
                addresses.push(AddressHash::from_raw(reader.take_bytes32()?));
            }
            consumers.insert(hash, addresses);
        }
        reader.expect_end()?;

        Ok(Self {
            reality_id: RwLock::new(reality_id),
            transfer_hash,
            address_hash,
            balances,
            consumers: RwLock::new(consumers),
        })
    }
}

impl std::fmt::Debug for TransferOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOutput")
            .field("reference", &self.reference())
            .field("reality_id", &self.reality_id())
            .field("balances", &self.balances)
            .field("consumers", &self.consumers.read().len())
            .finish()
    }
}
