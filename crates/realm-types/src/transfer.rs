use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::balance::ColoredBalance;
use crate::ids::{AddressHash, TransferHash};

/// Reference to one transfer output: the transfer that produced it and the
/// address it was sent to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferOutputReference {
    transfer_hash: TransferHash,
    address_hash: AddressHash,
}

impl TransferOutputReference {
    /// Create a reference to the output of `transfer_hash` at `address_hash`.
    pub const fn new(transfer_hash: TransferHash, address_hash: AddressHash) -> Self {
        Self {
            transfer_hash,
            address_hash,
        }
    }

    /// The transfer that produced the referenced output.
    pub fn transfer_hash(&self) -> TransferHash {
        self.transfer_hash
    }

    /// The address the referenced output was sent to.
    pub fn address_hash(&self) -> AddressHash {
        self.address_hash
    }

    /// The 64-byte storage key: transfer hash followed by address hash.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(self.transfer_hash.as_bytes());
        key.extend_from_slice(self.address_hash.as_bytes());
        key
    }
}

impl fmt::Debug for TransferOutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransferOutputReference({}:{})",
            self.transfer_hash.short_hex(),
            self.address_hash.short_hex()
        )
    }
}

impl fmt::Display for TransferOutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.transfer_hash.short_hex(),
            self.address_hash.short_hex()
        )
    }
}

/// A value transfer: a set of consumed inputs and the outputs they fund.
///
/// Inputs are ordered; the booking algorithm consumes them in list order so
/// that conflict detection is deterministic. Outputs are keyed by recipient
/// address, each carrying one or more colored balances.
///
/// Transfers arrive already authenticated and parsed; this type carries no
/// signatures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    hash: TransferHash,
    inputs: Vec<TransferOutputReference>,
    outputs: BTreeMap<AddressHash, Vec<ColoredBalance>>,
}

impl Transfer {
    /// Create an empty transfer with the given hash.
    pub fn new(hash: TransferHash) -> Self {
        Self {
            hash,
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Append an input reference. Inputs are consumed in insertion order.
    pub fn add_input(mut self, reference: TransferOutputReference) -> Self {
        self.inputs.push(reference);
        self
    }

    /// Add balances to the output for `address`.
    pub fn add_output(mut self, address: AddressHash, balances: Vec<ColoredBalance>) -> Self {
        self.outputs.entry(address).or_default().extend(balances);
        self
    }

    /// The transfer hash.
    pub fn hash(&self) -> TransferHash {
        self.hash
    }

    /// The ordered input references.
    pub fn inputs(&self) -> &[TransferOutputReference] {
        &self.inputs
    }

    /// The outputs, keyed by recipient address.
    pub fn outputs(&self) -> &BTreeMap<AddressHash, Vec<ColoredBalance>> {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn th(byte: u8) -> TransferHash {
        TransferHash::from_raw([byte; 32])
    }

    fn addr(byte: u8) -> AddressHash {
        AddressHash::from_raw([byte; 32])
    }

    #[test]
    fn reference_storage_key_is_concatenation() {
        let reference = TransferOutputReference::new(th(1), addr(2));
        let key = reference.storage_key();
        assert_eq!(key.len(), 64);
        assert_eq!(&key[..32], &[1u8; 32]);
        assert_eq!(&key[32..], &[2u8; 32]);
    }

    #[test]
    fn builder_collects_inputs_in_order() {
        let transfer = Transfer::new(th(9))
            .add_input(TransferOutputReference::new(th(1), addr(1)))
            .add_input(TransferOutputReference::new(th(2), addr(2)));
        assert_eq!(transfer.inputs().len(), 2);
        assert_eq!(transfer.inputs()[0].transfer_hash(), th(1));
        assert_eq!(transfer.inputs()[1].transfer_hash(), th(2));
    }

    #[test]
    fn builder_merges_outputs_per_address() {
        let transfer = Transfer::new(th(9))
            .add_output(addr(1), vec![ColoredBalance::uncolored(10)])
            .add_output(addr(1), vec![ColoredBalance::uncolored(5)])
            .add_output(addr(2), vec![ColoredBalance::uncolored(1)]);
        assert_eq!(transfer.outputs().len(), 2);
        assert_eq!(transfer.outputs()[&addr(1)].len(), 2);
    }

    #[test]
    fn reference_display() {
        let reference = TransferOutputReference::new(th(0xAB), addr(0xCD));
        assert_eq!(format!("{reference}"), "abababab:cdcdcdcd");
    }
}
