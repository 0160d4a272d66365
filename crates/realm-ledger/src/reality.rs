use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use realm_store::{ByteReader, ByteWriter, CachedEntity, EntityKind, Storable, StoreError, StoreResult};
use realm_types::{
    AddressHash, Color, ConflictId, RealityId, Transfer, TransferHash, TransferOutputReference,
};

use crate::booking::OutputBooking;
use crate::conflict::Conflict;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerState;
use crate::output::{SpendOutcome, TransferOutput};

/// A reality: one branch of history in the reality DAG.
///
/// Parents are held as ids only and resolved through the store; a reality
/// never owns another reality. The parent set is non-empty for every reality
/// except [`RealityId::MAIN`], and a reality with two or more parents is
/// *aggregated* — it represents the simultaneous truth of all its parents.
///
/// A reality counts the transfer outputs it directly owns. When the count of
/// a non-main reality drops to zero the reality is deleted from the store.
pub struct Reality {
    id: RealityId,
    parent_ids: RwLock<BTreeSet<RealityId>>,
    conflict_ids: RwLock<BTreeSet<ConflictId>>,
    transfer_output_count: AtomicU32,
}

impl Reality {
    pub(crate) fn new<I: IntoIterator<Item = RealityId>>(id: RealityId, parent_ids: I) -> Self {
        Self {
            id,
            parent_ids: RwLock::new(parent_ids.into_iter().collect()),
            conflict_ids: RwLock::new(BTreeSet::new()),
            transfer_output_count: AtomicU32::new(0),
        }
    }

    /// The reality id.
    pub fn id(&self) -> RealityId {
        self.id
    }

    /// Returns `true` for the permanent root reality.
    pub fn is_main(&self) -> bool {
        self.id.is_main()
    }

    /// Snapshot of the parent reality ids.
    pub fn parent_reality_ids(&self) -> BTreeSet<RealityId> {
        self.parent_ids.read().clone()
    }

    /// Returns `true` if this reality combines two or more parents.
    pub fn is_aggregated(&self) -> bool {
        self.parent_ids.read().len() >= 2
    }

    /// Number of transfer outputs directly owned by this reality.
    pub fn transfer_output_count(&self) -> u32 {
        self.transfer_output_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increase_transfer_output_count(&self) -> u32 {
        self.transfer_output_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn decrease_transfer_output_count(&self) -> u32 {
        self.transfer_output_count
            .fetch_sub(1, Ordering::SeqCst)
            .wrapping_sub(1)
    }

    /// Record participation in a conflict set. Idempotent.
    pub fn add_conflict_set(&self, conflict_id: ConflictId) {
        self.conflict_ids.write().insert(conflict_id);
    }

    /// Snapshot of the directly recorded conflict-set memberships.
    pub fn conflict_ids(&self) -> BTreeSet<ConflictId> {
        self.conflict_ids.read().clone()
    }

    /// Swap one parent for another. Used when a nested reality is re-rooted
    /// under a freshly elevated reality.
    pub(crate) fn replace_parent(&self, old_parent: RealityId, new_parent: RealityId) {
        let mut parents = self.parent_ids.write();
        parents.remove(&old_parent);
        parents.insert(new_parent);
    }

    // ---------------------------------------------------------------
    // Ancestry
    // ---------------------------------------------------------------

    /// Returns `true` if `reality_id` is this reality or one of its
    /// ancestors.
    ///
    /// Walks parent edges breadth-first through the store. Parent-set
    /// snapshots are taken before each resolution, so no reality lock is
    /// held across a store access.
    pub fn descends_from(&self, ledger: &LedgerState, reality_id: RealityId) -> LedgerResult<bool> {
        if self.id == reality_id {
            return Ok(true);
        }

        let mut visited: BTreeSet<RealityId> = BTreeSet::new();
        visited.insert(self.id);
        let mut queue: VecDeque<RealityId> = self.parent_reality_ids().into_iter().collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if current == reality_id {
                return Ok(true);
            }
            let cached = ledger.get_reality(current)?;
            let parent = cached
                .try_get()
                .ok_or_else(|| StoreError::not_found(current.as_bytes()))?;
            queue.extend(parent.parent_reality_ids());
        }

        Ok(false)
    }

    /// Handles to every ancestor up to the root. The caller releases them.
    pub fn ancestor_realities(
        &self,
        ledger: &LedgerState,
    ) -> LedgerResult<Vec<CachedEntity<Reality>>> {
        let mut visited: BTreeSet<RealityId> = BTreeSet::new();
        visited.insert(self.id);
        let mut result = Vec::new();
        let mut queue: VecDeque<RealityId> = self.parent_reality_ids().into_iter().collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let cached = ledger.get_reality(current)?;
            {
                let ancestor = cached
                    .try_get()
                    .ok_or_else(|| StoreError::not_found(current.as_bytes()))?;
                queue.extend(ancestor.parent_reality_ids());
            }
            result.push(cached);
        }

        Ok(result)
    }

    /// Conflict-set memberships including those inherited through ancestry.
    pub fn inherited_conflict_ids(&self, ledger: &LedgerState) -> LedgerResult<BTreeSet<ConflictId>> {
        let mut all = self.conflict_ids();
        for ancestor in self.ancestor_realities(ledger)? {
            all.extend(ancestor.get().conflict_ids());
            ancestor.release();
        }
        Ok(all)
    }

    /// Fetch or create the child reality `id` whose sole parent is this
    /// reality.
    pub fn create_reality(
        &self,
        ledger: &LedgerState,
        id: RealityId,
    ) -> StoreResult<CachedEntity<Reality>> {
        ledger.realities().store(Reality::new(id, [self.id]))
    }

    // ---------------------------------------------------------------
    // Booking
    // ---------------------------------------------------------------

    /// Book `transfer` relative to this reality.
    ///
    /// Verifies balance conservation and input reachability, marks the
    /// inputs consumed, materializes conflict sets for double spends
    /// (elevating the earlier spender's chain into its own child reality),
    /// and books the outputs — into a fresh child reality named after the
    /// transfer if any input turned out to be contested, into this reality
    /// otherwise.
    ///
    /// On error nothing is retried and already-consumed inputs are not
    /// rolled back; the caller decides whether to resubmit.
    pub fn book_transfer(&self, ledger: &LedgerState, transfer: &Transfer) -> LedgerResult<()> {
        let inputs = ledger.transfer_inputs(transfer)?;
        self.verify_transfer(ledger, transfer, &inputs)?;
        let conflicts = self.consume_inputs(ledger, transfer, &inputs)?;

        if conflicts.is_empty() {
            for (address, balances) in transfer.outputs() {
                let cached = ledger.transfer_outputs().store(TransferOutput::new(
                    transfer.hash(),
                    *address,
                    balances.clone(),
                ))?;
                self.book_transfer_output(ledger, cached.get())?;
                cached.release();
            }
            return Ok(());
        }

        let target_id = RealityId::from(transfer.hash());
        let cached_target = self.create_reality(ledger, target_id)?;
        let target = cached_target
            .try_get()
            .ok_or_else(|| StoreError::not_found(target_id.as_bytes()))?;

        for cached_conflict in &conflicts {
            let conflict = cached_conflict.get();
            conflict.add_reality(target_id);
            target.add_conflict_set(conflict.id());
            cached_conflict.store()?;
        }
        debug!(
            transfer = %transfer.hash().short_hex(),
            reality = %target_id.short_hex(),
            conflicts = conflicts.len(),
            "booking conflicting transfer into its own reality"
        );

        for (address, balances) in transfer.outputs() {
            let cached = ledger.transfer_outputs().store(TransferOutput::new(
                transfer.hash(),
                *address,
                balances.clone(),
            ))?;
            target.book_transfer_output(ledger, cached.get())?;
            cached.release();
        }
        cached_target.store()?;

        Ok(())
    }

    /// Check that every input exists, is reachable from this reality, and
    /// that per-color input and output totals cancel out.
    fn verify_transfer(
        &self,
        ledger: &LedgerState,
        transfer: &Transfer,
        inputs: &[CachedEntity<TransferOutput>],
    ) -> LedgerResult<()> {
        let mut totals: BTreeMap<Color, i128> = BTreeMap::new();

        for (reference, cached) in transfer.inputs().iter().zip(inputs) {
            let Some(input) = cached.try_get() else {
                return Err(LedgerError::MissingInput(*reference));
            };
            let owner = input.reality_id();
            if !self.descends_from(ledger, owner)? {
                return Err(LedgerError::InputNotInReality {
                    input: *reference,
                    owner,
                    booking: self.id,
                });
            }
            for balance in input.balances() {
                if balance.value() > 0 {
                    *totals.entry(balance.color()).or_default() += i128::from(balance.value());
                }
            }
        }

        for balances in transfer.outputs().values() {
            for balance in balances {
                let entry = totals.entry(balance.color()).or_default();
                *entry -= i128::from(balance.value());
                let settled = *entry == 0;
                if settled {
                    totals.remove(&balance.color());
                }
            }
        }

        if !totals.is_empty() {
            return Err(LedgerError::UnbalancedTransfer);
        }
        Ok(())
    }

    /// Mark every input consumed by `transfer`, in input-list order, and
    /// collect the conflict set of each input that turns out to be contested.
    fn consume_inputs(
        &self,
        ledger: &LedgerState,
        transfer: &Transfer,
        inputs: &[CachedEntity<TransferOutput>],
    ) -> LedgerResult<Vec<CachedEntity<Conflict>>> {
        let mut conflicts = Vec::new();

        for cached_input in inputs {
            let input = cached_input.get();
            match input.add_consumer(transfer.hash(), transfer.outputs()) {
                SpendOutcome::AlreadyRecorded => {}
                SpendOutcome::FirstConsumer => {
                    ledger.mark_booking_spent(input)?;
                }
                SpendOutcome::ConflictDetected(prior_consumers) => {
                    debug!(
                        input = %input.reference(),
                        transfer = %transfer.hash().short_hex(),
                        "double spend detected"
                    );
                    conflicts.push(self.materialize_conflict(ledger, input, prior_consumers)?);
                }
                SpendOutcome::ConflictKnown => {
                    let conflict_id =
                        ConflictId::derive(input.transfer_hash(), input.address_hash());
                    let cached = ledger.conflicts().load(conflict_id.as_bytes())?;
                    if !cached.exists() {
                        // A known conflict implies an earlier materialization;
                        // its absence means the store lost it.
                        return Err(LedgerError::Store(StoreError::not_found(
                            conflict_id.as_bytes(),
                        )));
                    }
                    conflicts.push(cached);
                }
            }
            cached_input.store()?;
        }

        Ok(conflicts)
    }

    /// First detection of a double spend on `input`: create its conflict set
    /// and move every prior consumer (with its descendant spend chain) into
    /// a child reality named after that consumer.
    fn materialize_conflict(
        &self,
        ledger: &LedgerState,
        input: &TransferOutput,
        prior_consumers: Vec<(TransferHash, Vec<AddressHash>)>,
    ) -> LedgerResult<CachedEntity<Conflict>> {
        let conflict_id = ConflictId::derive(input.transfer_hash(), input.address_hash());
        let cached_conflict = ledger.conflicts().store(Conflict::new(conflict_id))?;
        let conflict = cached_conflict.get();

        for (prior_hash, addresses) in prior_consumers {
            let elevated_id = RealityId::from(prior_hash);
            let cached_elevated = self.create_reality(ledger, elevated_id)?;
            let elevated = cached_elevated
                .try_get()
                .ok_or_else(|| StoreError::not_found(elevated_id.as_bytes()))?;

            conflict.add_reality(elevated_id);
            elevated.add_conflict_set(conflict_id);

            for address in addresses {
                self.elevate_transfer_output(
                    ledger,
                    &TransferOutputReference::new(prior_hash, address),
                    elevated,
                )?;
            }
            cached_elevated.store()?;
        }
        cached_conflict.store()?;

        Ok(cached_conflict)
    }

    /// Move the referenced output into `new_reality`.
    ///
    /// Outputs owned by this reality are rebooked directly and their
    /// descendant consumers elevated recursively. Outputs owned by an
    /// already-nested reality are handled by re-rooting that reality
    /// instead.
    fn elevate_transfer_output(
        &self,
        ledger: &LedgerState,
        reference: &TransferOutputReference,
        new_reality: &Reality,
    ) -> LedgerResult<()> {
        let cached = ledger.get_transfer_output(reference)?;
        let Some(output) = cached.try_get() else {
            return Err(LedgerError::Elevation(format!(
                "missing transfer output {reference}"
            )));
        };

        let owner = output.reality_id();
        if owner == new_reality.id() {
            // A repeat conflict on another input of the same consumer; the
            // chain already lives in the elevated reality.
            return Ok(());
        }

        if owner == self.id {
            self.elevate_output_of_current_reality(ledger, output, new_reality)?;
        } else {
            // The nested reality persists itself: it may have been deleted
            // by the elevation if the move emptied it.
            let nested_cached = ledger.get_reality(owner)?;
            let nested = nested_cached
                .try_get()
                .ok_or_else(|| StoreError::not_found(owner.as_bytes()))?;
            nested.elevate_output_of_nested_reality(ledger, output, self.id, new_reality.id())?;
        }
        cached.store()?;
        Ok(())
    }

    /// Rebook an output of this reality into `new_reality`, then elevate
    /// every descendant consumer, carrying `new_reality` down the chain.
    fn elevate_output_of_current_reality(
        &self,
        ledger: &LedgerState,
        output: &TransferOutput,
        new_reality: &Reality,
    ) -> LedgerResult<()> {
        new_reality.book_transfer_output(ledger, output)?;

        for (consumer_hash, addresses) in output.consumers() {
            for address in addresses {
                self.elevate_transfer_output(
                    ledger,
                    &TransferOutputReference::new(consumer_hash, address),
                    new_reality,
                )?;
            }
        }
        Ok(())
    }

    /// Re-root this (nested) reality from `old_parent_id` onto
    /// `new_parent_id`.
    ///
    /// A single-parent reality is reparented in place — its outputs ride
    /// along. An aggregated reality keeps its other parents: the replacement
    /// parent set is resolved to the canonical aggregated reality and the
    /// output is elevated into it.
    fn elevate_output_of_nested_reality(
        &self,
        ledger: &LedgerState,
        output: &TransferOutput,
        old_parent_id: RealityId,
        new_parent_id: RealityId,
    ) -> LedgerResult<()> {
        if !self.is_aggregated() {
            self.replace_parent(old_parent_id, new_parent_id);
            ledger.realities().persist(self)?;
            debug!(
                reality = %self.id.short_hex(),
                new_parent = %new_parent_id.short_hex(),
                "reparented nested reality"
            );
            return Ok(());
        }

        let mut replacement_parents = self.parent_reality_ids();
        replacement_parents.remove(&old_parent_id);
        replacement_parents.insert(new_parent_id);
        let parent_list: Vec<RealityId> = replacement_parents.into_iter().collect();

        let cached_aggregated = ledger.aggregate_realities(&parent_list)?;
        let aggregated = cached_aggregated
            .try_get()
            .ok_or_else(|| LedgerError::Elevation("aggregated reality did not resolve".into()))?;
        self.elevate_output_of_current_reality(ledger, output, aggregated)?;
        cached_aggregated.store()?;
        Ok(())
    }

    /// Place `output` into this reality.
    ///
    /// First placements assign the reality and count the output; moves
    /// additionally drop the old booking, release the old reality (deleting
    /// it when it empties, the root excepted), and write the new booking.
    /// Rebooking an output already owned by this reality changes nothing.
    pub(crate) fn book_transfer_output(
        &self,
        ledger: &LedgerState,
        output: &TransferOutput,
    ) -> LedgerResult<()> {
        let old_reality_id = output.reality_id();
        if old_reality_id == self.id {
            return Ok(());
        }

        let address = output.address_hash();
        let spent = output.is_spent();
        let transfer_hash = output.transfer_hash();

        if old_reality_id.is_empty() {
            output.set_reality_id(self.id);
            ledger.transfer_outputs().persist(output)?;
        } else {
            ledger.bookings().delete(&OutputBooking::key_for(
                old_reality_id,
                address,
                spent,
                transfer_hash,
            ))?;
            output.set_reality_id(self.id);

            let old_cached = ledger.get_reality(old_reality_id)?;
            let emptied = {
                let old_reality = old_cached
                    .try_get()
                    .ok_or_else(|| StoreError::not_found(old_reality_id.as_bytes()))?;
                old_reality.decrease_transfer_output_count() == 0 && !old_reality.is_main()
            };
            if emptied {
                debug!(reality = %old_reality_id.short_hex(), "deleting emptied reality");
                old_cached.delete()?;
            } else {
                old_cached.store()?;
            }

            ledger.transfer_outputs().persist(output)?;
        }

        ledger
            .bookings()
            .store(OutputBooking::new(self.id, address, spent, transfer_hash))?
            .release();
        self.increase_transfer_output_count();
        ledger.realities().persist(self)?;
        Ok(())
    }
}

impl Storable for Reality {
    const KIND: EntityKind = EntityKind::Reality;

    fn storage_key(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let parents = self.parent_ids.read();
        let conflicts = self.conflict_ids.read();

        let mut writer =
            ByteWriter::with_capacity(8 + (parents.len() + conflicts.len()) * 32 + 4);
        writer.put_u32(parents.len() as u32);
        for id in parents.iter() {
            writer.put_bytes32(id.as_bytes());
        }
        writer.put_u32(conflicts.len() as u32);
        for id in conflicts.iter() {
            writer.put_bytes32(id.as_bytes());
        }
        writer.put_u32(self.transfer_output_count.load(Ordering::SeqCst));
        writer.into_bytes()
    }

    fn from_bytes(key: &[u8], bytes: &[u8]) -> StoreResult<Self> {
        if key.len() != 32 {
            return Err(StoreError::Corrupt {
                bucket: Self::KIND.bucket(),
                reason: format!("key length {} instead of 32", key.len()),
            });
        }
        let id = RealityId::from_raw(key.try_into().expect("32-byte slice"));

        let mut reader = ByteReader::new(Self::KIND.bucket(), bytes);
        let parent_count = reader.take_u32()?;
        let mut parent_ids = BTreeSet::new();
        for _ in 0..parent_count {
            parent_ids.insert(RealityId::from_raw(reader.take_bytes32()?));
        }
        let conflict_count = reader.take_u32()?;
        let mut conflict_ids = BTreeSet::new();
        for _ in 0..conflict_count {
            conflict_ids.insert(ConflictId::from_raw(reader.take_bytes32()?));
        }
        let transfer_output_count = reader.take_u32()?;
        reader.expect_end()?;

        Ok(Self {
            id,
            parent_ids: RwLock::new(parent_ids),
            conflict_ids: RwLock::new(conflict_ids),
            transfer_output_count: AtomicU32::new(transfer_output_count),
        })
    }
}

impl std::fmt::Debug for Reality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reality")
            .field("id", &self.id)
            .field("parents", &self.parent_ids.read())
            .field("conflicts", &self.conflict_ids.read().len())
            .field("transfer_output_count", &self.transfer_output_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_store::MemoryBackend;
    use std::sync::Arc;

    fn rid(byte: u8) -> RealityId {
        RealityId::from_raw([byte; 32])
    }

    fn ledger() -> LedgerState {
        LedgerState::new(Arc::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn main_reality_has_no_parents() {
        let ledger = ledger();
        let main = ledger.get_reality(RealityId::MAIN).unwrap();
        assert!(main.exists());
        assert!(main.get().parent_reality_ids().is_empty());
        assert!(main.get().is_main());
        assert!(!main.get().is_aggregated());
    }

    #[test]
    fn create_reality_links_to_its_parent() {
        let ledger = ledger();
        let main = ledger.get_reality(RealityId::MAIN).unwrap();
        let child = main.get().create_reality(&ledger, rid(1)).unwrap();

        assert_eq!(child.get().id(), rid(1));
        assert_eq!(
            child.get().parent_reality_ids(),
            [RealityId::MAIN].into_iter().collect()
        );
    }

    #[test]
    fn descends_from_walks_the_chain() {
        let ledger = ledger();
        let main = ledger.get_reality(RealityId::MAIN).unwrap();
        let child = main.get().create_reality(&ledger, rid(1)).unwrap();
        let grandchild = child.get().create_reality(&ledger, rid(2)).unwrap();

        let reality = grandchild.get();
        assert!(reality.descends_from(&ledger, rid(2)).unwrap());
        assert!(reality.descends_from(&ledger, rid(1)).unwrap());
        assert!(reality.descends_from(&ledger, RealityId::MAIN).unwrap());
        assert!(!reality.descends_from(&ledger, rid(9)).unwrap());

        // Descent is directional.
        assert!(!main.get().descends_from(&ledger, rid(1)).unwrap());
    }

    #[test]
    fn ancestor_realities_reach_the_root() {
        let ledger = ledger();
        let main = ledger.get_reality(RealityId::MAIN).unwrap();
        let child = main.get().create_reality(&ledger, rid(1)).unwrap();
        let grandchild = child.get().create_reality(&ledger, rid(2)).unwrap();

        let ancestors = grandchild.get().ancestor_realities(&ledger).unwrap();
        let ids: BTreeSet<RealityId> = ancestors.iter().map(|a| a.get().id()).collect();
        assert_eq!(ids, [rid(1), RealityId::MAIN].into_iter().collect());
        for ancestor in ancestors {
            ancestor.release();
        }
    }

    #[test]
    fn descends_from_handles_diamond_ancestry() {
        let ledger = ledger();
        let main = ledger.get_reality(RealityId::MAIN).unwrap();
        main.get().create_reality(&ledger, rid(1)).unwrap().release();
        main.get().create_reality(&ledger, rid(2)).unwrap().release();
        let aggregated = ledger.aggregate_realities(&[rid(1), rid(2)]).unwrap();

        assert!(aggregated.get().is_aggregated());
        assert!(aggregated.get().descends_from(&ledger, rid(1)).unwrap());
        assert!(aggregated.get().descends_from(&ledger, rid(2)).unwrap());
        assert!(aggregated
            .get()
            .descends_from(&ledger, RealityId::MAIN)
            .unwrap());
    }

    #[test]
    fn descends_from_missing_parent_is_a_store_error() {
        let ledger = ledger();
        let orphan = ledger
            .realities()
            .store(Reality::new(rid(1), [rid(99)]))
            .unwrap();
        let err = orphan
            .get()
            .descends_from(&ledger, RealityId::MAIN)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::EntityNotFound(_))));
    }

    #[test]
    fn storage_roundtrip() {
        let reality = Reality::new(rid(3), [rid(1), rid(2)]);
        reality.add_conflict_set(ConflictId::from_raw([7u8; 32]));
        reality.increase_transfer_output_count();
        reality.increase_transfer_output_count();

        let decoded = Reality::from_bytes(&reality.storage_key(), &reality.to_bytes()).unwrap();
        assert_eq!(decoded.id(), rid(3));
        assert_eq!(decoded.parent_reality_ids(), reality.parent_reality_ids());
        assert_eq!(decoded.conflict_ids(), reality.conflict_ids());
        assert_eq!(decoded.transfer_output_count(), 2);
    }

    #[test]
    fn count_moves_both_ways() {
        let reality = Reality::new(rid(1), [RealityId::MAIN]);
        assert_eq!(reality.increase_transfer_output_count(), 1);
        assert_eq!(reality.increase_transfer_output_count(), 2);
        assert_eq!(reality.decrease_transfer_output_count(), 1);
        assert_eq!(reality.decrease_transfer_output_count(), 0);
    }
}
