use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use realm_store::{CachedEntity, CachedStore, StorageBackend, StoreError, StoreResult};
use realm_types::{
    AddressHash, ColoredBalance, ConflictId, RealityId, Transfer, TransferHash,
    TransferOutputReference,
};

use crate::booking::OutputBooking;
use crate::conflict::Conflict;
use crate::error::{LedgerError, LedgerResult};
use crate::output::TransferOutput;
use crate::reality::Reality;

/// The ledger state engine.
///
/// Holds the four entity stores (realities, conflict sets, transfer outputs,
/// and the secondary bookings index) over one storage backend, and offers
/// [`LedgerState::book_transfer`] as the booking entry point. The engine is
/// scoped, not global: collaborators receive it by reference.
///
/// On construction the permanent root reality [`RealityId::MAIN`] is created
/// if the backend does not know it yet.
pub struct LedgerState {
    realities: CachedStore<Reality>,
    conflicts: CachedStore<Conflict>,
    transfer_outputs: CachedStore<TransferOutput>,
    bookings: CachedStore<OutputBooking>,
}

impl LedgerState {
    /// Create an engine over the given backend, seeding the root reality.
    pub fn new(backend: Arc<dyn StorageBackend>) -> LedgerResult<Self> {
        let ledger = Self {
            realities: CachedStore::new(Arc::clone(&backend)),
            conflicts: CachedStore::new(Arc::clone(&backend)),
            transfer_outputs: CachedStore::new(Arc::clone(&backend)),
            bookings: CachedStore::new(backend),
        };
        if !ledger.realities.load(RealityId::MAIN.as_bytes())?.exists() {
            ledger
                .realities
                .store(Reality::new(RealityId::MAIN, []))?
                .release();
        }
        Ok(ledger)
    }

    pub(crate) fn realities(&self) -> &CachedStore<Reality> {
        &self.realities
    }

    pub(crate) fn conflicts(&self) -> &CachedStore<Conflict> {
        &self.conflicts
    }

    pub(crate) fn transfer_outputs(&self) -> &CachedStore<TransferOutput> {
        &self.transfer_outputs
    }

    pub(crate) fn bookings(&self) -> &CachedStore<OutputBooking> {
        &self.bookings
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Handle to the reality `id`.
    pub fn get_reality(&self, id: RealityId) -> StoreResult<CachedEntity<Reality>> {
        self.realities.load(id.as_bytes())
    }

    /// Handle to the conflict set `id`.
    pub fn get_conflict(&self, id: ConflictId) -> StoreResult<CachedEntity<Conflict>> {
        self.conflicts.load(id.as_bytes())
    }

    /// Handle to the referenced transfer output.
    pub fn get_transfer_output(
        &self,
        reference: &TransferOutputReference,
    ) -> StoreResult<CachedEntity<TransferOutput>> {
        self.transfer_outputs.load(&reference.storage_key())
    }

    /// References of the outputs booked in `reality_id`, filtered by spent
    /// status, via the secondary index.
    pub fn transfer_outputs_in_reality(
        &self,
        reality_id: RealityId,
        spent: bool,
    ) -> StoreResult<Vec<TransferOutputReference>> {
        Ok(self
            .bookings
            .scan_prefix(reality_id.as_bytes())?
            .into_iter()
            .filter(|booking| booking.spent() == spent)
            .map(|booking| booking.output_reference())
            .collect())
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Seed an unspent output directly into the root reality.
    ///
    /// The genesis path: later transfers spend such outputs like any other.
    pub fn add_transfer_output(
        &self,
        transfer_hash: TransferHash,
        address_hash: AddressHash,
        balances: Vec<ColoredBalance>,
    ) -> LedgerResult<()> {
        let cached = self.transfer_outputs.store(TransferOutput::new(
            transfer_hash,
            address_hash,
            balances,
        ))?;
        let main = self.get_reality(RealityId::MAIN)?;
        let main_reality = main
            .try_get()
            .ok_or_else(|| StoreError::not_found(RealityId::MAIN.as_bytes()))?;
        main_reality.book_transfer_output(self, cached.get())?;
        cached.release();
        Ok(())
    }

    /// Book `transfer` into the reality reachable from all of its inputs.
    ///
    /// The booking reality is resolved from the owning realities of the
    /// inputs: a single distinct reality is used as-is, several are combined
    /// through [`LedgerState::aggregate_realities`]. Booking then verifies,
    /// consumes the inputs, materializes any discovered conflicts, and books
    /// the outputs (see [`Reality::book_transfer`]).
    ///
    /// There is no rollback: a storage failure after inputs were consumed
    /// leaves those consumptions in place.
    pub fn book_transfer(&self, transfer: &Transfer) -> LedgerResult<()> {
        let mut input_realities: BTreeSet<RealityId> = BTreeSet::new();
        for reference in transfer.inputs() {
            let cached = self.get_transfer_output(reference)?;
            let output = cached
                .try_get()
                .ok_or(LedgerError::MissingInput(*reference))?;
            input_realities.insert(output.reality_id());
        }
        let ids: Vec<RealityId> = input_realities.into_iter().collect();

        let (booking_reality, created) = self.aggregate_realities_inner(&ids)?;
        let result = booking_reality.get().book_transfer(self, transfer);

        if result.is_err() && created && booking_reality.get().transfer_output_count() == 0 {
            // The aggregated reality was created for this booking and never
            // received an output; forget it again.
            self.realities.delete(booking_reality.key())?;
        }
        result
    }

    /// The canonical reality whose parent set is exactly the given ids,
    /// created on demand.
    ///
    /// Ids that are ancestors of other members are dropped first (their
    /// history is already covered); a single remaining id short-circuits to
    /// that reality. The aggregated id is a hash of the sorted parent ids,
    /// so the result is independent of argument order.
    pub fn aggregate_realities(&self, ids: &[RealityId]) -> LedgerResult<CachedEntity<Reality>> {
        Ok(self.aggregate_realities_inner(ids)?.0)
    }

    fn aggregate_realities_inner(
        &self,
        ids: &[RealityId],
    ) -> LedgerResult<(CachedEntity<Reality>, bool)> {
        let mut distinct: BTreeSet<RealityId> = ids.iter().copied().collect();
        if distinct.is_empty() {
            distinct.insert(RealityId::MAIN);
        }
        let members: Vec<RealityId> = distinct.into_iter().collect();

        let mut retained: Vec<RealityId> = Vec::new();
        'candidates: for candidate in &members {
            for other in &members {
                if other == candidate {
                    continue;
                }
                let cached = self.get_reality(*other)?;
                let other_reality = cached
                    .try_get()
                    .ok_or_else(|| StoreError::not_found(other.as_bytes()))?;
                if other_reality.descends_from(self, *candidate)? {
                    continue 'candidates;
                }
            }
            retained.push(*candidate);
        }

        if retained.len() == 1 {
            let id = retained[0];
            let cached = self.get_reality(id)?;
            if !cached.exists() {
                return Err(LedgerError::Store(StoreError::not_found(id.as_bytes())));
            }
            return Ok((cached, false));
        }

        let aggregated_id = RealityId::aggregate(retained.iter().copied());
        let existing = self.get_reality(aggregated_id)?;
        if existing.exists() {
            return Ok((existing, false));
        }

        debug!(
            reality = %aggregated_id.short_hex(),
            parents = retained.len(),
            "creating aggregated reality"
        );
        let cached = self.realities.store(Reality::new(aggregated_id, retained))?;
        Ok((cached, true))
    }

    /// Rewrite an output's booking from unspent to spent after its first
    /// consumer was recorded.
    pub(crate) fn mark_booking_spent(&self, output: &TransferOutput) -> StoreResult<()> {
        let reality_id = output.reality_id();
        self.bookings.delete(&OutputBooking::key_for(
            reality_id,
            output.address_hash(),
            false,
            output.transfer_hash(),
        ))?;
        self.bookings
            .store(OutputBooking::new(
                reality_id,
                output.address_hash(),
                true,
                output.transfer_hash(),
            ))?
            .release();
        Ok(())
    }

    /// Resolve the handles of a transfer's inputs, in input-list order.
    /// Missing outputs yield handles whose `exists()` is false.
    pub(crate) fn transfer_inputs(
        &self,
        transfer: &Transfer,
    ) -> StoreResult<Vec<CachedEntity<TransferOutput>>> {
        transfer
            .inputs()
            .iter()
            .map(|reference| self.get_transfer_output(reference))
            .collect()
    }
}

impl std::fmt::Debug for LedgerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerState")
            .field("realities", &self.realities)
            .field("conflicts", &self.conflicts)
            .field("transfer_outputs", &self.transfer_outputs)
            .field("bookings", &self.bookings)
            .finish()
    }
}
