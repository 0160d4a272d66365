//! Reality-tracking ledger state for a DAG-based distributed ledger.
//!
//! This crate is the heart of realm. A value transfer may conflict with other
//! transfers by double-spending the same output; because the node cannot
//! resolve such conflicts on its own, every mutually exclusive history is
//! tracked simultaneously as a distinct *reality*. The crate provides:
//!
//! - [`TransferOutput`] — a consumable bundle of colored balances with its
//!   owning reality and the set of transfers that spent it
//! - [`Conflict`] — the set of realities each spending one disputed output
//!   differently
//! - [`Reality`] — a node in the reality DAG, rooted at [`RealityId::MAIN`]
//! - [`OutputBooking`] — the secondary index entry for enumeration by
//!   reality and spent status
//! - [`LedgerState`] — the coordinator holding the stores and offering
//!   [`LedgerState::book_transfer`]
//!
//! Booking a transfer verifies per-color balance conservation, marks its
//! inputs consumed, materializes conflicts when an output turns out to be
//! spent twice, and *elevates* the earlier spender's whole chain of
//! descendant outputs into a freshly created child reality.
//!
//! The engine never chooses a winning reality and never prunes; it only
//! keeps the branching bookkeeping consistent.
//!
//! [`RealityId::MAIN`]: realm_types::RealityId::MAIN

pub mod booking;
pub mod conflict;
pub mod error;
pub mod ledger;
pub mod output;
pub mod reality;

pub use booking::OutputBooking;
pub use conflict::Conflict;
pub use error::{LedgerError, LedgerResult};
pub use ledger::LedgerState;
pub use output::{SpendOutcome, TransferOutput};
pub use reality::Reality;
