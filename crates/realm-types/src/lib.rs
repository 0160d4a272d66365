//! Foundation types for the realm ledger state engine.
//!
//! This crate provides the identifier, balance, and transfer types used
//! throughout the realm system. Every other realm crate depends on
//! `realm-types`.
//!
//! # Key Types
//!
//! - [`TransferHash`] — Identifies a value transfer
//! - [`RealityId`] — Identifies a branch of history ([`RealityId::MAIN`] is the root)
//! - [`AddressHash`] — Identifies the recipient of a transfer output
//! - [`ConflictId`] — Derived identifier of a disputed output (BLAKE3)
//! - [`Color`] / [`ColoredBalance`] — Per-color value accounting
//! - [`Transfer`] / [`TransferOutputReference`] — The booking input types

pub mod balance;
pub mod error;
pub mod ids;
pub mod transfer;

pub use balance::{Color, ColoredBalance};
pub use error::TypeError;
pub use ids::{AddressHash, ConflictId, RealityId, TransferHash};
pub use transfer::{Transfer, TransferOutputReference};
