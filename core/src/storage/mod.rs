//! # Storage Module
//!
//! Persistence for deposits and attestations.
//!
//! ```text
//! mod.rs — DepositStore trait, the only seam the pipeline talks through
//! db.rs  — TesseraDB, the sled-backed implementation
//! ```
//!
//! ## Guarantees
//!
//! The trait carries the atomic primitives the pipeline relies on when
//! events arrive concurrently:
//!
//! 1. **Insert-if-absent deposits.** Re-delivering an id never overwrites
//!    the stored record (and so never resets its processed flag).
//! 2. **Transaction-ref claims.** The first deposit to claim a tx ref owns
//!    it; everyone else is a duplicate.
//! 3. **Compare-and-swap processed flag.** `false -> true` exactly once.
//! 4. **One attestation per deposit.** A second insert for the same
//!    deposit is refused.

pub mod db;

use crate::types::{Attestation, Deposit};

pub use db::{DbError, DbResult, TesseraDB};

/// Storage operations used by the pipeline, minter and API.
///
/// List queries return records in creation order (deposits by
/// `created_at`, attestations by `minted_at`).
pub trait DepositStore: Send + Sync + std::fmt::Debug {
    /// Stores `deposit` unless its id is already present. Returns whether
    /// the record was written.
    fn insert_deposit(&self, deposit: &Deposit) -> DbResult<bool>;

    fn get_deposit(&self, id: &str) -> DbResult<Option<Deposit>>;

    /// Flips the processed flag. Fails with [`DbError::NotFound`] for an
    /// unknown id and [`DbError::AlreadyProcessed`] if it is already set.
    fn mark_processed(&self, id: &str) -> DbResult<()>;

    fn deposits_by_wallet(&self, wallet: &str) -> DbResult<Vec<Deposit>>;

    fn deposits_by_tx_ref(&self, tx_ref: &str) -> DbResult<Vec<Deposit>>;

    /// Atomically claims `tx_ref` for `deposit_id`. Returns `true` if the
    /// claim is new or already held by the same deposit.
    fn claim_tx_ref(&self, tx_ref: &str, deposit_id: &str) -> DbResult<bool>;

    /// Stores an attestation. Returns `false` without writing if the
    /// deposit already has one.
    fn insert_attestation(&self, attestation: &Attestation) -> DbResult<bool>;

    fn get_attestation(&self, id: &str) -> DbResult<Option<Attestation>>;

    fn attestations_by_wallet(&self, wallet: &str) -> DbResult<Vec<Attestation>>;

    fn attestation_for_deposit(&self, deposit_id: &str) -> DbResult<Option<Attestation>>;
}
