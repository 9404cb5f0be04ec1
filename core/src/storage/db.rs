//! # TesseraDB — Persistent Storage Engine
//!
//! sled-backed implementation of [`DepositStore`]. All on-disk data flows
//! through this module.
//!
//! ## Tree Layout
//!
//! | Tree                      | Key                      | Value                  |
//! |---------------------------|--------------------------|------------------------|
//! | `deposits`                | deposit id               | `bincode(Deposit)`     |
//! | `deposits_by_tx`          | `tx_ref \0 deposit id`   | deposit id             |
//! | `deposits_by_wallet`      | `wallet \0 deposit id`   | deposit id             |
//! | `tx_claims`               | tx_ref                   | claiming deposit id    |
//! | `attestations`            | attestation id           | `bincode(Attestation)` |
//! | `attestations_by_wallet`  | `wallet \0 attest. id`   | attestation id         |
//! | `attestations_by_deposit` | deposit id               | attestation id         |
//!
//! Secondary indexes use a NUL separator so `scan_prefix("<value>\0")`
//! yields exactly the records for one wallet or tx ref.
//!
//! ## Atomicity
//!
//! Every uniqueness rule is a single-key `compare_and_swap`: the deposit
//! row, the tx-ref claim, the attestation-per-deposit slot, and the
//! processed flag transition. Index rows are written after the primary
//! row wins its CAS, so an index entry never points at a record that lost.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};

use super::DepositStore;
use crate::types::{Attestation, Deposit};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("deposit already processed: {0}")]
    AlreadyProcessed(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn index_key(owner: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + id.len() + 1);
    key.extend_from_slice(owner.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

fn index_prefix(owner: &str) -> Vec<u8> {
    let mut prefix = owner.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

// ---------------------------------------------------------------------------
// TesseraDB
// ---------------------------------------------------------------------------

/// Persistent storage for deposits and attestations.
///
/// sled trees support lock-free concurrent reads and serialized writes,
/// so a `TesseraDB` can be shared behind an `Arc` without extra locking.
#[derive(Debug, Clone)]
pub struct TesseraDB {
    db: Db,
    deposits: Tree,
    deposits_by_tx: Tree,
    deposits_by_wallet: Tree,
    tx_claims: Tree,
    attestations: Tree,
    attestations_by_wallet: Tree,
    attestations_by_deposit: Tree,
}

impl TesseraDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            deposits: db.open_tree("deposits")?,
            deposits_by_tx: db.open_tree("deposits_by_tx")?,
            deposits_by_wallet: db.open_tree("deposits_by_wallet")?,
            tx_claims: db.open_tree("tx_claims")?,
            attestations: db.open_tree("attestations")?,
            attestations_by_wallet: db.open_tree("attestations_by_wallet")?,
            attestations_by_deposit: db.open_tree("attestations_by_deposit")?,
            db,
        })
    }

    /// Loads every record from `primary` whose id is listed under `prefix`
    /// in `index`.
    fn scan_index<T: DeserializeOwned>(
        &self,
        index: &Tree,
        primary: &Tree,
        prefix: &str,
    ) -> DbResult<Vec<T>> {
        let mut out = Vec::new();
        for entry in index.scan_prefix(index_prefix(prefix)) {
            let (_key, id) = entry?;
            if let Some(bytes) = primary.get(&id)? {
                out.push(decode(&bytes)?);
            }
        }
        Ok(out)
    }

    // -- Utility operations -------------------------------------------------

    pub fn deposit_count(&self) -> usize {
        self.deposits.len()
    }

    pub fn attestation_count(&self) -> usize {
        self.attestations.len()
    }

    /// Deposits whose processed flag is set.
    pub fn processed_count(&self) -> DbResult<usize> {
        let mut count = 0;
        for entry in self.deposits.iter() {
            let (_key, bytes) = entry?;
            let deposit: Deposit = decode(&bytes)?;
            if deposit.processed {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Largest purely numeric token id among stored attestations, or 0.
    /// Lets a serial-issuing minter carry on after a restart.
    pub fn highest_serial_token_id(&self) -> DbResult<u64> {
        let mut highest = 0;
        for entry in self.attestations.iter() {
            let (_key, bytes) = entry?;
            let attestation: Attestation = decode(&bytes)?;
            if let Ok(serial) = attestation.token_id.parse::<u64>() {
                highest = highest.max(serial);
            }
        }
        Ok(highest)
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl DepositStore for TesseraDB {
    fn insert_deposit(&self, deposit: &Deposit) -> DbResult<bool> {
        let bytes = encode(deposit)?;
        let written = self
            .deposits
            .compare_and_swap(deposit.id.as_bytes(), None as Option<&[u8]>, Some(bytes))?
            .is_ok();
        if !written {
            return Ok(false);
        }

        self.deposits_by_tx
            .insert(index_key(&deposit.tx_ref, &deposit.id), deposit.id.as_bytes())?;
        self.deposits_by_wallet
            .insert(index_key(&deposit.wallet, &deposit.id), deposit.id.as_bytes())?;
        Ok(true)
    }

    fn get_deposit(&self, id: &str) -> DbResult<Option<Deposit>> {
        match self.deposits.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn mark_processed(&self, id: &str) -> DbResult<()> {
        loop {
            let current = self
                .deposits
                .get(id.as_bytes())?
                .ok_or_else(|| DbError::NotFound(id.to_string()))?;
            let mut deposit: Deposit = decode(&current)?;
            if deposit.processed {
                return Err(DbError::AlreadyProcessed(id.to_string()));
            }
            deposit.processed = true;
            let updated = encode(&deposit)?;

            // Lost the race to another writer: re-read and try again.
            if self
                .deposits
                .compare_and_swap(id.as_bytes(), Some(&current), Some(updated))?
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn deposits_by_wallet(&self, wallet: &str) -> DbResult<Vec<Deposit>> {
        let mut deposits: Vec<Deposit> =
            self.scan_index(&self.deposits_by_wallet, &self.deposits, wallet)?;
        deposits.sort_by_key(|d| d.created_at);
        Ok(deposits)
    }

    fn deposits_by_tx_ref(&self, tx_ref: &str) -> DbResult<Vec<Deposit>> {
        let mut deposits: Vec<Deposit> =
            self.scan_index(&self.deposits_by_tx, &self.deposits, tx_ref)?;
        deposits.sort_by_key(|d| d.created_at);
        Ok(deposits)
    }

    fn claim_tx_ref(&self, tx_ref: &str, deposit_id: &str) -> DbResult<bool> {
        let result = self.tx_claims.compare_and_swap(
            tx_ref.as_bytes(),
            None as Option<&[u8]>,
            Some(deposit_id.as_bytes()),
        )?;
        match result {
            Ok(()) => Ok(true),
            Err(conflict) => Ok(conflict
                .current
                .map(|holder| &holder[..] == deposit_id.as_bytes())
                .unwrap_or(false)),
        }
    }

    fn insert_attestation(&self, attestation: &Attestation) -> DbResult<bool> {
        let slot = self.attestations_by_deposit.compare_and_swap(
            attestation.deposit_id.as_bytes(),
            None as Option<&[u8]>,
            Some(attestation.id.as_bytes()),
        )?;
        if slot.is_err() {
            return Ok(false);
        }

        self.attestations
            .insert(attestation.id.as_bytes(), encode(attestation)?)?;
        self.attestations_by_wallet.insert(
            index_key(&attestation.recipient, &attestation.id),
            attestation.id.as_bytes(),
        )?;
        Ok(true)
    }

    fn get_attestation(&self, id: &str) -> DbResult<Option<Attestation>> {
        match self.attestations.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn attestations_by_wallet(&self, wallet: &str) -> DbResult<Vec<Attestation>> {
        let mut attestations: Vec<Attestation> =
            self.scan_index(&self.attestations_by_wallet, &self.attestations, wallet)?;
        attestations.sort_by_key(|a| a.minted_at);
        Ok(attestations)
    }

    fn attestation_for_deposit(&self, deposit_id: &str) -> DbResult<Option<Attestation>> {
        match self.attestations_by_deposit.get(deposit_id.as_bytes())? {
            Some(id) => match self.attestations.get(&id)? {
                Some(bytes) => Ok(Some(decode(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
