//! Claim persistence.
//!
//! Every backend implements [`ClaimBackend`]; callers hold a
//! `Box<dyn ClaimBackend>` picked at startup by [`open_backend`] and never see
//! the concrete type. Implementations:
//! - [`FileBackend`] - three JSON documents in a data folder
//! - [`DocumentBackend`] - records in a document store (PostgreSQL JSONB or
//!   in-memory)

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use landclaim_model::{
    BoundaryError, Claim, ClaimError, ClaimId, ClaimIndex, Collaborators, GroupBonusTable,
    PlayerData,
};
use thiserror::Error;

pub mod config;
pub mod document;
pub mod file;
pub mod migrate;
pub mod store;

pub use config::ConfigSection;
pub use document::{DocumentBackend, DocumentStore, MemoryDocumentStore, PostgresDocumentStore};
pub use file::FileBackend;
pub use migrate::{migrate, MigrationReport};
pub use store::DataStore;

/// Operations every storage backend provides. Each instance serializes its
/// calls behind one lock, so calls are observed in call order.
///
/// Failures while writing are logged by the backend and not returned;
/// failures while reading a single record skip that record.
pub trait ClaimBackend: Send + Sync {
    /// Load every top-level claim of `world` (with subdivisions) into
    /// `index`. Claims already indexed are left alone; a claim whose lesser
    /// corner is already covered by an indexed claim is deleted from storage.
    /// Returns the number of claims newly indexed.
    fn world_loaded(&self, world: &str, index: &mut ClaimIndex) -> usize;

    /// Persist a top-level claim and all of its subdivisions, assigning
    /// identifiers where missing.
    fn write_claim_to_storage(&self, claim: &mut Claim);

    /// Remove the claim's records and those of its subdivisions. The caller
    /// owns removal from the in-memory index.
    fn delete_claim_from_secondary_storage(&self, claim: &Claim);

    /// Read a player record, creating and persisting a default one if absent.
    fn get_player_data_from_storage(&self, player_name: &str) -> PlayerData;

    /// Persist a player record. An empty name (the administrative account) is
    /// ignored.
    fn save_player_data(&self, player_name: &str, data: &mut PlayerData);

    fn has_player_data(&self, player_name: &str) -> bool;

    /// Returns whether a record was removed.
    fn delete_player_data(&self, player_name: &str) -> bool;

    fn get_all_player_data(&self) -> Vec<PlayerData>;

    fn next_claim_id(&self) -> ClaimId;

    fn set_next_claim_id(&self, next: ClaimId);

    /// Same as `set_next_claim_id(next_claim_id() + 1)`, under one lock.
    fn increment_next_claim_id(&self);

    fn save_group_bonus_blocks(&self, group: &str, amount: i32);

    /// Sum of group bonuses over the groups the player holds right now.
    fn group_bonus_blocks(&self, player_name: &str) -> i32;

    /// Snapshot of the whole group bonus table.
    fn group_bonus_table(&self) -> GroupBonusTable;

    /// Flush and release files or connections.
    fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Postgres,
    /// Document backend over an in-memory store; nothing survives the process.
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file" | "files" | "json" => Ok(Self::File),
            "postgres" | "pg" | "database" | "db" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown storage backend {:?}", other),
        }
    }
}

/// Initialize the configured backend. Resolved settings are written to
/// `target`.
pub fn open_backend(
    kind: BackendKind,
    source: &ConfigSection,
    target: &mut ConfigSection,
    collaborators: Collaborators,
) -> Result<Box<dyn ClaimBackend>> {
    let backend: Box<dyn ClaimBackend> = match kind {
        BackendKind::File => Box::new(FileBackend::open(source, target, collaborators)?),
        BackendKind::Postgres => Box::new(DocumentBackend::connect(source, target, collaborators)?),
        BackendKind::Memory => {
            log::warn!("Using in-memory claim storage (data will be lost on exit!)");
            Box::new(DocumentBackend::open(
                Box::new(MemoryDocumentStore::new()),
                collaborators,
            )?)
        }
    };
    Ok(backend)
}

/// Why a single stored record could not be turned into a claim.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("no record for claim {0}")]
    Missing(ClaimId),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error("claim {claim} lists {child} as a child more than once or cyclically")]
    Cycle { claim: ClaimId, child: ClaimId },
}

impl RecordError {
    /// Records in worlds that are not loaded are skipped quietly.
    pub fn is_world_unavailable(&self) -> bool {
        matches!(self, RecordError::Boundary(BoundaryError::WorldUnavailable(_)))
    }
}

pub(crate) fn log_skipped(what: &str, err: &RecordError) {
    if err.is_world_unavailable() {
        log::debug!("Skipping {}: {}", what, err);
    } else {
        log::warn!("Unable to load {}: {}", what, err);
    }
}

/// Lock a backend's state. A panic while holding the lock leaves the data as
/// it was at the last completed write, so poisoning is ignored.
pub(crate) fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
