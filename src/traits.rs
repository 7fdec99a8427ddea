//! Traits for storage abstraction and external collaborators

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// A set of match mutations for one movement, applied atomically by the storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchChangeSet {
    pub movement_id: String,
    /// Document ids whose link to `movement_id` is removed
    pub remove: Vec<String>,
    /// New links to insert
    pub add: Vec<Match>,
}

impl MatchChangeSet {
    pub fn new(movement_id: impl Into<String>) -> Self {
        Self {
            movement_id: movement_id.into(),
            remove: Vec::new(),
            add: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Storage abstraction for the reconciliation engine
///
/// Movements and documents are written by the import collaborators and only
/// read by the engine. Matches are written exclusively through
/// [`ReconciliationStorage::apply_match_changes`], which implementations must
/// execute as a single transaction: either every removal and insertion in the
/// change set takes effect, or none does.
#[async_trait]
pub trait ReconciliationStorage: Send + Sync {
    /// Save a movement to storage
    async fn save_movement(&self, movement: &Movement) -> ReconciliationResult<()>;

    /// Get a movement by ID
    async fn get_movement(&self, movement_id: &str) -> ReconciliationResult<Option<Movement>>;

    /// List all movements of a tenant, ordered by date then id
    async fn list_movements(&self, tenant_id: &str) -> ReconciliationResult<Vec<Movement>>;

    /// Save a document to storage
    async fn save_document(&self, document: &Document) -> ReconciliationResult<()>;

    /// Get a document by ID
    async fn get_document(&self, document_id: &str) -> ReconciliationResult<Option<Document>>;

    /// Get every document whose id is in `document_ids`; unknown ids are skipped
    async fn get_documents(&self, document_ids: &[String]) -> ReconciliationResult<Vec<Document>>;

    /// List all documents of a tenant, ordered by date then id
    async fn list_documents(&self, tenant_id: &str) -> ReconciliationResult<Vec<Document>>;

    /// Matches of a movement ordered by creation time
    async fn get_matches(&self, movement_id: &str) -> ReconciliationResult<Vec<Match>>;

    /// The active match referencing a document, if any
    async fn find_document_match(&self, document_id: &str)
        -> ReconciliationResult<Option<Match>>;

    /// All active matches of a tenant
    async fn list_matches(&self, tenant_id: &str) -> ReconciliationResult<Vec<Match>>;

    /// Apply removals and insertions for one movement in a single transaction.
    ///
    /// Must fail with `MatchNotFound` if a removed link does not exist and with
    /// `DocumentAlreadyMatched` if an inserted document is still linked to any
    /// movement after the removals. The uniqueness check happens inside the same
    /// critical section as the insert. Returns the inserted matches with their
    /// sequence numbers assigned.
    async fn apply_match_changes(&self, changes: MatchChangeSet)
        -> ReconciliationResult<Vec<Match>>;

    /// Record a posting; fails with `AlreadyPosted` if one exists for the movement
    async fn record_posting(&self, posting: &Posting) -> ReconciliationResult<()>;

    /// Get the posting of a movement, if any
    async fn get_posting(&self, movement_id: &str) -> ReconciliationResult<Option<Posting>>;
}

/// Hook for a period-close collaborator
pub trait PeriodGuard: Send + Sync {
    /// Reject mutations on a movement that belongs to a closed accounting period
    fn ensure_open(&self, movement: &Movement) -> ReconciliationResult<()>;
}

/// Period guard that treats every period as open
pub struct OpenPeriods;

impl PeriodGuard for OpenPeriods {
    fn ensure_open(&self, _movement: &Movement) -> ReconciliationResult<()> {
        Ok(())
    }
}

/// Ledger collaborator notified when a movement is posted
pub trait PostingListener: Send + Sync {
    fn movement_posted(&self, posting: &Posting);
}

/// Posting listener that ignores events
pub struct NoopPostingListener;

impl PostingListener for NoopPostingListener {
    fn movement_posted(&self, _posting: &Posting) {}
}
