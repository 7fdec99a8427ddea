//! Match store: the movement/document association and its invariants

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::reconciliation::status::{derive, Derivation};
use crate::traits::*;
use crate::types::*;

/// Links added and removed by [`MatchStore::replace_matches`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDiff {
    pub added: Vec<Match>,
    pub removed: Vec<Match>,
}

impl MatchDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

type LockKey = (String, String);

/// Registry of per-tenant, per-movement locks
#[derive(Debug, Clone, Default)]
struct MovementLocks {
    inner: Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>,
}

impl MovementLocks {
    async fn acquire(
        &self,
        tenant_id: &str,
        movement_id: &str,
    ) -> ReconciliationResult<MovementLock> {
        let key = (tenant_id.to_string(), movement_id.to_string());
        let mutex = {
            let mut map = self.inner.lock().map_err(|_| {
                ReconciliationError::Storage("movement lock registry poisoned".to_string())
            })?;
            map.entry(key.clone()).or_default().clone()
        };

        let guard = mutex.lock_owned().await;
        Ok(MovementLock {
            guard: Some(guard),
            key,
            locks: self.clone(),
        })
    }

    /// Drop the registry entry once nobody holds or waits for it
    fn release(&self, key: &LockKey) {
        if let Ok(mut map) = self.inner.lock() {
            if map.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
                map.remove(key);
            }
        }
    }
}

/// Held for the duration of one mutating operation on a movement
struct MovementLock {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: MovementLocks,
}

impl Drop for MovementLock {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.key);
    }
}

/// Sole writer of the match relation
///
/// Every mutating method runs under the movement's lock and validates the
/// complete change before handing it to the storage as one transaction.
#[derive(Clone)]
pub struct MatchStore<S: ReconciliationStorage> {
    pub(crate) storage: S,
    locks: MovementLocks,
}

impl<S: ReconciliationStorage> MatchStore<S> {
    /// Create a new match store over the given storage backend
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            locks: MovementLocks::default(),
        }
    }

    /// Link one document to a movement.
    ///
    /// Linking a document that is already linked to the same movement returns
    /// the existing match.
    pub async fn create_match(
        &self,
        movement_id: &str,
        document_id: &str,
    ) -> ReconciliationResult<Match> {
        let movement = self.get_movement_required(movement_id).await?;
        let _lock = self.locks.acquire(&movement.tenant_id, movement_id).await?;

        self.get_document_checked(&movement, document_id).await?;
        if let Some(existing) = self.storage.find_document_match(document_id).await? {
            if existing.movement_id == movement.id {
                return Ok(existing);
            }
            return Err(ReconciliationError::DocumentAlreadyMatched {
                document_id: document_id.to_string(),
                movement_id: existing.movement_id,
            });
        }

        let mut changes = MatchChangeSet::new(movement_id);
        changes.add.push(Match::new(
            movement.tenant_id.clone(),
            movement.id.clone(),
            document_id.to_string(),
        ));
        let mut inserted = self.storage.apply_match_changes(changes).await?;
        let created = inserted.pop().ok_or_else(|| {
            ReconciliationError::Storage("storage returned no inserted match".to_string())
        })?;

        info!(
            movement_id = %movement.id,
            document_id = %document_id,
            match_id = %created.id,
            "Match created"
        );
        self.log_derivation(&movement).await;

        Ok(created)
    }

    /// Link a group of documents to a movement, all or nothing.
    ///
    /// Duplicate ids and documents already linked to this movement are skipped.
    /// Returns only the newly created matches.
    pub async fn create_matches(
        &self,
        movement_id: &str,
        document_ids: &[String],
    ) -> ReconciliationResult<Vec<Match>> {
        let movement = self.get_movement_required(movement_id).await?;
        let _lock = self.locks.acquire(&movement.tenant_id, movement_id).await?;

        let requested = dedup_ids(document_ids);
        let current: HashSet<String> = self
            .storage
            .get_matches(movement_id)
            .await?
            .into_iter()
            .map(|m| m.document_id)
            .collect();

        let new_ids: Vec<String> = requested
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();
        self.validate_new_documents(&movement, &new_ids).await?;

        let mut changes = MatchChangeSet::new(movement_id);
        changes.add = new_ids
            .iter()
            .map(|id| Match::new(movement.tenant_id.clone(), movement.id.clone(), id.clone()))
            .collect();

        let created = if changes.is_empty() {
            Vec::new()
        } else {
            self.storage.apply_match_changes(changes).await?
        };

        info!(
            movement_id = %movement.id,
            created = created.len(),
            "Match group created"
        );
        self.log_derivation(&movement).await;

        Ok(created)
    }

    /// Remove the link between a movement and a document
    pub async fn remove_match(
        &self,
        movement_id: &str,
        document_id: &str,
    ) -> ReconciliationResult<()> {
        let movement = self.get_movement_required(movement_id).await?;
        let _lock = self.locks.acquire(&movement.tenant_id, movement_id).await?;

        let mut changes = MatchChangeSet::new(movement_id);
        changes.remove.push(document_id.to_string());
        self.storage.apply_match_changes(changes).await?;

        info!(
            movement_id = %movement.id,
            document_id = %document_id,
            "Match removed"
        );
        self.log_derivation(&movement).await;

        Ok(())
    }

    /// Make the set of documents linked to a movement exactly `document_ids`.
    ///
    /// Stale links are removed and new ones created in a single transaction.
    /// If any new document is unknown, belongs to another tenant or is linked
    /// elsewhere, nothing changes.
    pub async fn replace_matches(
        &self,
        movement_id: &str,
        document_ids: &[String],
    ) -> ReconciliationResult<MatchDiff> {
        let movement = self.get_movement_required(movement_id).await?;
        let _lock = self.locks.acquire(&movement.tenant_id, movement_id).await?;

        let requested = dedup_ids(document_ids);
        let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();
        let current = self.storage.get_matches(movement_id).await?;
        let current_set: HashSet<&str> = current.iter().map(|m| m.document_id.as_str()).collect();

        let removed: Vec<Match> = current
            .iter()
            .filter(|m| !requested_set.contains(m.document_id.as_str()))
            .cloned()
            .collect();
        let new_ids: Vec<String> = requested
            .iter()
            .filter(|id| !current_set.contains(id.as_str()))
            .cloned()
            .collect();

        self.validate_new_documents(&movement, &new_ids).await?;

        let mut changes = MatchChangeSet::new(movement_id);
        changes.remove = removed.iter().map(|m| m.document_id.clone()).collect();
        changes.add = new_ids
            .iter()
            .map(|id| Match::new(movement.tenant_id.clone(), movement.id.clone(), id.clone()))
            .collect();

        let diff = if changes.is_empty() {
            MatchDiff::default()
        } else {
            let added = self.storage.apply_match_changes(changes).await?;
            MatchDiff { added, removed }
        };

        info!(
            movement_id = %movement.id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "Matches replaced"
        );
        self.log_derivation(&movement).await;

        Ok(diff)
    }

    /// Matches of a movement ordered by creation time
    pub async fn matches_for(&self, movement_id: &str) -> ReconciliationResult<Vec<Match>> {
        self.get_movement_required(movement_id).await?;
        self.storage.get_matches(movement_id).await
    }

    /// Current derivation of a movement
    pub async fn derive_status(&self, movement_id: &str) -> ReconciliationResult<Derivation> {
        let movement = self.get_movement_required(movement_id).await?;
        self.derive_for(&movement).await
    }

    pub(crate) async fn derive_for(&self, movement: &Movement) -> ReconciliationResult<Derivation> {
        let matches = self.storage.get_matches(&movement.id).await?;
        let document_ids: Vec<String> = matches.iter().map(|m| m.document_id.clone()).collect();
        let documents = self.storage.get_documents(&document_ids).await?;
        Ok(derive(movement, &matches, &documents))
    }

    /// Get a movement by ID, returning an error if not found
    pub async fn get_movement_required(&self, movement_id: &str) -> ReconciliationResult<Movement> {
        self.storage
            .get_movement(movement_id)
            .await?
            .ok_or_else(|| ReconciliationError::movement_not_found(movement_id))
    }

    /// Get a document and check that it can be linked to `movement`
    pub(crate) async fn get_document_checked(
        &self,
        movement: &Movement,
        document_id: &str,
    ) -> ReconciliationResult<Document> {
        let document = self
            .storage
            .get_document(document_id)
            .await?
            .ok_or_else(|| ReconciliationError::document_not_found(document_id))?;

        if document.tenant_id != movement.tenant_id {
            return Err(ReconciliationError::CrossTenantMismatch {
                movement_id: movement.id.clone(),
                document_id: document.id.clone(),
                movement_tenant: movement.tenant_id.clone(),
                document_tenant: document.tenant_id.clone(),
            });
        }

        Ok(document)
    }

    /// Check every document that is about to be linked to `movement`
    async fn validate_new_documents(
        &self,
        movement: &Movement,
        document_ids: &[String],
    ) -> ReconciliationResult<()> {
        for document_id in document_ids {
            self.get_document_checked(movement, document_id).await?;
        }

        for document_id in document_ids {
            if let Some(existing) = self.storage.find_document_match(document_id).await? {
                if existing.movement_id != movement.id {
                    return Err(ReconciliationError::DocumentAlreadyMatched {
                        document_id: document_id.clone(),
                        movement_id: existing.movement_id,
                    });
                }
            }
        }

        Ok(())
    }

    /// Runs after commit, so a failed read is logged and never returned
    async fn log_derivation(&self, movement: &Movement) {
        match self.derive_for(movement).await {
            Ok(derivation) => debug!(
                movement_id = %movement.id,
                status = %derivation.status,
                pending_amount = %derivation.pending_amount,
                "Reconciliation status derived"
            ),
            Err(err) => warn!(
                movement_id = %movement.id,
                error = %err,
                "Could not derive status after committing match changes"
            ),
        }
    }
}

/// Remove duplicate ids, keeping the first occurrence
pub(crate) fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::utils::memory_storage::MemoryStorage;
    use chrono::NaiveDate;

    async fn seeded_store() -> MatchStore<MemoryStorage> {
        let storage = MemoryStorage::new();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();

        for (id, tenant) in [("m1", "acme"), ("m2", "acme"), ("m3", "globex")] {
            let movement = Movement::new(
                id.to_string(),
                tenant.to_string(),
                date,
                "SANTANDER".to_string(),
                Amount::new(0),
                Amount::new(100_000),
            );
            storage.save_movement(&movement).await.unwrap();
        }

        for (id, tenant, debit) in [
            ("d1", "acme", 60_000),
            ("d2", "acme", 40_000),
            ("d3", "acme", 25_000),
            ("x1", "globex", 10_000),
        ] {
            let document = Document::new(
                id.to_string(),
                tenant.to_string(),
                date,
                DocumentKind::SalesInvoice,
                "76.000.000-0".to_string(),
                "Cliente".to_string(),
                id.to_uppercase(),
                Amount::new(debit),
                Amount::new(0),
            );
            storage.save_document(&document).await.unwrap();
        }

        MatchStore::new(storage)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn linked(matches: &[Match]) -> Vec<&str> {
        matches.iter().map(|m| m.document_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_match_rejects_unknown_ids() {
        let store = seeded_store().await;

        let missing_movement = store.create_match("nope", "d1").await;
        assert!(matches!(
            missing_movement,
            Err(ReconciliationError::NotFound {
                entity: EntityKind::Movement,
                ..
            })
        ));

        let missing_document = store.create_match("m1", "nope").await;
        assert!(matches!(
            missing_document,
            Err(ReconciliationError::NotFound {
                entity: EntityKind::Document,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_create_match_rejects_cross_tenant() {
        let store = seeded_store().await;

        let result = store.create_match("m1", "x1").await;
        match result {
            Err(ReconciliationError::CrossTenantMismatch {
                movement_tenant,
                document_tenant,
                ..
            }) => {
                assert_eq!(movement_tenant, "acme");
                assert_eq!(document_tenant, "globex");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_match_is_idempotent_for_same_movement() {
        let store = seeded_store().await;

        let first = store.create_match("m1", "d1").await.unwrap();
        let second = store.create_match("m1", "d1").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.matches_for("m1").await.unwrap().len(), 1);

        let elsewhere = store.create_match("m2", "d1").await;
        assert!(matches!(
            elsewhere,
            Err(ReconciliationError::DocumentAlreadyMatched { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_match() {
        let store = seeded_store().await;
        store.create_match("m1", "d1").await.unwrap();

        store.remove_match("m1", "d1").await.unwrap();
        assert!(store.matches_for("m1").await.unwrap().is_empty());

        let again = store.remove_match("m1", "d1").await;
        assert!(matches!(
            again,
            Err(ReconciliationError::MatchNotFound { .. })
        ));

        // The document itself is still available
        assert!(store.storage.get_document("d1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_matches_diffs_current_set() {
        let store = seeded_store().await;
        store
            .create_matches("m1", &ids(&["d1", "d2"]))
            .await
            .unwrap();

        let diff = store
            .replace_matches("m1", &ids(&["d2", "d3"]))
            .await
            .unwrap();
        assert_eq!(linked(&diff.added), vec!["d3"]);
        assert_eq!(linked(&diff.removed), vec!["d1"]);

        let matches = store.matches_for("m1").await.unwrap();
        assert_eq!(linked(&matches), vec!["d2", "d3"]);
    }

    #[tokio::test]
    async fn test_replace_matches_is_all_or_nothing() {
        let store = seeded_store().await;
        store.create_match("m1", "d1").await.unwrap();
        store.create_match("m2", "d2").await.unwrap();

        // d3 would be fine but d2 is taken by m2
        let result = store.replace_matches("m1", &ids(&["d3", "d2"])).await;
        assert!(matches!(
            result,
            Err(ReconciliationError::DocumentAlreadyMatched { .. })
        ));

        let matches = store.matches_for("m1").await.unwrap();
        assert_eq!(linked(&matches), vec!["d1"]);
        assert!(store.storage.find_document_match("d3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_matches_with_empty_set_unlinks_everything() {
        let store = seeded_store().await;
        store
            .create_matches("m1", &ids(&["d1", "d2"]))
            .await
            .unwrap();

        let diff = store.replace_matches("m1", &[]).await.unwrap();
        assert_eq!(diff.removed.len(), 2);
        assert_eq!(
            store.derive_status("m1").await.unwrap().status,
            ReconciliationStatus::NoMatch
        );
    }

    #[tokio::test]
    async fn test_create_matches_skips_duplicates() {
        let store = seeded_store().await;
        store.create_match("m1", "d1").await.unwrap();

        let created = store
            .create_matches("m1", &ids(&["d1", "d2", "d2"]))
            .await
            .unwrap();
        assert_eq!(linked(&created), vec!["d2"]);
        assert_eq!(
            store.derive_status("m1").await.unwrap().status,
            ReconciliationStatus::Full
        );
    }

    #[tokio::test]
    async fn test_lock_registry_is_cleaned_up() {
        let store = seeded_store().await;
        store.create_match("m1", "d1").await.unwrap();
        store.remove_match("m1", "d1").await.unwrap();

        assert!(store.locks.inner.lock().unwrap().is_empty());
    }

    /// Storage whose batch document reads fail; everything else is delegated
    struct FailingDocumentReads(MemoryStorage);

    #[async_trait::async_trait]
    impl ReconciliationStorage for FailingDocumentReads {
        async fn save_movement(&self, movement: &Movement) -> ReconciliationResult<()> {
            self.0.save_movement(movement).await
        }

        async fn get_movement(&self, movement_id: &str) -> ReconciliationResult<Option<Movement>> {
            self.0.get_movement(movement_id).await
        }

        async fn list_movements(&self, tenant_id: &str) -> ReconciliationResult<Vec<Movement>> {
            self.0.list_movements(tenant_id).await
        }

        async fn save_document(&self, document: &Document) -> ReconciliationResult<()> {
            self.0.save_document(document).await
        }

        async fn get_document(&self, document_id: &str) -> ReconciliationResult<Option<Document>> {
            self.0.get_document(document_id).await
        }

        async fn get_documents(&self, _: &[String]) -> ReconciliationResult<Vec<Document>> {
            Err(ReconciliationError::Storage("connection reset".to_string()))
        }

        async fn list_documents(&self, tenant_id: &str) -> ReconciliationResult<Vec<Document>> {
            self.0.list_documents(tenant_id).await
        }

        async fn get_matches(&self, movement_id: &str) -> ReconciliationResult<Vec<Match>> {
            self.0.get_matches(movement_id).await
        }

        async fn find_document_match(
            &self,
            document_id: &str,
        ) -> ReconciliationResult<Option<Match>> {
            self.0.find_document_match(document_id).await
        }

        async fn list_matches(&self, tenant_id: &str) -> ReconciliationResult<Vec<Match>> {
            self.0.list_matches(tenant_id).await
        }

        async fn apply_match_changes(
            &self,
            changes: MatchChangeSet,
        ) -> ReconciliationResult<Vec<Match>> {
            self.0.apply_match_changes(changes).await
        }

        async fn record_posting(&self, posting: &Posting) -> ReconciliationResult<()> {
            self.0.record_posting(posting).await
        }

        async fn get_posting(&self, movement_id: &str) -> ReconciliationResult<Option<Posting>> {
            self.0.get_posting(movement_id).await
        }
    }

    #[tokio::test]
    async fn test_committed_change_succeeds_when_status_read_fails() {
        let inner = seeded_store().await.storage;
        let store = MatchStore::new(FailingDocumentReads(inner.clone()));

        let created = store.create_match("m1", "d1").await.unwrap();
        assert_eq!(created.document_id, "d1");

        let group = store.create_matches("m1", &ids(&["d2"])).await.unwrap();
        assert_eq!(linked(&group), vec!["d2"]);

        let diff = store.replace_matches("m1", &ids(&["d3"])).await.unwrap();
        assert_eq!(linked(&diff.added), vec!["d3"]);
        assert_eq!(diff.removed.len(), 2);

        store.remove_match("m1", "d3").await.unwrap();
        assert!(inner.get_matches("m1").await.unwrap().is_empty());
    }
}
