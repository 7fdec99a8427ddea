//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct State {
    movements: HashMap<String, Movement>,
    documents: HashMap<String, Document>,
    /// Active matches keyed by document id, so a document can hold at most one
    matches: HashMap<String, Match>,
    postings: HashMap<String, Posting>,
    next_sequence: u64,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same underlying state. Every mutation runs under one
/// write lock, which gives `apply_match_changes` transactional semantics.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ReconciliationResult<()> {
        *self.write()? = State::default();
        Ok(())
    }

    fn read(&self) -> ReconciliationResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| ReconciliationError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> ReconciliationResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| ReconciliationError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn save_movement(&self, movement: &Movement) -> ReconciliationResult<()> {
        self.write()?
            .movements
            .insert(movement.id.clone(), movement.clone());
        Ok(())
    }

    async fn get_movement(&self, movement_id: &str) -> ReconciliationResult<Option<Movement>> {
        Ok(self.read()?.movements.get(movement_id).cloned())
    }

    async fn list_movements(&self, tenant_id: &str) -> ReconciliationResult<Vec<Movement>> {
        let mut movements: Vec<Movement> = self
            .read()?
            .movements
            .values()
            .filter(|movement| movement.tenant_id == tenant_id)
            .cloned()
            .collect();
        movements.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(movements)
    }

    async fn save_document(&self, document: &Document) -> ReconciliationResult<()> {
        self.write()?
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> ReconciliationResult<Option<Document>> {
        Ok(self.read()?.documents.get(document_id).cloned())
    }

    async fn get_documents(&self, document_ids: &[String]) -> ReconciliationResult<Vec<Document>> {
        let state = self.read()?;
        Ok(document_ids
            .iter()
            .filter_map(|id| state.documents.get(id).cloned())
            .collect())
    }

    async fn list_documents(&self, tenant_id: &str) -> ReconciliationResult<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|document| document.tenant_id == tenant_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(documents)
    }

    async fn get_matches(&self, movement_id: &str) -> ReconciliationResult<Vec<Match>> {
        let mut matches: Vec<Match> = self
            .read()?
            .matches
            .values()
            .filter(|m| m.movement_id == movement_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| m.sequence);
        Ok(matches)
    }

    async fn find_document_match(
        &self,
        document_id: &str,
    ) -> ReconciliationResult<Option<Match>> {
        Ok(self.read()?.matches.get(document_id).cloned())
    }

    async fn list_matches(&self, tenant_id: &str) -> ReconciliationResult<Vec<Match>> {
        let mut matches: Vec<Match> = self
            .read()?
            .matches
            .values()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| m.sequence);
        Ok(matches)
    }

    async fn apply_match_changes(
        &self,
        changes: MatchChangeSet,
    ) -> ReconciliationResult<Vec<Match>> {
        let mut state = self.write()?;

        // Validate the whole change set before touching anything
        for document_id in &changes.remove {
            match state.matches.get(document_id) {
                Some(existing) if existing.movement_id == changes.movement_id => {}
                _ => {
                    return Err(ReconciliationError::MatchNotFound {
                        movement_id: changes.movement_id.clone(),
                        document_id: document_id.clone(),
                    })
                }
            }
        }

        let removed: HashSet<&str> = changes.remove.iter().map(String::as_str).collect();
        let mut inserted_ids = HashSet::new();
        for new_match in &changes.add {
            if new_match.movement_id != changes.movement_id {
                return Err(ReconciliationError::Validation(format!(
                    "Match for movement {} cannot be applied to movement {}",
                    new_match.movement_id, changes.movement_id
                )));
            }
            if !inserted_ids.insert(new_match.document_id.as_str()) {
                return Err(ReconciliationError::Validation(format!(
                    "Document {} appears twice in one change set",
                    new_match.document_id
                )));
            }
            if let Some(existing) = state.matches.get(&new_match.document_id) {
                if !removed.contains(new_match.document_id.as_str()) {
                    return Err(ReconciliationError::DocumentAlreadyMatched {
                        document_id: new_match.document_id.clone(),
                        movement_id: existing.movement_id.clone(),
                    });
                }
            }
        }

        for document_id in &changes.remove {
            state.matches.remove(document_id);
        }

        let now = chrono::Utc::now().naive_utc();
        let mut inserted = Vec::with_capacity(changes.add.len());
        for mut new_match in changes.add {
            state.next_sequence += 1;
            new_match.sequence = state.next_sequence;
            new_match.created_at = now;
            state
                .matches
                .insert(new_match.document_id.clone(), new_match.clone());
            inserted.push(new_match);
        }

        Ok(inserted)
    }

    async fn record_posting(&self, posting: &Posting) -> ReconciliationResult<()> {
        let mut state = self.write()?;
        if state.postings.contains_key(&posting.movement_id) {
            return Err(ReconciliationError::AlreadyPosted {
                movement_id: posting.movement_id.clone(),
            });
        }
        state
            .postings
            .insert(posting.movement_id.clone(), posting.clone());
        Ok(())
    }

    async fn get_posting(&self, movement_id: &str) -> ReconciliationResult<Option<Posting>> {
        Ok(self.read()?.postings.get(movement_id).cloned())
    }
}
