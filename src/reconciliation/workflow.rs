//! Reconciliation workflow: the operations exposed to the presentation layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::amount::Amount;
use crate::config::EngineConfig;
use crate::reconciliation::filter::{MovementFilter, ReconciliationSummary};
use crate::reconciliation::status::{derive, Derivation};
use crate::reconciliation::store::{dedup_ids, MatchStore};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_document, validate_movement};

/// Projected result of linking candidate documents, without committing anything
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub movement_id: String,
    /// Candidate documents not yet linked to the movement
    pub candidates: Vec<Document>,
    pub projected: Derivation,
    pub warnings: Vec<ReconciliationWarning>,
}

/// State of a movement after a successful match mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub movement_id: String,
    pub status: ReconciliationStatus,
    pub pending_amount: Amount,
    pub derivation: Derivation,
    pub matches: Vec<Match>,
    pub warnings: Vec<ReconciliationWarning>,
}

/// Everything the presentation layer renders for one movement row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementView {
    pub movement: Movement,
    pub derivation: Derivation,
    pub matches: Vec<Match>,
    /// Matched documents in match order
    pub documents: Vec<Document>,
    pub posting: Option<Posting>,
}

impl MovementView {
    pub fn is_posted(&self) -> bool {
        self.posting.is_some()
    }
}

/// Reconciliation engine entry point
///
/// Movements advance `NO_MATCH -> PARTIAL -> FULL` as documents are linked and
/// move back only through [`Reconciler::unlink_document`] and
/// [`Reconciler::edit_match`]. Posting is tracked separately from matching.
pub struct Reconciler<S: ReconciliationStorage> {
    store: MatchStore<S>,
    period_guard: Arc<dyn PeriodGuard>,
    posting_listener: Arc<dyn PostingListener>,
    config: EngineConfig,
}

impl<S: ReconciliationStorage + Clone> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            period_guard: Arc::clone(&self.period_guard),
            posting_listener: Arc::clone(&self.posting_listener),
            config: self.config.clone(),
        }
    }
}

impl<S: ReconciliationStorage> Reconciler<S> {
    /// Create a new reconciler with the default configuration
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    /// Create a new reconciler with a custom configuration
    pub fn with_config(storage: S, config: EngineConfig) -> Self {
        Self {
            store: MatchStore::new(storage),
            period_guard: Arc::new(OpenPeriods),
            posting_listener: Arc::new(NoopPostingListener),
            config,
        }
    }

    /// Install the period-close hook
    pub fn with_period_guard(mut self, guard: impl PeriodGuard + 'static) -> Self {
        self.period_guard = Arc::new(guard);
        self
    }

    /// Install the ledger collaborator notified on posting
    pub fn with_posting_listener(mut self, listener: impl PostingListener + 'static) -> Self {
        self.posting_listener = Arc::new(listener);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying match store
    pub fn store(&self) -> &MatchStore<S> {
        &self.store
    }

    // Intake
    /// Validate and store a movement from the statement importer
    #[instrument(skip_all, fields(movement_id = %movement.id))]
    pub async fn import_movement(&self, movement: Movement) -> ReconciliationResult<Movement> {
        validate_movement(&movement)?;

        if self.storage().get_movement(&movement.id).await?.is_some() {
            return Err(ReconciliationError::Validation(format!(
                "Movement with ID '{}' already exists",
                movement.id
            )));
        }

        self.storage().save_movement(&movement).await?;
        info!(tenant_id = %movement.tenant_id, net = %movement.net(), "Movement imported");
        Ok(movement)
    }

    /// Validate and store a document from the ledger
    #[instrument(skip_all, fields(document_id = %document.id))]
    pub async fn import_document(&self, document: Document) -> ReconciliationResult<Document> {
        validate_document(&document)?;

        if self.storage().get_document(&document.id).await?.is_some() {
            return Err(ReconciliationError::Validation(format!(
                "Document with ID '{}' already exists",
                document.id
            )));
        }

        self.storage().save_document(&document).await?;
        info!(tenant_id = %document.tenant_id, kind = document.kind.as_str(), "Document imported");
        Ok(document)
    }

    // Matching
    /// Check candidate documents and project the resulting status.
    ///
    /// Nothing is written. Sign and over-match problems come back as warnings.
    #[instrument(skip_all, fields(movement_id = %movement_id, documents = document_ids.len()))]
    pub async fn propose_match(
        &self,
        movement_id: &str,
        document_ids: &[String],
    ) -> ReconciliationResult<Proposal> {
        self.check_request_size(document_ids, false)?;
        let movement = self.store.get_movement_required(movement_id).await?;

        let mut matches = self.storage().get_matches(movement_id).await?;
        let linked_ids: Vec<String> = matches.iter().map(|m| m.document_id.clone()).collect();
        let mut documents = self.storage().get_documents(&linked_ids).await?;

        let mut candidates = Vec::new();
        for document_id in dedup_ids(document_ids) {
            let document = self.store.get_document_checked(&movement, &document_id).await?;
            match self.storage().find_document_match(&document_id).await? {
                Some(existing) if existing.movement_id == movement.id => continue,
                Some(existing) => {
                    return Err(ReconciliationError::DocumentAlreadyMatched {
                        document_id,
                        movement_id: existing.movement_id,
                    })
                }
                None => {}
            }
            matches.push(Match::new(
                movement.tenant_id.clone(),
                movement.id.clone(),
                document_id,
            ));
            candidates.push(document);
        }

        documents.extend(candidates.iter().cloned());
        let projected = derive(&movement, &matches, &documents);
        let warnings = self.warnings_for(&movement, &documents, &projected);

        Ok(Proposal {
            movement_id: movement.id,
            candidates,
            projected,
            warnings,
        })
    }

    /// Link a group of documents to a movement in one atomic step
    #[instrument(skip_all, fields(movement_id = %movement_id, documents = document_ids.len()))]
    pub async fn confirm_match(
        &self,
        movement_id: &str,
        document_ids: &[String],
    ) -> ReconciliationResult<MatchOutcome> {
        self.check_request_size(document_ids, false)?;
        let movement = self.store.get_movement_required(movement_id).await?;
        self.period_guard.ensure_open(&movement)?;

        self.store.create_matches(movement_id, document_ids).await?;
        self.outcome(&movement).await
    }

    /// Replace the movement's linked documents with exactly `document_ids`
    #[instrument(skip_all, fields(movement_id = %movement_id, documents = document_ids.len()))]
    pub async fn edit_match(
        &self,
        movement_id: &str,
        document_ids: &[String],
    ) -> ReconciliationResult<MatchOutcome> {
        self.check_request_size(document_ids, true)?;
        let movement = self.store.get_movement_required(movement_id).await?;
        self.period_guard.ensure_open(&movement)?;

        self.store.replace_matches(movement_id, document_ids).await?;
        self.outcome(&movement).await
    }

    /// Remove one document from a movement's matches
    #[instrument(skip_all, fields(movement_id = %movement_id, document_id = %document_id))]
    pub async fn unlink_document(
        &self,
        movement_id: &str,
        document_id: &str,
    ) -> ReconciliationResult<MatchOutcome> {
        let movement = self.store.get_movement_required(movement_id).await?;
        self.period_guard.ensure_open(&movement)?;

        self.store.remove_match(movement_id, document_id).await?;
        self.outcome(&movement).await
    }

    // Posting
    /// Record that the movement has been posted to the ledger.
    ///
    /// Independent of matching: a movement can be posted in any status.
    #[instrument(skip_all, fields(movement_id = %movement_id))]
    pub async fn mark_posted(
        &self,
        movement_id: &str,
        journal_reference: Option<String>,
    ) -> ReconciliationResult<Posting> {
        let movement = self.store.get_movement_required(movement_id).await?;
        self.period_guard.ensure_open(&movement)?;

        let posting = Posting {
            movement_id: movement.id.clone(),
            tenant_id: movement.tenant_id.clone(),
            posted_at: chrono::Utc::now().naive_utc(),
            journal_reference,
        };
        self.storage().record_posting(&posting).await?;
        self.posting_listener.movement_posted(&posting);

        info!(tenant_id = %posting.tenant_id, "Movement posted");
        Ok(posting)
    }

    // Queries
    /// Current state of one movement
    pub async fn movement_view(&self, movement_id: &str) -> ReconciliationResult<MovementView> {
        let movement = self.store.get_movement_required(movement_id).await?;
        let matches = self.storage().get_matches(movement_id).await?;
        let document_ids: Vec<String> = matches.iter().map(|m| m.document_id.clone()).collect();
        let documents = self.storage().get_documents(&document_ids).await?;
        let posting = self.storage().get_posting(movement_id).await?;

        Ok(MovementView {
            derivation: derive(&movement, &matches, &documents),
            movement,
            matches,
            documents,
            posting,
        })
    }

    /// Movements of a tenant that satisfy `filter`, ordered by date
    pub async fn list_movements(
        &self,
        tenant_id: &str,
        filter: &MovementFilter,
    ) -> ReconciliationResult<Vec<MovementView>> {
        let movements = self.storage().list_movements(tenant_id).await?;
        let documents: HashMap<String, Document> = self
            .storage()
            .list_documents(tenant_id)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let mut matches_by_movement: HashMap<String, Vec<Match>> = HashMap::new();
        for m in self.storage().list_matches(tenant_id).await? {
            matches_by_movement
                .entry(m.movement_id.clone())
                .or_default()
                .push(m);
        }

        let mut views = Vec::new();
        for movement in movements {
            if !filter.matches_movement(&movement) {
                continue;
            }

            let matches = matches_by_movement.remove(&movement.id).unwrap_or_default();
            let matched_documents: Vec<Document> = matches
                .iter()
                .filter_map(|m| documents.get(&m.document_id).cloned())
                .collect();
            let derivation = derive(&movement, &matches, &matched_documents);
            let posting = self.storage().get_posting(&movement.id).await?;

            if !filter.matches_state(&derivation, posting.is_some()) {
                continue;
            }

            views.push(MovementView {
                movement,
                derivation,
                matches,
                documents: matched_documents,
                posting,
            });
        }

        Ok(views)
    }

    /// Status counts and pending totals for a tenant
    pub async fn summary(
        &self,
        tenant_id: &str,
        filter: &MovementFilter,
    ) -> ReconciliationResult<ReconciliationSummary> {
        let mut summary = ReconciliationSummary::default();
        for view in self.list_movements(tenant_id, filter).await? {
            summary.record(&view.derivation, view.is_posted());
        }
        Ok(summary)
    }

    /// Documents of a tenant not linked to any movement
    pub async fn unmatched_documents(
        &self,
        tenant_id: &str,
    ) -> ReconciliationResult<Vec<Document>> {
        let matched: std::collections::HashSet<String> = self
            .storage()
            .list_matches(tenant_id)
            .await?
            .into_iter()
            .map(|m| m.document_id)
            .collect();

        Ok(self
            .storage()
            .list_documents(tenant_id)
            .await?
            .into_iter()
            .filter(|d| !matched.contains(&d.id))
            .collect())
    }

    fn storage(&self) -> &S {
        &self.store.storage
    }

    fn check_request_size(
        &self,
        document_ids: &[String],
        allow_empty: bool,
    ) -> ReconciliationResult<()> {
        if document_ids.is_empty() && !allow_empty {
            return Err(ReconciliationError::Validation(
                "At least one document is required".to_string(),
            ));
        }
        if document_ids.len() > self.config.max_documents_per_match {
            return Err(ReconciliationError::Validation(format!(
                "A single request can link at most {} documents (got {})",
                self.config.max_documents_per_match,
                document_ids.len()
            )));
        }
        Ok(())
    }

    async fn outcome(&self, movement: &Movement) -> ReconciliationResult<MatchOutcome> {
        let matches = self.storage().get_matches(&movement.id).await?;
        let document_ids: Vec<String> = matches.iter().map(|m| m.document_id.clone()).collect();
        let documents = self.storage().get_documents(&document_ids).await?;
        let derivation = derive(movement, &matches, &documents);
        let warnings = self.warnings_for(movement, &documents, &derivation);

        Ok(MatchOutcome {
            movement_id: movement.id.clone(),
            status: derivation.status,
            pending_amount: derivation.pending_amount,
            derivation,
            matches,
            warnings,
        })
    }

    fn warnings_for(
        &self,
        movement: &Movement,
        documents: &[Document],
        derivation: &Derivation,
    ) -> Vec<ReconciliationWarning> {
        let mut warnings = Vec::new();

        if !documents.is_empty() {
            let documents_net: Amount = documents.iter().map(Document::net).sum();
            if !self
                .config
                .sign_convention
                .is_compatible(movement.net().signum(), documents_net.signum())
            {
                warn!(
                    movement_id = %movement.id,
                    movement_net = %movement.net(),
                    documents_net = %documents_net,
                    "Documents sign does not match movement sign"
                );
                warnings.push(ReconciliationWarning::SignMismatch {
                    movement_id: movement.id.clone(),
                    movement_net: movement.net(),
                    documents_net,
                });
            }
        }

        if self.config.warn_on_over_match && derivation.is_over_matched() {
            warn!(
                movement_id = %movement.id,
                movement_abs = %derivation.movement_amount,
                matched_abs = %derivation.matched_amount,
                "Documents exceed movement amount"
            );
            warnings.push(ReconciliationWarning::OverMatched {
                movement_id: movement.id.clone(),
                movement_abs: derivation.movement_amount,
                matched_abs: derivation.matched_amount,
            });
        }

        warnings
    }
}
