//! Core types and data structures for the reconciliation engine

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::amount::Amount;

/// Kinds of accounting documents that can be matched against a bank movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Invoice issued to a customer
    SalesInvoice,
    /// Invoice received from a supplier
    PurchaseInvoice,
    /// Income record without an invoice
    Income,
    /// Expense record without an invoice
    Expense,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::SalesInvoice => "sales_invoice",
            DocumentKind::PurchaseInvoice => "purchase_invoice",
            DocumentKind::Income => "income",
            DocumentKind::Expense => "expense",
        }
    }
}

/// One line of an imported bank statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    /// Unique identifier for the movement
    pub id: String,
    /// Company the statement belongs to
    pub tenant_id: String,
    /// Booking date on the statement
    pub date: NaiveDate,
    /// Originating bank account
    pub bank_account: String,
    /// Movement type label as printed by the bank ("Abono", "Cargo", ...)
    pub kind: String,
    /// Counterparty tax identifier, when the bank provides one
    pub counterparty_id: Option<String>,
    /// Counterparty name, when the bank provides one
    pub counterparty_name: Option<String>,
    /// Bank reference
    pub reference: String,
    /// Free-text description
    pub description: String,
    pub debit: Amount,
    pub credit: Amount,
    /// True if an external annotation exists for this line
    pub has_note: bool,
    /// The annotation text, if any
    pub note: Option<String>,
    /// When the movement was imported
    pub imported_at: NaiveDateTime,
}

impl Movement {
    /// Create a new movement with empty descriptive fields
    pub fn new(
        id: String,
        tenant_id: String,
        date: NaiveDate,
        bank_account: String,
        debit: Amount,
        credit: Amount,
    ) -> Self {
        Self {
            id,
            tenant_id,
            date,
            bank_account,
            kind: String::new(),
            counterparty_id: None,
            counterparty_name: None,
            reference: String::new(),
            description: String::new(),
            debit,
            credit,
            has_note: false,
            note: None,
            imported_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_counterparty(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.counterparty_id = Some(id.into());
        self.counterparty_name = Some(name.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach an external annotation and set `has_note`
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.has_note = true;
        self.note = Some(note.into());
        self
    }

    /// Net amount of the movement: debit - credit
    pub fn net(&self) -> Amount {
        Amount::net(self.debit, self.credit)
    }
}

/// An accounting record eligible for matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for the document
    pub id: String,
    /// Company the document belongs to
    pub tenant_id: String,
    /// Issue date
    pub date: NaiveDate,
    pub kind: DocumentKind,
    /// Counterparty tax identifier
    pub counterparty_id: String,
    /// Counterparty name
    pub counterparty_name: String,
    /// Folio, invoice number or other matching reference
    pub reference: String,
    pub debit: Amount,
    pub credit: Amount,
}

impl Document {
    /// Create a new document
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        tenant_id: String,
        date: NaiveDate,
        kind: DocumentKind,
        counterparty_id: String,
        counterparty_name: String,
        reference: String,
        debit: Amount,
        credit: Amount,
    ) -> Self {
        Self {
            id,
            tenant_id,
            date,
            kind,
            counterparty_id,
            counterparty_name,
            reference,
            debit,
            credit,
        }
    }

    /// Net amount of the document: debit - credit
    pub fn net(&self) -> Amount {
        Amount::net(self.debit, self.credit)
    }
}

/// A link between exactly one movement and one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub tenant_id: String,
    pub movement_id: String,
    pub document_id: String,
    pub created_at: NaiveDateTime,
    /// Store-assigned creation order, unique and increasing per storage
    pub sequence: u64,
}

impl Match {
    /// Create a new match. The storage stamps `created_at` and `sequence` on commit.
    pub fn new(tenant_id: String, movement_id: String, document_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            movement_id,
            document_id,
            created_at: chrono::Utc::now().naive_utc(),
            sequence: 0,
        }
    }
}

/// Record that a movement has been posted to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub movement_id: String,
    pub tenant_id: String,
    pub posted_at: NaiveDateTime,
    /// Journal entry reference handed back by the posting collaborator
    pub journal_reference: Option<String>,
}

/// Reconciliation status of a movement, always derived from its matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    /// No document is linked to the movement
    NoMatch,
    /// Some documents are linked but part of the movement is still pending
    Partial,
    /// Linked documents cover the whole movement
    Full,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::NoMatch => "NO_MATCH",
            ReconciliationStatus::Partial => "PARTIAL",
            ReconciliationStatus::Full => "FULL",
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-blocking advisories returned alongside successful results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationWarning {
    /// The documents' aggregate sign is incompatible with the movement's sign
    SignMismatch {
        movement_id: String,
        movement_net: Amount,
        documents_net: Amount,
    },
    /// The documents add up to more than the movement
    OverMatched {
        movement_id: String,
        movement_abs: Amount,
        matched_abs: Amount,
    },
}

/// Entities the engine looks up by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Movement,
    Document,
    Period,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Movement => f.write_str("Movement"),
            EntityKind::Document => f.write_str("Document"),
            EntityKind::Period => f.write_str("Period"),
        }
    }
}

/// Errors that can occur in the reconciliation engine
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },
    #[error("Document {document_id} is already matched to movement {movement_id}")]
    DocumentAlreadyMatched {
        document_id: String,
        movement_id: String,
    },
    #[error("No match between movement {movement_id} and document {document_id}")]
    MatchNotFound {
        movement_id: String,
        document_id: String,
    },
    #[error(
        "Movement {movement_id} (tenant {movement_tenant}) cannot be matched to document {document_id} (tenant {document_tenant})"
    )]
    CrossTenantMismatch {
        movement_id: String,
        document_id: String,
        movement_tenant: String,
        document_tenant: String,
    },
    #[error("Movement {movement_id} is already posted")]
    AlreadyPosted { movement_id: String },
    #[error("Movement {movement_id} belongs to closed period {period_id}")]
    PeriodClosed {
        movement_id: String,
        period_id: String,
    },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ReconciliationError {
    pub fn movement_not_found(id: &str) -> Self {
        ReconciliationError::NotFound {
            entity: EntityKind::Movement,
            id: id.to_string(),
        }
    }

    pub fn document_not_found(id: &str) -> Self {
        ReconciliationError::NotFound {
            entity: EntityKind::Document,
            id: id.to_string(),
        }
    }
}

/// Result type for reconciliation operations
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;
