//! Validation utilities for imported records

use crate::amount::Amount;
use crate::types::*;

const MAX_ID_LEN: usize = 64;

/// Validate that an amount is not negative
pub fn validate_non_negative_amount(field: &str, amount: Amount) -> ReconciliationResult<()> {
    if amount.is_negative() {
        Err(ReconciliationError::Validation(format!(
            "{} cannot be negative (got {})",
            field, amount
        )))
    } else {
        Ok(())
    }
}

/// Validate that a record ID is valid
pub fn validate_record_id(id: &str) -> ReconciliationResult<()> {
    if id.trim().is_empty() {
        return Err(ReconciliationError::Validation(
            "ID cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_ID_LEN {
        return Err(ReconciliationError::Validation(format!(
            "ID cannot exceed {} characters",
            MAX_ID_LEN
        )));
    }

    // Check for valid characters (alphanumeric, dashes, underscores)
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReconciliationError::Validation(format!(
            "ID '{}' can only contain alphanumeric characters, dashes, and underscores",
            id
        )));
    }

    Ok(())
}

/// Validate that a tenant ID is present
pub fn validate_tenant_id(tenant_id: &str) -> ReconciliationResult<()> {
    if tenant_id.trim().is_empty() {
        return Err(ReconciliationError::Validation(
            "Tenant ID cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate a movement handed over by the statement importer
pub fn validate_movement(movement: &Movement) -> ReconciliationResult<()> {
    validate_record_id(&movement.id)?;
    validate_tenant_id(&movement.tenant_id)?;
    validate_non_negative_amount("Movement debit", movement.debit)?;
    validate_non_negative_amount("Movement credit", movement.credit)?;
    Ok(())
}

/// Validate a document handed over by the ledger
pub fn validate_document(document: &Document) -> ReconciliationResult<()> {
    validate_record_id(&document.id)?;
    validate_tenant_id(&document.tenant_id)?;
    validate_non_negative_amount("Document debit", document.debit)?;
    validate_non_negative_amount("Document credit", document.credit)?;
    Ok(())
}
