//! Status derivation: a movement's reconciliation status computed from its matches

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::amount::Amount;
use crate::types::*;

/// Reconciliation state of one movement, computed by [`derive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    pub status: ReconciliationStatus,
    /// Unmatched portion of the movement's absolute net amount
    pub pending_amount: Amount,
    /// Sum of the absolute net amounts of the matched documents
    pub matched_amount: Amount,
    /// Absolute net amount of the movement
    pub movement_amount: Amount,
    pub match_count: usize,
}

impl Derivation {
    /// True when the matched documents add up to more than the movement
    pub fn is_over_matched(&self) -> bool {
        self.match_count > 0 && self.matched_amount > self.movement_amount
    }
}

/// Derive the status and pending amount of `movement`.
///
/// Only matches that belong to `movement` are counted. Each match contributes
/// the absolute net of its document, looked up in `documents`; a match whose
/// document is missing contributes nothing.
pub fn derive(movement: &Movement, matches: &[Match], documents: &[Document]) -> Derivation {
    let by_id: HashMap<&str, &Document> = documents
        .iter()
        .map(|document| (document.id.as_str(), document))
        .collect();

    let mut match_count = 0;
    let mut matched_amount = Amount::ZERO;
    for m in matches.iter().filter(|m| m.movement_id == movement.id) {
        match_count += 1;
        match by_id.get(m.document_id.as_str()) {
            Some(document) => matched_amount = matched_amount + document.net().abs(),
            None => warn!(
                movement_id = %movement.id,
                document_id = %m.document_id,
                "Matched document missing from derivation input"
            ),
        }
    }

    let movement_amount = movement.net().abs();

    let (status, pending_amount) = if match_count == 0 {
        (ReconciliationStatus::NoMatch, movement_amount)
    } else {
        let pending = movement_amount.saturating_sub_floor(matched_amount);
        if pending.is_zero() {
            (ReconciliationStatus::Full, pending)
        } else {
            (ReconciliationStatus::Partial, pending)
        }
    };

    Derivation {
        status,
        pending_amount,
        matched_amount,
        movement_amount,
        match_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn movement(debit: i64, credit: i64) -> Movement {
        Movement::new(
            "m1".to_string(),
            "acme".to_string(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            "BCI".to_string(),
            Amount::new(debit),
            Amount::new(credit),
        )
    }

    fn document(id: &str, debit: i64, credit: i64) -> Document {
        Document::new(
            id.to_string(),
            "acme".to_string(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            DocumentKind::PurchaseInvoice,
            "77.000.000-1".to_string(),
            "Proveedor".to_string(),
            format!("FC-{}", id),
            Amount::new(debit),
            Amount::new(credit),
        )
    }

    fn link(document_id: &str) -> Match {
        Match::new(
            "acme".to_string(),
            "m1".to_string(),
            document_id.to_string(),
        )
    }

    #[test]
    fn test_no_matches() {
        let derivation = derive(&movement(0, 75_000), &[], &[]);
        assert_eq!(derivation.status, ReconciliationStatus::NoMatch);
        assert_eq!(derivation.pending_amount, Amount::new(75_000));
        assert_eq!(derivation.match_count, 0);
    }

    #[test]
    fn test_full_match() {
        let movement = movement(100_000, 0);
        let documents = vec![document("d1", 0, 100_000)];
        let derivation = derive(&movement, &[link("d1")], &documents);

        assert_eq!(derivation.status, ReconciliationStatus::Full);
        assert_eq!(derivation.pending_amount, Amount::ZERO);
        assert!(!derivation.is_over_matched());
    }

    #[test]
    fn test_partial_match() {
        let movement = movement(100_000, 0);
        let documents = vec![document("d1", 0, 40_000)];
        let derivation = derive(&movement, &[link("d1")], &documents);

        assert_eq!(derivation.status, ReconciliationStatus::Partial);
        assert_eq!(derivation.pending_amount, Amount::new(60_000));
    }

    #[test]
    fn test_many_documents_add_up() {
        let movement = movement(0, 90_000);
        let documents = vec![
            document("d1", 30_000, 0),
            document("d2", 30_000, 0),
            document("d3", 0, 30_000),
        ];
        let matches = vec![link("d1"), link("d2"), link("d3")];
        let derivation = derive(&movement, &matches, &documents);

        assert_eq!(derivation.status, ReconciliationStatus::Full);
        assert_eq!(derivation.matched_amount, Amount::new(90_000));
    }

    #[test]
    fn test_over_match_clamps_pending() {
        let movement = movement(50_000, 0);
        let documents = vec![document("d1", 0, 80_000)];
        let derivation = derive(&movement, &[link("d1")], &documents);

        assert_eq!(derivation.status, ReconciliationStatus::Full);
        assert_eq!(derivation.pending_amount, Amount::ZERO);
        assert!(derivation.is_over_matched());
    }

    #[test]
    fn test_zero_amount_movement_is_never_partial() {
        let movement = movement(0, 0);
        assert_eq!(
            derive(&movement, &[], &[]).status,
            ReconciliationStatus::NoMatch
        );

        let documents = vec![document("d1", 12_345, 0)];
        let derivation = derive(&movement, &[link("d1")], &documents);
        assert_eq!(derivation.status, ReconciliationStatus::Full);
        assert_eq!(derivation.pending_amount, Amount::ZERO);
    }

    #[test]
    fn test_matches_of_other_movements_are_ignored() {
        let movement = movement(10_000, 0);
        let documents = vec![document("d1", 0, 10_000)];
        let foreign = Match::new("acme".to_string(), "m2".to_string(), "d1".to_string());

        let derivation = derive(&movement, &[foreign], &documents);
        assert_eq!(derivation.status, ReconciliationStatus::NoMatch);
    }

    #[test]
    fn test_pending_stays_within_bounds() {
        let movement = movement(0, 100_000);
        for matched in [0, 1, 50_000, 99_999, 100_000, 100_001, 1_000_000] {
            let documents = vec![document("d1", matched, 0)];
            let derivation = derive(&movement, &[link("d1")], &documents);
            assert!(derivation.pending_amount >= Amount::ZERO);
            assert!(derivation.pending_amount <= movement.net().abs());
        }
    }
}
