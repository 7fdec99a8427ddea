//! Movement queries for the conciliation table

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::reconciliation::status::Derivation;
use crate::types::*;

/// Inclusive amount range; open on either side when a bound is `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: Option<Amount>,
    pub max: Option<Amount>,
}

impl AmountRange {
    pub fn new(min: Option<Amount>, max: Option<Amount>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, amount: Amount) -> bool {
        self.min.is_none_or(|min| amount >= min) && self.max.is_none_or(|max| amount <= max)
    }
}

/// Filter over movements and their derived state. Every criterion is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub bank_account: Option<String>,
    pub kind: Option<String>,
    /// Substring of the counterparty tax id
    pub counterparty_id: Option<String>,
    /// Substring of the counterparty name
    pub counterparty_name: Option<String>,
    /// Substring of the reference
    pub reference: Option<String>,
    /// Substring of the description
    pub description: Option<String>,
    pub debit: AmountRange,
    pub credit: AmountRange,
    pub net: AmountRange,
    pub has_note: Option<bool>,
    pub status: Option<ReconciliationStatus>,
    pub posted: Option<bool>,
}

impl MovementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_status(mut self, status: ReconciliationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_posted(mut self, posted: bool) -> Self {
        self.posted = Some(posted);
        self
    }

    pub fn with_description(mut self, needle: impl Into<String>) -> Self {
        self.description = Some(needle.into());
        self
    }

    /// Whether the movement's own fields satisfy the filter
    pub fn matches_movement(&self, movement: &Movement) -> bool {
        if self.date_from.is_some_and(|from| movement.date < from)
            || self.date_to.is_some_and(|to| movement.date > to)
        {
            return false;
        }

        if !equals(&self.bank_account, &movement.bank_account)
            || !equals(&self.kind, &movement.kind)
        {
            return false;
        }

        if !contains_opt(&self.counterparty_id, movement.counterparty_id.as_deref())
            || !contains_opt(&self.counterparty_name, movement.counterparty_name.as_deref())
            || !contains_opt(&self.reference, Some(&movement.reference))
            || !contains_opt(&self.description, Some(&movement.description))
        {
            return false;
        }

        if !self.debit.contains(movement.debit)
            || !self.credit.contains(movement.credit)
            || !self.net.contains(movement.net())
        {
            return false;
        }

        self.has_note.is_none_or(|has_note| movement.has_note == has_note)
    }

    /// Whether the movement's derived state satisfies the filter
    pub fn matches_state(&self, derivation: &Derivation, posted: bool) -> bool {
        self.status.is_none_or(|status| derivation.status == status)
            && self.posted.is_none_or(|wanted| posted == wanted)
    }
}

fn equals(wanted: &Option<String>, actual: &str) -> bool {
    wanted.as_deref().is_none_or(|w| w == actual)
}

/// Case-insensitive substring match; an empty needle matches everything
fn contains_opt(needle: &Option<String>, hay: Option<&str>) -> bool {
    match needle.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(needle) => hay
            .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
    }
}

/// Status counts and pending totals of a tenant's movements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total_movements: usize,
    pub no_match: usize,
    pub partial: usize,
    pub full: usize,
    pub posted: usize,
    /// Sum of the pending amounts of every movement
    pub total_pending: Amount,
}

impl ReconciliationSummary {
    /// Account for one movement
    pub fn record(&mut self, derivation: &Derivation, posted: bool) {
        self.total_movements += 1;
        match derivation.status {
            ReconciliationStatus::NoMatch => self.no_match += 1,
            ReconciliationStatus::Partial => self.partial += 1,
            ReconciliationStatus::Full => self.full += 1,
        }
        if posted {
            self.posted += 1;
        }
        self.total_pending = self.total_pending + derivation.pending_amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement() -> Movement {
        Movement::new(
            "m1".to_string(),
            "acme".to_string(),
            NaiveDate::from_ymd_opt(2024, 6, 12).unwrap(),
            "CHILE".to_string(),
            Amount::ZERO,
            Amount::new(45_000),
        )
        .with_kind("Cargo")
        .with_counterparty("76.543.210-K", "Servicios Andes SpA")
        .with_reference("TRX-8812")
        .with_description("Pago proveedor junio")
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(MovementFilter::new().matches_movement(&movement()));
    }

    #[test]
    fn test_date_range() {
        let inside = MovementFilter::new().with_date_range(
            NaiveDate::from_ymd_opt(2024, 6, 1),
            NaiveDate::from_ymd_opt(2024, 6, 30),
        );
        assert!(inside.matches_movement(&movement()));

        let after =
            MovementFilter::new().with_date_range(NaiveDate::from_ymd_opt(2024, 7, 1), None);
        assert!(!after.matches_movement(&movement()));
    }

    #[test]
    fn test_text_filters_are_case_insensitive() {
        let filter = MovementFilter {
            counterparty_name: Some("andes".to_string()),
            description: Some("  PROVEEDOR ".to_string()),
            ..MovementFilter::default()
        };
        assert!(filter.matches_movement(&movement()));

        let filter = MovementFilter {
            reference: Some("TRX-9".to_string()),
            ..MovementFilter::default()
        };
        assert!(!filter.matches_movement(&movement()));
    }

    #[test]
    fn test_amount_ranges() {
        let filter = MovementFilter {
            credit: AmountRange::new(Some(Amount::new(40_000)), Some(Amount::new(50_000))),
            net: AmountRange::new(None, Some(Amount::ZERO)),
            ..MovementFilter::default()
        };
        assert!(filter.matches_movement(&movement()));

        let filter = MovementFilter {
            debit: AmountRange::new(Some(Amount::new(1)), None),
            ..MovementFilter::default()
        };
        assert!(!filter.matches_movement(&movement()));
    }

    #[test]
    fn test_note_and_bank_filters() {
        let filter = MovementFilter {
            has_note: Some(true),
            ..MovementFilter::default()
        };
        assert!(!filter.matches_movement(&movement()));
        assert!(filter.matches_movement(&movement().with_note("revisar")));

        let filter = MovementFilter {
            bank_account: Some("BCI".to_string()),
            ..MovementFilter::default()
        };
        assert!(!filter.matches_movement(&movement()));
    }
}
