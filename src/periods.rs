//! Accounting periods and the period-close guard

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::traits::PeriodGuard;
use crate::types::*;

/// Lifecycle of an accounting period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodStatus {
    /// Movements in the period can be reconciled and posted
    Open,
    /// Closed for changes; can be reopened
    Closed,
    /// Permanently closed
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// First day of the period, inclusive
    pub start: NaiveDate,
    /// Last day of the period, inclusive
    pub end: NaiveDate,
    pub status: PeriodStatus,
}

impl AccountingPeriod {
    /// Create a new open period
    pub fn new(
        id: String,
        tenant_id: String,
        name: String,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name,
            start,
            end,
            status: PeriodStatus::Open,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &AccountingPeriod) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Per-tenant accounting calendar
///
/// Periods of one tenant never overlap. Clones share the same calendar.
#[derive(Debug, Clone, Default)]
pub struct AccountingCalendar {
    periods: Arc<RwLock<HashMap<String, AccountingPeriod>>>,
}

impl AccountingCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open period
    pub fn add_period(&self, period: AccountingPeriod) -> ReconciliationResult<AccountingPeriod> {
        if period.start > period.end {
            return Err(ReconciliationError::Validation(format!(
                "Period '{}' starts after it ends",
                period.id
            )));
        }

        let mut periods = self.write()?;
        if periods.contains_key(&period.id) {
            return Err(ReconciliationError::Validation(format!(
                "Period with ID '{}' already exists",
                period.id
            )));
        }
        if let Some(clash) = periods
            .values()
            .find(|p| p.tenant_id == period.tenant_id && p.overlaps(&period))
        {
            return Err(ReconciliationError::Validation(format!(
                "Period '{}' overlaps with period '{}'",
                period.id, clash.id
            )));
        }

        let period = AccountingPeriod {
            status: PeriodStatus::Open,
            ..period
        };
        periods.insert(period.id.clone(), period.clone());
        Ok(period)
    }

    /// Get a period by ID
    pub fn get_period(&self, period_id: &str) -> ReconciliationResult<Option<AccountingPeriod>> {
        Ok(self.read()?.get(period_id).cloned())
    }

    /// Periods of a tenant ordered by start date
    pub fn list_periods(&self, tenant_id: &str) -> ReconciliationResult<Vec<AccountingPeriod>> {
        let mut periods: Vec<AccountingPeriod> = self
            .read()?
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        periods.sort_by_key(|p| p.start);
        Ok(periods)
    }

    /// The period of a tenant containing `date`, if any
    pub fn period_for(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> ReconciliationResult<Option<AccountingPeriod>> {
        Ok(self
            .read()?
            .values()
            .find(|p| p.tenant_id == tenant_id && p.contains(date))
            .cloned())
    }

    /// Close an open period
    pub fn close_period(&self, period_id: &str) -> ReconciliationResult<AccountingPeriod> {
        self.transition(period_id, PeriodStatus::Closed, |status| {
            status == PeriodStatus::Open
        })
    }

    /// Reopen a closed period
    pub fn reopen_period(&self, period_id: &str) -> ReconciliationResult<AccountingPeriod> {
        self.transition(period_id, PeriodStatus::Open, |status| {
            status == PeriodStatus::Closed
        })
    }

    /// Lock a period permanently
    pub fn lock_period(&self, period_id: &str) -> ReconciliationResult<AccountingPeriod> {
        self.transition(period_id, PeriodStatus::Locked, |status| {
            status != PeriodStatus::Locked
        })
    }

    /// Remove an open period
    pub fn remove_period(&self, period_id: &str) -> ReconciliationResult<()> {
        let mut periods = self.write()?;
        let period = periods.get(period_id).ok_or_else(|| period_not_found(period_id))?;
        if period.status != PeriodStatus::Open {
            return Err(ReconciliationError::Validation(format!(
                "Only open periods can be removed; '{}' is {:?}",
                period_id, period.status
            )));
        }
        periods.remove(period_id);
        Ok(())
    }

    fn transition(
        &self,
        period_id: &str,
        target: PeriodStatus,
        allowed_from: impl Fn(PeriodStatus) -> bool,
    ) -> ReconciliationResult<AccountingPeriod> {
        let mut periods = self.write()?;
        let period = periods
            .get_mut(period_id)
            .ok_or_else(|| period_not_found(period_id))?;

        if !allowed_from(period.status) {
            return Err(ReconciliationError::Validation(format!(
                "Period '{}' cannot go from {:?} to {:?}",
                period_id, period.status, target
            )));
        }

        period.status = target;
        info!(period_id = %period_id, status = ?target, "Accounting period updated");
        Ok(period.clone())
    }

    fn read(&self) -> ReconciliationResult<RwLockReadGuard<'_, HashMap<String, AccountingPeriod>>> {
        self.periods
            .read()
            .map_err(|_| ReconciliationError::Storage("period calendar lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> ReconciliationResult<RwLockWriteGuard<'_, HashMap<String, AccountingPeriod>>> {
        self.periods
            .write()
            .map_err(|_| ReconciliationError::Storage("period calendar lock poisoned".to_string()))
    }
}

fn period_not_found(period_id: &str) -> ReconciliationError {
    ReconciliationError::NotFound {
        entity: EntityKind::Period,
        id: period_id.to_string(),
    }
}

impl PeriodGuard for AccountingCalendar {
    fn ensure_open(&self, movement: &Movement) -> ReconciliationResult<()> {
        match self.period_for(&movement.tenant_id, movement.date)? {
            Some(period) if period.status != PeriodStatus::Open => {
                Err(ReconciliationError::PeriodClosed {
                    movement_id: movement.id.clone(),
                    period_id: period.id,
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;

    fn day(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn month(id: &str, tenant: &str, m: u32, last: u32) -> AccountingPeriod {
        AccountingPeriod::new(
            id.to_string(),
            tenant.to_string(),
            format!("2024-{:02}", m),
            day(m, 1),
            day(m, last),
        )
    }

    fn movement_on(date: NaiveDate) -> Movement {
        Movement::new(
            "m1".to_string(),
            "acme".to_string(),
            date,
            "ITAU".to_string(),
            Amount::new(1_000),
            Amount::ZERO,
        )
    }

    #[test]
    fn test_overlapping_periods_are_rejected() {
        let calendar = AccountingCalendar::new();
        calendar.add_period(month("jan", "acme", 1, 31)).unwrap();

        let overlapping = AccountingPeriod::new(
            "q1".to_string(),
            "acme".to_string(),
            "Q1".to_string(),
            day(1, 15),
            day(3, 31),
        );
        assert!(calendar.add_period(overlapping).is_err());

        // Other tenants have their own calendar
        assert!(calendar.add_period(month("jan-g", "globex", 1, 31)).is_ok());
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let calendar = AccountingCalendar::new();
        let inverted = AccountingPeriod::new(
            "bad".to_string(),
            "acme".to_string(),
            "bad".to_string(),
            day(2, 1),
            day(1, 1),
        );
        assert!(matches!(
            calendar.add_period(inverted),
            Err(ReconciliationError::Validation(_))
        ));
    }

    #[test]
    fn test_status_transitions() {
        let calendar = AccountingCalendar::new();
        calendar.add_period(month("feb", "acme", 2, 29)).unwrap();

        assert!(calendar.reopen_period("feb").is_err());
        calendar.close_period("feb").unwrap();
        assert!(calendar.close_period("feb").is_err());
        calendar.reopen_period("feb").unwrap();
        calendar.lock_period("feb").unwrap();
        assert!(calendar.reopen_period("feb").is_err());
        assert!(calendar.lock_period("feb").is_err());
        assert!(calendar.remove_period("feb").is_err());
    }

    #[test]
    fn test_guard_rejects_closed_period() {
        let calendar = AccountingCalendar::new();
        calendar.add_period(month("mar", "acme", 3, 31)).unwrap();

        let movement = movement_on(day(3, 10));
        assert!(calendar.ensure_open(&movement).is_ok());

        calendar.close_period("mar").unwrap();
        match calendar.ensure_open(&movement) {
            Err(ReconciliationError::PeriodClosed { period_id, .. }) => {
                assert_eq!(period_id, "mar")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // Dates outside every period are not restricted
        assert!(calendar.ensure_open(&movement_on(day(4, 1))).is_ok());
    }
}
