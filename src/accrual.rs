//! Visit accrual.
//!
//! A customer's visit counter increments at most once per calendar day,
//! computed in the organization's local time; the last-visit timestamp
//! refreshes on every successful scan regardless. Scanning twice in one day
//! is therefore two timestamp updates but one counted visit.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{Customer, CustomerStore};

/// Outcome of one accrual pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitAccrualRecord {
    pub customer_id: String,
    /// Whether the visit counter was incremented.
    pub accrued: bool,
    pub visits_after: i64,
    pub last_visit_after: DateTime<Utc>,
}

pub struct VisitAccrualService {
    store: Arc<dyn CustomerStore>,
    org_offset: FixedOffset,
}

impl VisitAccrualService {
    /// `utc_offset_minutes` positions the organization's calendar day; an
    /// out-of-range offset falls back to UTC.
    pub fn new(store: Arc<dyn CustomerStore>, utc_offset_minutes: i32) -> Self {
        let org_offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(utc_offset_minutes, "offset out of range, using UTC days");
            Utc.fix()
        });
        Self { store, org_offset }
    }

    /// Record a visit for `customer`, incrementing the counter only if their
    /// last visit fell on an earlier organization-local calendar day.
    pub fn accrue(&self, customer: &Customer) -> Result<VisitAccrualRecord, StoreError> {
        self.accrue_at(customer, Utc::now())
    }

    fn accrue_at(
        &self,
        customer: &Customer,
        now: DateTime<Utc>,
    ) -> Result<VisitAccrualRecord, StoreError> {
        let today = self.org_day(now);
        let already_counted = customer
            .last_visit
            .map(|prev| self.org_day(prev) == today)
            .unwrap_or(false);

        let visits_after = if already_counted {
            customer.visits
        } else {
            customer.visits + 1
        };

        self.store
            .update_customer_visit(&customer.id, visits_after, now)?;

        if already_counted {
            debug!(
                customer_id = %customer.id,
                visits = visits_after,
                "same-day scan, visit not re-counted"
            );
        } else {
            info!(
                customer_id = %customer.id,
                visits = visits_after,
                "visit accrued"
            );
        }

        Ok(VisitAccrualRecord {
            customer_id: customer.id.clone(),
            accrued: !already_counted,
            visits_after,
            last_visit_after: now,
        })
    }

    fn org_day(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.org_offset).date_naive()
    }
}
