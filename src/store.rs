//! Customer store.
//!
//! The resolver and accrual service talk to customers through the
//! [`CustomerStore`] trait; [`SqliteCustomerStore`] is the bundled
//! implementation over the local database. A host with its own persistence
//! implements the trait instead. Absent rows are `None`, never errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::db::DbState;
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Loyalty customer record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub points: i64,
    pub visits: i64,
    pub last_visit: Option<DateTime<Utc>>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// One physical card UID bound to one customer, per organization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardBinding {
    pub id: String,
    pub org_id: String,
    pub card_uid: String,
    pub customer_id: String,
    pub issued_at: Option<String>,
    pub issued_by: Option<String>,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence surface the resolution pipeline needs.
pub trait CustomerStore: Send + Sync {
    /// Look up an active card binding by `(org_id, card_uid)`.
    fn find_card_binding(
        &self,
        org_id: &str,
        card_uid: &str,
    ) -> Result<Option<CardBinding>, StoreError>;

    /// Load a customer by id, scoped to the organization.
    fn customer_by_id(
        &self,
        org_id: &str,
        customer_id: &str,
    ) -> Result<Option<Customer>, StoreError>;

    /// Persist a visit accrual: new visit count and last-visit timestamp.
    fn update_customer_visit(
        &self,
        customer_id: &str,
        visits: i64,
        last_visit: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Persist a new points balance.
    fn update_customer_points(&self, customer_id: &str, points: i64) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

pub struct SqliteCustomerStore {
    db: Arc<DbState>,
}

impl SqliteCustomerStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Create a customer record. Used by enrollment flows and tests.
    pub fn insert_customer(
        &self,
        org_id: &str,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer, StoreError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO customers (id, org_id, name, email, phone) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, org_id, name, email, phone],
        )?;
        drop(conn);
        self.customer_by_id(org_id, &id)?
            .ok_or_else(|| StoreError::invalid_row("inserted customer row not readable"))
    }

    /// Raw connection access for test fixtures.
    #[cfg(test)]
    pub(crate) fn raw_conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.db.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind a physical card UID to a customer. The UID must be unused within
    /// the organization.
    pub fn bind_card(
        &self,
        org_id: &str,
        card_uid: &str,
        customer_id: &str,
        issued_by: Option<&str>,
    ) -> Result<CardBinding, StoreError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO card_bindings (id, org_id, card_uid, customer_id, issued_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, org_id, card_uid, customer_id, issued_by],
        )?;
        drop(conn);
        self.find_card_binding(org_id, card_uid)?
            .ok_or_else(|| StoreError::invalid_row("inserted binding row not readable"))
    }
}

/// Parse a stored RFC 3339 timestamp, tolerating rows written by hand.
fn parse_last_visit(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!(raw, error = %e, "unreadable last_visit timestamp, treating as never");
            None
        }
    }
}

impl CustomerStore for SqliteCustomerStore {
    fn find_card_binding(
        &self,
        org_id: &str,
        card_uid: &str,
    ) -> Result<Option<CardBinding>, StoreError> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let binding = conn
            .query_row(
                "SELECT id, org_id, card_uid, customer_id, issued_at, issued_by, is_active
                 FROM card_bindings
                 WHERE org_id = ?1 AND card_uid = ?2 AND is_active = 1",
                params![org_id, card_uid],
                |row| {
                    Ok(CardBinding {
                        id: row.get(0)?,
                        org_id: row.get(1)?,
                        card_uid: row.get(2)?,
                        customer_id: row.get(3)?,
                        issued_at: row.get(4)?,
                        issued_by: row.get(5)?,
                        is_active: row.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(binding)
    }

    fn customer_by_id(
        &self,
        org_id: &str,
        customer_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row = conn
            .query_row(
                "SELECT id, org_id, name, email, phone, points, visits, last_visit,
                        created_at, updated_at
                 FROM customers
                 WHERE id = ?1 AND org_id = ?2",
                params![customer_id, org_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(
            |(id, org_id, name, email, phone, points, visits, last_visit, created_at, updated_at)| {
                Customer {
                    id,
                    org_id,
                    name,
                    email,
                    phone,
                    points,
                    visits,
                    last_visit: parse_last_visit(last_visit),
                    created_at,
                    updated_at,
                }
            },
        ))
    }

    fn update_customer_visit(
        &self,
        customer_id: &str,
        visits: i64,
        last_visit: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let updated = conn.execute(
            "UPDATE customers
             SET visits = ?1, last_visit = ?2, updated_at = datetime('now')
             WHERE id = ?3",
            params![visits, last_visit.to_rfc3339(), customer_id],
        )?;
        if updated == 0 {
            return Err(StoreError::invalid_row(format!(
                "no customer row updated for {customer_id}"
            )));
        }
        Ok(())
    }

    fn update_customer_points(&self, customer_id: &str, points: i64) -> Result<(), StoreError> {
        let conn = self.db.conn.lock().unwrap_or_else(|e| e.into_inner());
        let updated = conn.execute(
            "UPDATE customers SET points = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![points, customer_id],
        )?;
        if updated == 0 {
            return Err(StoreError::invalid_row(format!(
                "no customer row updated for {customer_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;

    fn store() -> SqliteCustomerStore {
        SqliteCustomerStore::new(Arc::new(db::init_in_memory()))
    }

    #[test]
    fn test_binding_roundtrip_and_org_scoping() {
        let store = store();
        let ada = store
            .insert_customer("org-1", "Ada", Some("ada@example.com"), None)
            .unwrap();
        store
            .bind_card("org-1", "04A1B2C3", &ada.id, Some("operator-7"))
            .unwrap();

        let found = store.find_card_binding("org-1", "04A1B2C3").unwrap();
        assert_eq!(found.as_ref().map(|b| b.customer_id.as_str()), Some(ada.id.as_str()));
        assert!(found.is_some_and(|b| b.is_active));

        // Other org sees nothing under the same UID.
        assert!(store.find_card_binding("org-2", "04A1B2C3").unwrap().is_none());
        // Unknown UID is None, not an error.
        assert!(store.find_card_binding("org-1", "FFFFFFFF").unwrap().is_none());
    }

    #[test]
    fn test_inactive_bindings_are_invisible() {
        let store = store();
        let ada = store.insert_customer("org-1", "Ada", None, None).unwrap();
        let binding = store.bind_card("org-1", "AA11", &ada.id, None).unwrap();

        {
            let conn = store.raw_conn();
            conn.execute(
                "UPDATE card_bindings SET is_active = 0 WHERE id = ?1",
                params![binding.id],
            )
            .unwrap();
        }

        assert!(store.find_card_binding("org-1", "AA11").unwrap().is_none());
    }

    #[test]
    fn test_customer_lookup_is_org_scoped() {
        let store = store();
        let ada = store.insert_customer("org-1", "Ada", None, None).unwrap();

        assert!(store.customer_by_id("org-1", &ada.id).unwrap().is_some());
        assert!(store.customer_by_id("org-2", &ada.id).unwrap().is_none());
    }

    #[test]
    fn test_visit_update_roundtrip() {
        let store = store();
        let ada = store.insert_customer("org-1", "Ada", None, None).unwrap();
        assert_eq!(ada.visits, 0);
        assert_eq!(ada.last_visit, None);

        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 10, 30, 0).unwrap();
        store.update_customer_visit(&ada.id, 1, ts).unwrap();

        let reloaded = store.customer_by_id("org-1", &ada.id).unwrap().unwrap();
        assert_eq!(reloaded.visits, 1);
        assert_eq!(reloaded.last_visit, Some(ts));
    }

    #[test]
    fn test_points_update_roundtrip() {
        let store = store();
        let ada = store.insert_customer("org-1", "Ada", None, None).unwrap();

        store.update_customer_points(&ada.id, 120).unwrap();
        let reloaded = store.customer_by_id("org-1", &ada.id).unwrap().unwrap();
        assert_eq!(reloaded.points, 120);
    }

    #[test]
    fn test_update_on_missing_customer_fails() {
        let store = store();
        let err = store.update_customer_points("ghost", 10).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRow { .. }));
    }

    #[test]
    fn test_garbage_last_visit_reads_as_never() {
        let store = store();
        let ada = store.insert_customer("org-1", "Ada", None, None).unwrap();
        {
            let conn = store.raw_conn();
            conn.execute(
                "UPDATE customers SET last_visit = 'yesterday-ish' WHERE id = ?1",
                params![ada.id],
            )
            .unwrap();
        }

        let reloaded = store.customer_by_id("org-1", &ada.id).unwrap().unwrap();
        assert_eq!(reloaded.last_visit, None);
    }

    #[test]
    fn test_duplicate_binding_is_store_error() {
        let store = store();
        let ada = store.insert_customer("org-1", "Ada", None, None).unwrap();
        store.bind_card("org-1", "AA11", &ada.id, None).unwrap();

        let err = store.bind_card("org-1", "AA11", &ada.id, None).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }
}
