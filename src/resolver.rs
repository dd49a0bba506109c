//! Card-to-customer resolution.
//!
//! Turns a normalized scan into a customer record: NFC by `(org, card UID)`
//! binding, QR by the customer id carried in the code. An identifier that
//! matches nothing is a benign `LookupNotFound`, kept apart from store
//! failures. Every successful resolution runs visit accrual before it is
//! handed back.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::accrual::{VisitAccrualRecord, VisitAccrualService};
use crate::bridge::ReadChannel;
use crate::error::TerminalError;
use crate::reader::ScanResult;
use crate::store::{Customer, CustomerStore};

/// A resolved customer with the accrual that just ran for them.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub customer: Customer,
    pub accrual: VisitAccrualRecord,
}

pub struct CardResolver {
    store: Arc<dyn CustomerStore>,
    accrual: VisitAccrualService,
    org_id: String,
}

impl CardResolver {
    pub fn new(
        store: Arc<dyn CustomerStore>,
        accrual: VisitAccrualService,
        org_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            accrual,
            org_id: org_id.into(),
        }
    }

    /// Resolve a successful scan by its channel.
    pub fn resolve(&self, scan: &ScanResult) -> Result<Resolution, TerminalError> {
        let Some(identifier) = scan.identifier().filter(|_| scan.success) else {
            return Err(TerminalError::parse_failure(
                "scan carried nothing to resolve",
            ));
        };
        match scan.channel {
            ReadChannel::Nfc => self.resolve_nfc(identifier),
            ReadChannel::Qr => self.resolve_qr(identifier),
        }
    }

    /// Resolve an NFC card UID through its binding.
    pub fn resolve_nfc(&self, raw_uid: &str) -> Result<Resolution, TerminalError> {
        let uid = normalize_card_uid(raw_uid);
        if uid.is_empty() {
            return Err(TerminalError::parse_failure(format!(
                "card UID unusable after normalization: {raw_uid:?}"
            )));
        }

        let binding = self
            .store
            .find_card_binding(&self.org_id, &uid)
            .map_err(TerminalError::from)?
            .ok_or_else(|| {
                debug!(uid = %uid, "no binding for scanned card");
                TerminalError::not_found(uid.clone())
            })?;

        let customer = self
            .store
            .customer_by_id(&self.org_id, &binding.customer_id)
            .map_err(TerminalError::from)?
            .ok_or_else(|| {
                warn!(
                    uid = %uid,
                    customer_id = %binding.customer_id,
                    "binding points at a missing customer"
                );
                TerminalError::not_found(uid.clone())
            })?;

        self.finish(customer)
    }

    /// Resolve a QR code carrying a customer id (plain, `customer:<id>`, or
    /// the last segment of a URL).
    pub fn resolve_qr(&self, content: &str) -> Result<Resolution, TerminalError> {
        let customer_id = extract_customer_id(content).ok_or_else(|| {
            TerminalError::parse_failure(format!("QR content carries no customer id: {content:?}"))
        })?;

        let customer = self
            .store
            .customer_by_id(&self.org_id, &customer_id)
            .map_err(TerminalError::from)?
            .ok_or_else(|| {
                debug!(customer_id = %customer_id, "QR customer id matched nothing");
                TerminalError::not_found(customer_id.clone())
            })?;

        self.finish(customer)
    }

    fn finish(&self, mut customer: Customer) -> Result<Resolution, TerminalError> {
        let accrual = self.accrual.accrue(&customer)?;
        customer.visits = accrual.visits_after;
        customer.last_visit = Some(accrual.last_visit_after);
        info!(
            customer_id = %customer.id,
            name = %customer.name,
            visits = customer.visits,
            accrued = accrual.accrued,
            "customer resolved"
        );
        Ok(Resolution { customer, accrual })
    }
}

/// Uppercase-hex normalization of a card UID: separators and noise dropped,
/// so `04:a1:b2:c3` and `04A1B2C3` are the same card.
fn normalize_card_uid(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Pull a customer id out of QR content. Accepts a bare id, a
/// `customer:<id>` wrapper, or a URL whose last path segment is the id.
fn extract_customer_id(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed
        .strip_prefix("customer:")
        .or_else(|| trimmed.strip_prefix("CUSTOMER:"))
    {
        let rest = rest.trim();
        return (!rest.is_empty()).then(|| rest.to_string());
    }

    if trimmed.contains('/') {
        let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
        return without_query
            .split('/')
            .rev()
            .find(|segment| !segment.is_empty())
            .map(|segment| segment.to_string());
    }

    (!trimmed.contains(char::is_whitespace)).then(|| trimmed.to_string())
}
