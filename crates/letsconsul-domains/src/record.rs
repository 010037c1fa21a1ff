//! One certificate's managed state.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use letsconsul_issuer::IssuedMaterial;

/// One certificate's managed state, keyed by record name in the registry.
///
/// `names` is fixed once the record has been issued under its key — a
/// changed hostname set is a different record, not an update. Certificate
/// material and `issued_at` only ever change together, through
/// [`DomainRecord::apply_issued`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainRecord {
    pub names: Vec<String>,
    pub contact_email: Option<String>,
    /// Last successful issuance; `None` before the first one.
    pub issued_at: Option<DateTime<Utc>>,
    pub private_key: String,
    pub certificate: String,
    pub chain: String,
    pub full_chain: String,
    /// Opaque issuance-account handle. Held in memory for renewal
    /// continuity, never written to the store.
    pub account: Option<String>,
}

impl DomainRecord {
    /// Whether this record is due for issuance at `now`. Never-issued
    /// records are always due.
    pub fn is_stale(&self, now: DateTime<Utc>, renew_interval: Duration) -> bool {
        let Some(issued_at) = self.issued_at else {
            return true;
        };
        match chrono::Duration::from_std(renew_interval) {
            Ok(interval) => now.signed_duration_since(issued_at) >= interval,
            Err(_) => false,
        }
    }

    /// Apply freshly issued material, advancing the issuance timestamp.
    pub fn apply_issued(&mut self, material: IssuedMaterial, now: DateTime<Utc>) {
        self.private_key = material.private_key;
        self.certificate = material.certificate;
        self.chain = material.chain;
        self.full_chain = material.full_chain;
        self.account = Some(material.account);
        self.issued_at = Some(now);
    }

    /// Issuance timestamp as the store's decimal-string encoding
    /// (Unix seconds).
    pub fn timestamp_string(&self) -> Option<String> {
        self.issued_at.map(|t| t.timestamp().to_string())
    }

    /// Parse the store's decimal-string timestamp encoding.
    pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
        let seconds: i64 = raw
            .trim()
            .parse()
            .map_err(|_| format!("not a decimal timestamp: '{raw}'"))?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| format!("timestamp out of range: {seconds}"))
    }
}
