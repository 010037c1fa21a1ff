//! Materializes the declared domain set from the coordination store.

use std::collections::BTreeMap;
use std::sync::Arc;

use letsconsul_store::{KvStore, StoreError};

use crate::error::LoadError;
use crate::record::DomainRecord;

const FIELD_DOMAIN_LIST: &str = "domain_list";
const FIELD_EMAIL: &str = "email";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_CERT: &str = "cert";
const FIELD_CHAIN: &str = "chain";
const FIELD_FULLCHAIN: &str = "fullchain";
const FIELD_PRIVATE_KEY: &str = "private_key";

/// Exclusive owner of the in-memory domain records. The scheduler reads
/// snapshots and hands renewed records back through [`DomainRegistry::upsert`];
/// nothing else mutates the collection.
pub struct DomainRegistry {
    store: Arc<dyn KvStore>,
    prefix: String,
    records: BTreeMap<String, DomainRecord>,
}

impl DomainRegistry {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            records: BTreeMap::new(),
        }
    }

    fn enabled_key(&self) -> String {
        format!("{}/domains_enabled", self.prefix)
    }

    fn field_key(&self, name: &str, field: &str) -> String {
        format!("{}/domains/{name}/{field}", self.prefix)
    }

    /// Fetch the declared domain set and materialize every declared name
    /// that is not already tracked.
    ///
    /// Any failure aborts the whole load: freshly fetched records are
    /// staged and committed only once every declared name resolved, so a
    /// half-readable store never changes what the scheduler sees. Names
    /// that left the declared set stay tracked (cleanup is an operator
    /// concern, not ours).
    pub async fn load(&mut self) -> Result<(), LoadError> {
        let key = self.enabled_key();
        let raw = self
            .store
            .get_value(&key)
            .await?
            .ok_or(LoadError::MissingKey { key: key.clone() })?;
        let enabled: Vec<String> =
            serde_json::from_slice(&raw).map_err(|e| LoadError::Malformed {
                key,
                reason: e.to_string(),
            })?;

        let mut staged = Vec::new();
        for name in &enabled {
            if !self.records.contains_key(name) {
                staged.push((name.clone(), self.fetch_record(name).await?));
            }
        }
        for (name, record) in staged {
            tracing::info!(domain = %name, names = ?record.names, "Tracking domain record");
            self.records.insert(name, record);
        }
        Ok(())
    }

    async fn fetch_record(&self, name: &str) -> Result<DomainRecord, LoadError> {
        let raw = self
            .required_field(name, FIELD_DOMAIN_LIST)
            .await?;
        let key = self.field_key(name, FIELD_DOMAIN_LIST);
        let names: Vec<String> =
            serde_json::from_slice(&raw).map_err(|e| LoadError::Malformed {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        if names.is_empty() {
            return Err(LoadError::Malformed {
                key,
                reason: "at least one hostname is required".to_string(),
            });
        }

        let contact_email = self
            .optional_string(name, FIELD_EMAIL)
            .await?
            .filter(|s| !s.is_empty());

        let issued_at = match self.optional_string(name, FIELD_TIMESTAMP).await? {
            Some(raw) => Some(DomainRecord::parse_timestamp(&raw).map_err(|reason| {
                LoadError::Malformed {
                    key: self.field_key(name, FIELD_TIMESTAMP),
                    reason,
                }
            })?),
            None => None,
        };

        Ok(DomainRecord {
            names,
            contact_email,
            issued_at,
            certificate: self.optional_string(name, FIELD_CERT).await?.unwrap_or_default(),
            chain: self.optional_string(name, FIELD_CHAIN).await?.unwrap_or_default(),
            full_chain: self
                .optional_string(name, FIELD_FULLCHAIN)
                .await?
                .unwrap_or_default(),
            private_key: self
                .optional_string(name, FIELD_PRIVATE_KEY)
                .await?
                .unwrap_or_default(),
            account: None,
        })
    }

    async fn required_field(
        &self,
        name: &str,
        field: &'static str,
    ) -> Result<Vec<u8>, LoadError> {
        self.store
            .get_value(&self.field_key(name, field))
            .await?
            .ok_or(LoadError::MissingField {
                name: name.to_string(),
                field,
            })
    }

    async fn optional_string(
        &self,
        name: &str,
        field: &'static str,
    ) -> Result<Option<String>, LoadError> {
        match self.store.get_value(&self.field_key(name, field)).await? {
            Some(bytes) => {
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| LoadError::Malformed {
                        key: self.field_key(name, field),
                        reason: e.to_string(),
                    })
            }
            None => Ok(None),
        }
    }

    /// Replace the tracked record for `name`.
    pub fn upsert(&mut self, name: &str, record: DomainRecord) {
        self.records.insert(name.to_string(), record);
    }

    /// Tracked records in name order.
    pub fn snapshot(&self) -> Vec<(String, DomainRecord)> {
        self.records
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&DomainRecord> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write a record's certificate material and timestamp back to the
    /// store. The key is written before any certificate and the timestamp
    /// goes last: an interrupted write-back leaves the old timestamp in
    /// place, so the record counts as not-yet-renewed on the next tick.
    pub async fn persist(&self, name: &str, record: &DomainRecord) -> Result<(), StoreError> {
        self.store
            .put_value(
                &self.field_key(name, FIELD_PRIVATE_KEY),
                record.private_key.as_bytes(),
            )
            .await?;
        self.store
            .put_value(&self.field_key(name, FIELD_CERT), record.certificate.as_bytes())
            .await?;
        self.store
            .put_value(&self.field_key(name, FIELD_CHAIN), record.chain.as_bytes())
            .await?;
        self.store
            .put_value(
                &self.field_key(name, FIELD_FULLCHAIN),
                record.full_chain.as_bytes(),
            )
            .await?;
        if let Some(timestamp) = record.timestamp_string() {
            self.store
                .put_value(&self.field_key(name, FIELD_TIMESTAMP), timestamp.as_bytes())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use letsconsul_store::MemoryStore;

    const PREFIX: &str = "letsconsul";

    async fn seed_full_record(store: &MemoryStore, name: &str) {
        let base = format!("{PREFIX}/domains/{name}");
        store
            .put_value(
                &format!("{base}/domain_list"),
                format!(r#"["{name}","www.{name}"]"#).as_bytes(),
            )
            .await
            .unwrap();
        store
            .put_value(&format!("{base}/email"), b"ops@example.com")
            .await
            .unwrap();
        store
            .put_value(&format!("{base}/timestamp"), b"1700000000")
            .await
            .unwrap();
        store
            .put_value(&format!("{base}/cert"), b"CERT-PEM")
            .await
            .unwrap();
        store
            .put_value(&format!("{base}/chain"), b"CHAIN-PEM")
            .await
            .unwrap();
        store
            .put_value(&format!("{base}/fullchain"), b"FULL-PEM")
            .await
            .unwrap();
        store
            .put_value(&format!("{base}/private_key"), b"KEY-PEM")
            .await
            .unwrap();
    }

    async fn declare(store: &MemoryStore, names: &[&str]) {
        let json = serde_json::to_vec(names).unwrap();
        store
            .put_value(&format!("{PREFIX}/domains_enabled"), &json)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn load_without_declared_set_fails() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = DomainRegistry::new(store, PREFIX);
        let err = registry.load().await.unwrap_err();
        assert!(matches!(err, LoadError::MissingKey { .. }));
    }

    #[tokio::test]
    async fn load_materializes_declared_records() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["example.com"]).await;
        seed_full_record(&store, "example.com").await;

        let mut registry = DomainRegistry::new(store, PREFIX);
        registry.load().await.unwrap();

        let record = registry.get("example.com").unwrap();
        assert_eq!(record.names, vec!["example.com", "www.example.com"]);
        assert_eq!(record.contact_email.as_deref(), Some("ops@example.com"));
        assert_eq!(record.issued_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(record.certificate, "CERT-PEM");
        assert_eq!(record.private_key, "KEY-PEM");
    }

    #[tokio::test]
    async fn load_accepts_never_issued_record() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["example.com"]).await;
        store
            .put_value(
                &format!("{PREFIX}/domains/example.com/domain_list"),
                br#"["example.com"]"#,
            )
            .await
            .unwrap();

        let mut registry = DomainRegistry::new(store, PREFIX);
        registry.load().await.unwrap();

        let record = registry.get("example.com").unwrap();
        assert!(record.issued_at.is_none());
        assert!(record.certificate.is_empty());
        assert!(record.contact_email.is_none());
    }

    #[tokio::test]
    async fn missing_domain_list_fails_whole_load_and_keeps_previous_records() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["a.example"]).await;
        seed_full_record(&store, "a.example").await;

        let mut registry = DomainRegistry::new(Arc::clone(&store) as Arc<dyn KvStore>, PREFIX);
        registry.load().await.unwrap();
        assert_eq!(registry.len(), 1);

        // Declare a second record without its domain_list key. The "zz"
        // prefix keeps it after a.example in iteration order, so even the
        // staged-commit path is exercised.
        declare(&store, &["a.example", "zz.example"]).await;
        let err = registry.load().await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingField {
                field: "domain_list",
                ..
            }
        ));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("a.example").is_some());
        assert!(registry.get("zz.example").is_none());
    }

    #[tokio::test]
    async fn load_skips_already_tracked_records() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["example.com"]).await;
        seed_full_record(&store, "example.com").await;

        let mut registry = DomainRegistry::new(Arc::clone(&store) as Arc<dyn KvStore>, PREFIX);
        registry.load().await.unwrap();

        // A concurrent writer moves the stored timestamp; the in-memory
        // record stays authoritative until the process restarts.
        store
            .put_value(&format!("{PREFIX}/domains/example.com/timestamp"), b"1800000000")
            .await
            .unwrap();
        registry.load().await.unwrap();

        let record = registry.get("example.com").unwrap();
        assert_eq!(record.issued_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn record_leaving_declared_set_stays_tracked() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["example.com"]).await;
        seed_full_record(&store, "example.com").await;

        let mut registry = DomainRegistry::new(Arc::clone(&store) as Arc<dyn KvStore>, PREFIX);
        registry.load().await.unwrap();

        declare(&store, &[]).await;
        registry.load().await.unwrap();
        assert!(registry.get("example.com").is_some());
    }

    #[tokio::test]
    async fn snapshot_is_name_ordered() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["b.example", "a.example", "c.example"]).await;
        for name in ["a.example", "b.example", "c.example"] {
            seed_full_record(&store, name).await;
        }

        let mut registry = DomainRegistry::new(store, PREFIX);
        registry.load().await.unwrap();

        let names: Vec<String> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.example", "b.example", "c.example"]);
    }

    #[tokio::test]
    async fn persist_then_load_round_trips_material() {
        let store = Arc::new(MemoryStore::new());
        declare(&store, &["example.com"]).await;
        store
            .put_value(
                &format!("{PREFIX}/domains/example.com/domain_list"),
                br#"["example.com"]"#,
            )
            .await
            .unwrap();
        store
            .put_value(&format!("{PREFIX}/domains/example.com/email"), b"ops@example.com")
            .await
            .unwrap();

        let record = DomainRecord {
            names: vec!["example.com".to_string()],
            contact_email: Some("ops@example.com".to_string()),
            issued_at: Some(Utc::now()),
            private_key: "KEY-PEM".to_string(),
            certificate: "CERT-PEM".to_string(),
            chain: "CHAIN-PEM".to_string(),
            full_chain: "FULL-PEM".to_string(),
            account: Some("acct".to_string()),
        };

        let registry = DomainRegistry::new(Arc::clone(&store) as Arc<dyn KvStore>, PREFIX);
        registry.persist("example.com", &record).await.unwrap();

        let mut reloaded = DomainRegistry::new(store, PREFIX);
        reloaded.load().await.unwrap();
        let loaded = reloaded.get("example.com").unwrap();

        assert_eq!(loaded.names, record.names);
        assert_eq!(
            loaded.issued_at.unwrap().timestamp(),
            record.issued_at.unwrap().timestamp()
        );
        assert_eq!(loaded.private_key, record.private_key);
        assert_eq!(loaded.certificate, record.certificate);
        assert_eq!(loaded.chain, record.chain);
        assert_eq!(loaded.full_chain, record.full_chain);
        // The account handle is process-local state.
        assert!(loaded.account.is_none());
    }

    #[tokio::test]
    async fn interrupted_persist_leaves_timestamp_unwritten() {
        let store = Arc::new(MemoryStore::new());
        store
            .fail_puts_to(&format!("{PREFIX}/domains/example.com/chain"))
            .await;

        let record = DomainRecord {
            names: vec!["example.com".to_string()],
            issued_at: Some(Utc::now()),
            private_key: "KEY-PEM".to_string(),
            certificate: "CERT-PEM".to_string(),
            chain: "CHAIN-PEM".to_string(),
            full_chain: "FULL-PEM".to_string(),
            ..Default::default()
        };

        let registry = DomainRegistry::new(Arc::clone(&store) as Arc<dyn KvStore>, PREFIX);
        assert!(registry.persist("example.com", &record).await.is_err());

        // The key may be written, the timestamp must not be: the record
        // still reads as stale on the next load.
        assert!(store
            .get_value(&format!("{PREFIX}/domains/example.com/timestamp"))
            .await
            .unwrap()
            .is_none());
    }
}
