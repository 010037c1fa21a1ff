//! Coordination-store access for letsconsul.
//!
//! The registry, scheduler, and liveness supervisor only ever see the
//! `KvStore` and `ServiceAgent` traits; the Consul HTTP API lives behind
//! them in `ConsulClient`.

mod consul;
mod error;
mod memory;

pub use consul::ConsulClient;
pub use error::StoreError;
pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

/// Typed read/write access to the flat key-value namespace.
///
/// Missing keys are `Ok(None)`, not errors — callers decide whether a
/// missing key is fatal for them.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put_value(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Service-registration surface of the cluster agent.
#[async_trait]
pub trait ServiceAgent: Send + Sync {
    async fn register(&self, service: &ServiceDefinition) -> Result<(), StoreError>;
    async fn deregister(&self, service_id: &str) -> Result<(), StoreError>;
    async fn pass_ttl(&self, check_id: &str, note: &str) -> Result<(), StoreError>;
}

/// Registration payload for one TTL-checked service instance.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    pub port: u16,
    /// Window within which the instance must pass its TTL check before the
    /// registry marks it critical.
    pub ttl: Duration,
}
