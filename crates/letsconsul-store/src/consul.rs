//! Consul HTTP API client.
//!
//! Implements both store traits against a single agent endpoint: the KV
//! namespace under `/v1/kv/` and the service registration surface under
//! `/v1/agent/`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::{KvStore, ServiceAgent, ServiceDefinition};

/// TCP connect timeout for agent requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Overall request timeout. Generous enough for a KV read through a
/// degraded cluster, short enough not to stall a scheduler tick for long.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one Consul agent.
pub struct ConsulClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl ConsulClient {
    /// Build a client for the agent at `address` (`host:port`, with or
    /// without an `http://` scheme).
    pub fn new(address: &str, token: Option<String>) -> Result<Self, StoreError> {
        let trimmed = address.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::Address(address.to_string()));
        }
        let base = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { http, base, token })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{path}", self.base));
        if let Some(token) = &self.token {
            req = req.header("X-Consul-Token", token);
        }
        req
    }
}

/// One entry of a KV read response. Consul base64-encodes the value and
/// returns `null` for zero-length values.
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Decode the body of `GET /v1/kv/<key>` down to the stored bytes.
fn decode_kv_payload(body: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    let entries: Vec<KvEntry> =
        serde_json::from_slice(body).map_err(|e| StoreError::Decode(e.to_string()))?;
    let Some(entry) = entries.into_iter().next() else {
        return Ok(None);
    };
    match entry.value {
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("base64 value: {e}"))),
        None => Ok(Some(Vec::new())),
    }
}

#[async_trait]
impl KvStore for ConsulClient {
    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/v1/kv/{key}"))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StoreError::Api {
                operation: "kv get",
                status: resp.status().as_u16(),
            });
        }
        let body = resp.bytes().await?;
        decode_kv_payload(&body)
    }

    async fn put_value(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let resp = self
            .request(reqwest::Method::PUT, &format!("/v1/kv/{key}"))
            .body(value.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Api {
                operation: "kv put",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/v1/kv/{prefix}"))
            .query(&[("keys", "true")])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(StoreError::Api {
                operation: "kv keys",
                status: resp.status().as_u16(),
            });
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Checks")]
    checks: Vec<CheckBody>,
}

#[derive(Debug, Serialize)]
struct CheckBody {
    #[serde(rename = "TTL")]
    ttl: String,
}

fn register_body(service: &ServiceDefinition) -> RegisterBody<'_> {
    RegisterBody {
        id: &service.id,
        name: &service.name,
        port: service.port,
        checks: vec![CheckBody {
            ttl: format!("{}s", service.ttl.as_secs()),
        }],
    }
}

#[async_trait]
impl ServiceAgent for ConsulClient {
    async fn register(&self, service: &ServiceDefinition) -> Result<(), StoreError> {
        let resp = self
            .request(reqwest::Method::PUT, "/v1/agent/service/register")
            .json(&register_body(service))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Api {
                operation: "service register",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<(), StoreError> {
        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/agent/service/deregister/{service_id}"),
            )
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Api {
                operation: "service deregister",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn pass_ttl(&self, check_id: &str, note: &str) -> Result<(), StoreError> {
        let resp = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/agent/check/pass/{check_id}"),
            )
            .query(&[("note", note)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Api {
                operation: "check pass",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}
