//! Certificate issuance boundary.
//!
//! The scheduler only sees [`IssuanceProvider`]; account registration, the
//! ACME order flow, and HTTP-01 challenge serving all live behind it in
//! [`AcmeIssuer`].

mod acme;
mod challenge;
mod error;

pub use acme::AcmeIssuer;
pub use challenge::ChallengeSet;
pub use error::IssuanceError;

use async_trait::async_trait;

/// PEM material produced by one successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedMaterial {
    /// Leaf certificate.
    pub certificate: String,
    /// Intermediates, empty when the CA returned a single certificate.
    pub chain: String,
    /// Leaf plus intermediates, as returned by the CA.
    pub full_chain: String,
    pub private_key: String,
    /// Opaque account handle to hand back on the next issuance for the
    /// same record.
    pub account: String,
}

/// Obtains a signed certificate chain and private key for a set of
/// hostnames. Implementations own every protocol detail; callers see
/// bounded-latency calls that either yield complete material or fail.
#[async_trait]
pub trait IssuanceProvider: Send + Sync {
    /// Issue a certificate covering `names`, answering the domain-control
    /// challenge on `challenge_bind` (`host:port`). `account` is a handle
    /// from a previous issuance; `None` registers a new account using
    /// `contact` when present.
    async fn issue(
        &self,
        names: &[String],
        contact: Option<&str>,
        account: Option<&str>,
        challenge_bind: &str,
    ) -> Result<IssuedMaterial, IssuanceError>;
}
