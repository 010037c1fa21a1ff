//! ACME order flow over `instant-acme`.

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, OrderStatus, RetryPolicy,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::challenge::{self, ChallengeSet};
use crate::error::IssuanceError;
use crate::{IssuanceProvider, IssuedMaterial};

/// Issues certificates from an ACME directory using HTTP-01 challenges.
pub struct AcmeIssuer {
    directory_url: String,
}

impl AcmeIssuer {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
        }
    }

    /// Reuse the account behind `handle`, or register a new one.
    async fn account(
        &self,
        contact: Option<&str>,
        handle: Option<&str>,
    ) -> Result<(Account, String), IssuanceError> {
        if let Some(handle) = handle {
            let credentials: AccountCredentials = serde_json::from_str(handle)
                .map_err(|e| IssuanceError::Account(e.to_string()))?;
            let account = Account::builder()?.from_credentials(credentials).await?;
            return Ok((account, handle.to_string()));
        }

        let mailto = contact.map(|c| format!("mailto:{c}"));
        let contacts: Vec<&str> = mailto.as_deref().into_iter().collect();
        let (account, credentials) = Account::builder()?
            .create(
                &NewAccount {
                    contact: &contacts,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory_url.clone(),
                None,
            )
            .await?;
        let handle = serde_json::to_string(&credentials)
            .map_err(|e| IssuanceError::Account(e.to_string()))?;
        tracing::info!("Registered new issuance account");
        Ok((account, handle))
    }

    /// Drive one order to completion. Challenges are published through
    /// `set`; the caller keeps the responder alive for the duration.
    async fn run_order(
        &self,
        account: &Account,
        names: &[String],
        set: &ChallengeSet,
    ) -> Result<(String, String), IssuanceError> {
        let identifiers: Vec<Identifier> =
            names.iter().map(|n| Identifier::Dns(n.clone())).collect();
        let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

        let mut tokens = Vec::new();
        {
            let mut authorizations = order.authorizations();
            while let Some(result) = authorizations.next().await {
                let mut authz = result?;
                match authz.status {
                    AuthorizationStatus::Pending => {}
                    AuthorizationStatus::Valid => continue,
                    status => {
                        return Err(IssuanceError::Order(format!(
                            "unexpected authorization status {status:?}"
                        )))
                    }
                }

                let mut challenge = authz
                    .challenge(ChallengeType::Http01)
                    .ok_or_else(|| IssuanceError::Order("no http-01 challenge offered".into()))?;
                let token = challenge.token.clone();
                set.insert(token.clone(), challenge.key_authorization().as_str().to_string())
                    .await;
                tokens.push(token);
                challenge.set_ready().await?;
            }
        }

        let status = order.poll_ready(&RetryPolicy::default()).await;
        for token in &tokens {
            set.remove(token).await;
        }
        match status? {
            OrderStatus::Ready => {}
            other => {
                return Err(IssuanceError::Order(format!("order not ready: {other:?}")));
            }
        }

        let private_key = order.finalize().await?;
        let full_chain = order.poll_certificate(&RetryPolicy::default()).await?;
        Ok((full_chain, private_key))
    }
}

#[async_trait]
impl IssuanceProvider for AcmeIssuer {
    async fn issue(
        &self,
        names: &[String],
        contact: Option<&str>,
        account: Option<&str>,
        challenge_bind: &str,
    ) -> Result<IssuedMaterial, IssuanceError> {
        if names.is_empty() {
            return Err(IssuanceError::NoNames);
        }

        // Bind before touching the directory so a bad bind address fails
        // fast and without network traffic.
        let listener =
            TcpListener::bind(challenge_bind)
                .await
                .map_err(|e| IssuanceError::Bind {
                    address: challenge_bind.to_string(),
                    reason: e.to_string(),
                })?;

        let (account, account_handle) = self.account(contact, account).await?;

        let set = ChallengeSet::new();
        let cancel = CancellationToken::new();
        let responder = tokio::spawn(challenge::serve(listener, set.clone(), cancel.clone()));

        let result = self.run_order(&account, names, &set).await;

        cancel.cancel();
        if let Ok(Err(e)) = responder.await {
            tracing::debug!(error = %e, "Challenge responder exited with error");
        }

        let (full_chain, private_key) = result?;
        let (certificate, chain) = split_chain(&full_chain);

        Ok(IssuedMaterial {
            certificate,
            chain,
            full_chain,
            private_key,
            account: account_handle,
        })
    }
}

/// Split a PEM chain into the leaf certificate and the intermediates.
fn split_chain(full_chain: &str) -> (String, String) {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    match full_chain.match_indices(BEGIN).nth(1) {
        Some((idx, _)) => {
            let mut leaf = full_chain[..idx].trim_end().to_string();
            leaf.push('\n');
            (leaf, full_chain[idx..].to_string())
        }
        None => (full_chain.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = "-----BEGIN CERTIFICATE-----\nbGVhZg==\n-----END CERTIFICATE-----\n";
    const INTERMEDIATE: &str =
        "-----BEGIN CERTIFICATE-----\naW50ZXI=\n-----END CERTIFICATE-----\n";

    #[test]
    fn split_chain_separates_leaf_and_intermediates() {
        let full = format!("{LEAF}{INTERMEDIATE}");
        let (leaf, chain) = split_chain(&full);
        assert_eq!(leaf, LEAF);
        assert_eq!(chain, INTERMEDIATE);
    }

    #[test]
    fn split_chain_single_certificate_has_empty_intermediates() {
        let (leaf, chain) = split_chain(LEAF);
        assert_eq!(leaf, LEAF);
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn empty_name_set_is_rejected() {
        let issuer = AcmeIssuer::new("http://127.0.0.1:1/directory");
        let result = issuer.issue(&[], None, None, "127.0.0.1:0").await;
        assert!(matches!(result, Err(IssuanceError::NoNames)));
    }

    #[tokio::test]
    async fn unusable_bind_address_fails_before_any_network_io() {
        let issuer = AcmeIssuer::new("http://127.0.0.1:1/directory");
        let names = vec!["example.com".to_string()];
        let result = issuer.issue(&names, None, None, "definitely-not-an-address").await;
        assert!(matches!(result, Err(IssuanceError::Bind { .. })));
    }
}
