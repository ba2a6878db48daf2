use async_trait::async_trait;
use ordersight_core::identity::Identity;
use ordersight_core::partition::PartitionSet;
use serde::Deserialize;
use thiserror::Error;

use crate::config::AuthorizationConfig;
use crate::http::{HttpError, RetryPolicy};

/// Maps an identity to the partitions it may read.
///
/// Fail closed: any failure yields the empty set, never "all access".
#[async_trait]
pub trait AuthorizationLookup: Send + Sync {
    async fn authorize(&self, identity: &Identity) -> PartitionSet;
}

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("invalid authorization url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("malformed authorization response: {0}")]
    Malformed(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct AuthorizedPartition {
    id: i64,
}

/// GET `{base_url}{email}` with the static `Token` header, under the retry policy.
pub struct HttpAuthorizationLookup {
    http: reqwest::Client,
    config: AuthorizationConfig,
    retry: RetryPolicy,
}

impl HttpAuthorizationLookup {
    pub fn new(http: reqwest::Client, config: AuthorizationConfig) -> Self {
        Self {
            http,
            config,
            retry: RetryPolicy::authorization_default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, email: &str) -> Result<reqwest::Request, AuthorizationError> {
        let url = reqwest::Url::parse(&format!("{}{}", self.config.base_url, email))
            .map_err(|e| AuthorizationError::InvalidUrl(e.to_string()))?;
        self.http
            .get(url)
            .header("Token", &self.config.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| AuthorizationError::InvalidUrl(e.to_string()))
    }

    /// Typed variant of [`AuthorizationLookup::authorize`].
    pub async fn try_authorize(&self, email: &str) -> Result<PartitionSet, AuthorizationError> {
        let request = self.request(email)?;
        let response = self.retry.send(&self.http, request).await?;
        let partitions: Vec<AuthorizedPartition> = response
            .json()
            .await
            .map_err(AuthorizationError::Malformed)?;
        Ok(partitions.into_iter().map(|p| p.id).collect())
    }
}

#[async_trait]
impl AuthorizationLookup for HttpAuthorizationLookup {
    async fn authorize(&self, identity: &Identity) -> PartitionSet {
        match self.try_authorize(&identity.email).await {
            Ok(partitions) => {
                tracing::info!(
                    email = %identity.email,
                    partitions = ?partitions,
                    "authorized partitions"
                );
                partitions
            }
            Err(err) => {
                tracing::warn!(
                    email = %identity.email,
                    error = %err,
                    "authorization lookup failed; treating as no access"
                );
                PartitionSet::empty()
            }
        }
    }
}
