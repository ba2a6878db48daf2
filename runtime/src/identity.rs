use async_trait::async_trait;
use ordersight_core::identity::{Identity, SessionContext};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::DirectoryConfig;

/// Maps a session to the user behind it. Best effort: `None` means "unknown user",
/// which downstream treats exactly like "no permissions".
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, session: &SessionContext) -> Option<Identity>;
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token request failed: {0}")]
    TokenRequest(#[source] reqwest::Error),
    #[error("token endpoint returned status {0}")]
    TokenStatus(StatusCode),
    #[error("token response did not contain an access token")]
    MissingAccessToken,
    #[error("directory request failed: {0}")]
    DirectoryRequest(#[source] reqwest::Error),
    #[error("directory returned status {0}")]
    DirectoryStatus(StatusCode),
    #[error("directory user has no mail address")]
    MissingMail,
    #[error("invalid directory url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    #[serde(default)]
    mail: Option<String>,
}

/// Client-credentials token, then a directory lookup by object id.
pub struct GraphIdentityResolver {
    http: reqwest::Client,
    config: DirectoryConfig,
}

impl GraphIdentityResolver {
    pub fn new(http: reqwest::Client, config: DirectoryConfig) -> Self {
        Self { http, config }
    }

    fn scope(&self) -> String {
        format!("{}/.default", self.config.graph_base.trim_end_matches('/'))
    }

    async fn acquire_token(&self) -> Result<String, IdentityError> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_base.trim_end_matches('/'),
            self.config.tenant_id
        );
        let scope = self.scope();
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(IdentityError::TokenRequest)?;

        if !response.status().is_success() {
            return Err(IdentityError::TokenStatus(response.status()));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(IdentityError::TokenRequest)?;
        token
            .access_token
            .filter(|value| !value.is_empty())
            .ok_or(IdentityError::MissingAccessToken)
    }

    fn user_url(&self, object_id: &str) -> Result<reqwest::Url, IdentityError> {
        let mut url = reqwest::Url::parse(&self.config.graph_base)
            .map_err(|e| IdentityError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| IdentityError::InvalidUrl(self.config.graph_base.clone()))?
            .pop_if_empty()
            .extend(["v1.0", "users", object_id]);
        Ok(url)
    }

    /// Typed variant of [`IdentityResolver::resolve`] for callers that need the failure reason.
    pub async fn try_resolve(&self, object_id: &str) -> Result<Identity, IdentityError> {
        let token = self.acquire_token().await?;
        let response = self
            .http
            .get(self.user_url(object_id)?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(IdentityError::DirectoryRequest)?;

        if response.status() != StatusCode::OK {
            return Err(IdentityError::DirectoryStatus(response.status()));
        }
        let user: DirectoryUser = response
            .json()
            .await
            .map_err(IdentityError::DirectoryRequest)?;
        let email = user
            .mail
            .map(|mail| mail.trim().to_string())
            .filter(|mail| !mail.is_empty())
            .ok_or(IdentityError::MissingMail)?;

        Ok(Identity {
            object_id: object_id.to_string(),
            email,
        })
    }
}

#[async_trait]
impl IdentityResolver for GraphIdentityResolver {
    async fn resolve(&self, session: &SessionContext) -> Option<Identity> {
        let Some(object_id) = session.directory_id() else {
            tracing::warn!(
                conversation_id = session.conversation_id.as_deref().unwrap_or("<none>"),
                "no directory object id on session"
            );
            return None;
        };

        match self.try_resolve(object_id).await {
            Ok(identity) => {
                tracing::info!(email = %identity.email, "resolved session identity");
                Some(identity)
            }
            Err(err) => {
                tracing::warn!(object_id, error = %err, "identity resolution failed");
                None
            }
        }
    }
}
