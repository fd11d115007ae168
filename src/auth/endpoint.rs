//! HTTP token endpoint.
//!
//! Refreshes via `POST {hass_url}/auth/token` (form encoded,
//! `grant_type=refresh_token`) and revokes via `POST {hass_url}/auth/revoke`.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::credential::expiry_from_now;
use super::{Credential, TokenEndpoint};

// ============================================================================
// TokenResponse
// ============================================================================

/// Body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

// ============================================================================
// HttpTokenEndpoint
// ============================================================================

/// [`TokenEndpoint`] backed by the server's OAuth token API.
#[derive(Debug, Clone, Default)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    /// Origin of the embedding application, when it has one.
    origin: Option<Url>,
}

impl HttpTokenEndpoint {
    /// Creates an endpoint with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Declares the origin the tokens are requested from.
    ///
    /// An `https` origin refuses to talk to a plain-http server that is not
    /// `localhost`.
    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Checks that tokens may be sent to `hass_url` from the configured origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHttpsToHttp`] for an https → http downgrade.
    pub fn check_target(&self, hass_url: &Url) -> Result<()> {
        let secure_origin = self
            .origin
            .as_ref()
            .is_some_and(|origin| origin.scheme() == "https");

        if secure_origin
            && hass_url.scheme() == "http"
            && hass_url.host_str() != Some("localhost")
        {
            return Err(Error::InvalidHttpsToHttp);
        }
        Ok(())
    }

    async fn post_form(
        &self,
        credential: &Credential,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let base = Url::parse(&credential.hass_url)?;
        self.check_target(&base)?;
        let url = Url::parse(&format!("{}{path}", credential.hass_url))?;

        let mut fields: Vec<(&str, &str)> = Vec::with_capacity(form.len() + 1);
        if let Some(client_id) = credential.client_id.as_deref() {
            fields.push(("client_id", client_id));
        }
        fields.extend_from_slice(form);

        debug!(%url, "Posting to token endpoint");
        Ok(self.client.post(url).form(&fields).send().await?)
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let response = self
            .post_form(
                credential,
                "/auth/token",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", credential.refresh_token.as_str()),
                ],
            )
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN {
            return Err(Error::invalid_auth(format!("Token endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::connection(format!(
                "Unable to fetch tokens: {status}"
            )));
        }

        let tokens: TokenResponse = response.json().await?;
        Ok(Credential::expiring_at(
            credential.hass_url.clone(),
            credential.client_id.clone(),
            tokens.access_token,
            expiry_from_now(tokens.expires_in)?,
            tokens
                .refresh_token
                .unwrap_or_else(|| credential.refresh_token.clone()),
        ))
    }

    async fn revoke(&self, credential: &Credential) -> Result<()> {
        self.post_form(
            credential,
            "/auth/revoke",
            &[("token", credential.refresh_token.as_str())],
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
