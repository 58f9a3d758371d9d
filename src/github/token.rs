//! Installation token caching for GitHub App authentication.
//!
//! GitHub Apps authenticate in two steps: a short-lived RS256 JWT signed
//! with the app's private key proves app identity, and is exchanged for a
//! per-installation access token good for about an hour. Tokens are cached
//! per installation and refreshed once they come within five minutes of
//! expiry.
//!
//! The cache is process-scoped and injected into the client; each process
//! instance re-derives its own tokens.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::error::GitHubApiError;
use super::throttle::Throttler;
use crate::types::InstallationId;

/// Tokens within this margin of expiry are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 5 * 60;

/// App-level calls (token minting itself) are throttled under this synthetic
/// installation id, separate from every real installation's budget.
const APP_INSTALLATION: InstallationId = InstallationId(0);

#[derive(Debug, Serialize)]
struct AppClaims {
    iss: u64,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Whether a token with this expiry is still usable at `now`.
fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - now > ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
}

/// Process-wide map from installation to its current access token.
pub struct TokenCache {
    http: reqwest::Client,
    api_base: String,
    app_id: u64,
    encoding_key: EncodingKey,
    throttler: Arc<Throttler>,
    tokens: Mutex<HashMap<InstallationId, CachedToken>>,
}

impl TokenCache {
    /// Creates a cache for the given app. `private_key_pem` is the RSA key
    /// GitHub issued for the app.
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        app_id: u64,
        private_key_pem: &str,
        throttler: Arc<Throttler>,
    ) -> Result<Self, GitHubApiError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| GitHubApiError::permanent("app jwt", format!("invalid RSA key: {e}")))?;
        Ok(TokenCache {
            http,
            api_base: api_base.into(),
            app_id,
            encoding_key,
            throttler,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Signs a fresh app JWT: 10-minute expiry, issued 60s in the past to
    /// absorb clock skew.
    fn generate_jwt(&self) -> Result<String, GitHubApiError> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iss: self.app_id,
            iat: now - 60,
            exp: now + 600,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| GitHubApiError::permanent("app jwt", e.to_string()))
    }

    /// Returns a usable installation token, minting one if the cached token
    /// is missing or stale.
    pub async fn get(&self, installation: InstallationId) -> Result<String, GitHubApiError> {
        {
            let tokens = self.tokens.lock().await;
            if let Some(cached) = tokens.get(&installation)
                && is_fresh(cached.expires_at, Utc::now())
            {
                return Ok(cached.token.clone());
            }
        }

        let method = format!("POST app/installations/{installation}/access_tokens");
        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation
        );

        self.throttler.acquire(APP_INSTALLATION).await;
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "automerge-bot")
            .send()
            .await
            .map_err(|e| GitHubApiError::from_transport(&method, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GitHubApiError::from_transport(&method, &e))?;
        if !status.is_success() {
            return Err(GitHubApiError::from_response(&method, status.as_u16(), &body));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| GitHubApiError::permanent(&method, format!("bad token response: {e}")))?;

        info!(%installation, "minted installation access token");
        let mut tokens = self.tokens.lock().await;
        tokens.insert(
            installation,
            CachedToken {
                token: parsed.token.clone(),
                expires_at: parsed.expires_at,
            },
        );
        Ok(parsed.token)
    }
}
