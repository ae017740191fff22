// src/sheets/auth.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Hands out bearer tokens for the Sheets API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;

    /// Drop any cached token; the next `token()` re-authorizes.
    async fn invalidate(&self) {}
}

/// The fields of a Google service-account key file that we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parsing service-account credential JSON")
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Service-account token exchange with an in-memory cache.
pub struct ServiceAccountTokens {
    client: Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(client: Client, key: ServiceAccountKey, scope: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service-account private_key is not a valid RSA PEM")?;
        Ok(Self {
            client,
            key,
            encoding_key,
            scope: scope.to_string(),
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .context("signing token assertion")
    }

    #[instrument(level = "info", skip(self), fields(account = %self.key.client_email))]
    async fn exchange(&self) -> Result<CachedToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        let resp: TokenResponse = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .with_context(|| format!("POST {}", self.key.token_uri))?
            .error_for_status()
            .context("token endpoint refused service-account assertion")?
            .json()
            .await
            .context("decoding token response")?;
        info!(expires_in = resp.expires_in, "access token refreshed");
        Ok(CachedToken {
            access_token: resp.access_token,
            expires_at: now + Duration::seconds(resp.expires_in),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let fresh_until = Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS);
        if let Some(tok) = cached.as_ref() {
            if tok.expires_at > fresh_until {
                return Ok(tok.access_token.clone());
            }
            debug!("cached token near expiry");
        }
        let tok = self.exchange().await?;
        let access = tok.access_token.clone();
        *cached = Some(tok);
        Ok(access)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
