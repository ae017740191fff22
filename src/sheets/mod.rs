// src/sheets/mod.rs

pub mod auth;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

pub use auth::{ServiceAccountKey, ServiceAccountTokens, TokenSource, SHEETS_READONLY_SCOPE};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// Rows of cell values, as returned by the values endpoint.
pub type Grid = Vec<Vec<Value>>;

/// Anything that can hand over a rectangular range of cells.
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Fetch `range` in one shot: the full grid or an error.
    async fn fetch(&self, range: &str) -> Result<Grid>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Grid,
}

/// Google Sheets API v4 client bound to one spreadsheet.
pub struct SheetsClient {
    client: Client,
    base: Url,
    spreadsheet_id: String,
    tokens: Arc<dyn TokenSource>,
}

impl SheetsClient {
    pub fn new(
        client: Client,
        base: &str,
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("parsing Sheets API base {}", base))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("Sheets API base {} cannot be a base URL", base));
        }
        Ok(Self {
            client,
            base,
            spreadsheet_id: spreadsheet_id.into(),
            tokens,
        })
    }

    /// Build the production client from a raw service-account JSON payload.
    pub fn from_service_account(
        client: Client,
        spreadsheet_id: impl Into<String>,
        credential_json: &str,
    ) -> Result<Self> {
        let key = ServiceAccountKey::from_json(credential_json)?;
        let tokens = ServiceAccountTokens::new(client.clone(), key, SHEETS_READONLY_SCOPE)?;
        Self::new(client, SHEETS_API_BASE, spreadsheet_id, Arc::new(tokens))
    }

    fn values_url(&self, range: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", range]);
        }
        url
    }

    async fn get_values(&self, url: &Url) -> Result<Response> {
        let token = self.tokens.token().await.context("authorizing Sheets request")?;
        self.client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("GET {}", url))
    }
}

#[async_trait]
impl SheetSource for SheetsClient {
    #[instrument(level = "info", skip(self), fields(spreadsheet = %self.spreadsheet_id))]
    async fn fetch(&self, range: &str) -> Result<Grid> {
        let url = self.values_url(range);

        let mut resp = self.get_values(&url).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("Sheets API returned 401; re-authorizing");
            self.tokens.invalidate().await;
            resp = self.get_values(&url).await?;
        }

        let body: ValueRange = resp
            .error_for_status()
            .with_context(|| format!("reading range {}", range))?
            .json()
            .await
            .context("decoding Sheets value range")?;
        debug!(rows = body.values.len(), "fetched range");
        Ok(body.values)
    }
}
