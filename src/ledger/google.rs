//! Google Sheets implementation of [`LedgerReader`]
//!
//! Reads the `values` of a range through the Sheets v4 REST API. The client
//! is constructed explicitly with its credential and timeout, and can be
//! probed with [`GoogleSheetsReader::ping`] before serving traffic.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ledger::LedgerReadError;
use crate::traits::LedgerReader;

/// Default Sheets API endpoint
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Credential attached to every Sheets request
#[derive(Clone)]
pub enum SheetsCredential {
    /// `?key=` query parameter, for sheets shared by link
    ApiKey(String),
    /// OAuth bearer token, for private sheets
    AccessToken(String),
}

impl std::fmt::Debug for SheetsCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetsCredential::ApiKey(_) => f.write_str("ApiKey(***)"),
            SheetsCredential::AccessToken(_) => f.write_str("AccessToken(***)"),
        }
    }
}

/// Sheets reader configuration
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub base_url: String,
    pub credential: Option<SheetsCredential>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            credential: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl SheetsConfig {
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_credential(mut self, credential: SheetsCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Body of `spreadsheets.values.get`
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Ledger reader backed by the Google Sheets values API
#[derive(Debug, Clone)]
pub struct GoogleSheetsReader {
    client: Client,
    base_url: Url,
    credential: SheetsCredential,
}

impl GoogleSheetsReader {
    /// Create a reader; fails if no credential is configured or the base URL is invalid
    pub fn new(config: SheetsConfig) -> Result<Self, LedgerReadError> {
        let credential = config.credential.ok_or_else(|| {
            LedgerReadError::NotConfigured("a Sheets API key or access token is required".to_string())
        })?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            LedgerReadError::InvalidReference(format!("base url '{}': {}", config.base_url, e))
        })?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url,
            credential,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LedgerReadError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                LedgerReadError::InvalidReference(format!(
                    "base url '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        if let SheetsCredential::ApiKey(key) = &self.credential {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            SheetsCredential::AccessToken(token) => request.bearer_auth(token),
            SheetsCredential::ApiKey(_) => request,
        }
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, LedgerReadError> {
        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "ledger request rejected");
            return Err(LedgerReadError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Readiness probe: fetch the spreadsheet's metadata
    pub async fn ping(&self, source_id: &str) -> Result<(), LedgerReadError> {
        if source_id.trim().is_empty() {
            return Err(LedgerReadError::InvalidReference(
                "spreadsheet id cannot be empty".to_string(),
            ));
        }
        let mut url = self.endpoint(&["v4", "spreadsheets", source_id])?;
        url.query_pairs_mut().append_pair("fields", "spreadsheetId");
        self.get(url).await?;
        debug!(source_id, "ledger source reachable");
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for GoogleSheetsReader {
    async fn read_range(
        &self,
        source_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, LedgerReadError> {
        if source_id.trim().is_empty() || range.trim().is_empty() {
            return Err(LedgerReadError::InvalidReference(
                "spreadsheet id and range are required".to_string(),
            ));
        }

        let url = self.endpoint(&["v4", "spreadsheets", source_id, "values", range])?;
        let body: ValueRange = self.get(url).await?.json().await?;

        let rows: Vec<Vec<String>> = body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        debug!(source_id, range, rows = rows.len(), "ledger range read");
        Ok(rows)
    }
}
