//! Service configuration read from the environment

use bigdecimal::BigDecimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::ledger::{
    DuplicatePolicy, LedgerLayout, SheetsConfig, SheetsCredential, DEFAULT_SHEETS_BASE_URL,
};
use crate::reconciliation::{ReconciliationSettings, DEFAULT_LEDGER_RANGE};
use crate::types::{ClearanceError, ClearanceResult, DEFAULT_SCHOOL_FEE};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "CLEARANCE_LOG";

/// Initialize tracing with the `CLEARANCE_LOG` environment variable.
///
/// Defaults to "info" level if `CLEARANCE_LOG` is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

const MIN_LEDGER_TIMEOUT_SECS: u64 = 5;
const MAX_LEDGER_TIMEOUT_SECS: u64 = 30;

/// Full service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub database_url: String,
    pub spreadsheet_id: String,
    pub ledger_range: String,
    pub ledger_header_rows: usize,
    pub ledger_timeout: Duration,
    pub duplicate_policy: DuplicatePolicy,
    pub sheets_base_url: String,
    pub sheets_credential: Option<SheetsCredential>,
    pub base_school_fee: BigDecimal,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            database_url: "sqlite://clearance.db?mode=rwc".to_string(),
            spreadsheet_id: String::new(),
            ledger_range: DEFAULT_LEDGER_RANGE.to_string(),
            ledger_header_rows: 1,
            ledger_timeout: Duration::from_secs(MAX_LEDGER_TIMEOUT_SECS),
            duplicate_policy: DuplicatePolicy::default(),
            sheets_base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            sheets_credential: None,
            base_school_fee: BigDecimal::from(DEFAULT_SCHOOL_FEE),
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables, loading `.env` first if present
    ///
    /// - `CLEARANCE_SPREADSHEET_ID`: Required ledger spreadsheet
    /// - `CLEARANCE_SHEETS_API_KEY` or `CLEARANCE_SHEETS_ACCESS_TOKEN`: Required credential
    /// - `CLEARANCE_BIND`, `CLEARANCE_DATABASE_URL`, `CLEARANCE_LEDGER_RANGE`,
    ///   `CLEARANCE_LEDGER_HEADER_ROWS`, `CLEARANCE_LEDGER_TIMEOUT_SECS`,
    ///   `CLEARANCE_LEDGER_DUPLICATES`, `CLEARANCE_SHEETS_BASE_URL`,
    ///   `CLEARANCE_BASE_SCHOOL_FEE`: Optional overrides
    pub fn from_env() -> ClearanceResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ClearanceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        config.spreadsheet_id = get("CLEARANCE_SPREADSHEET_ID").ok_or_else(|| {
            ClearanceError::Config("CLEARANCE_SPREADSHEET_ID not set".to_string())
        })?;

        config.sheets_credential = match (
            get("CLEARANCE_SHEETS_ACCESS_TOKEN"),
            get("CLEARANCE_SHEETS_API_KEY"),
        ) {
            (Some(token), _) => Some(SheetsCredential::AccessToken(token)),
            (None, Some(key)) => Some(SheetsCredential::ApiKey(key)),
            (None, None) => {
                return Err(ClearanceError::Config(
                    "CLEARANCE_SHEETS_ACCESS_TOKEN or CLEARANCE_SHEETS_API_KEY must be set"
                        .to_string(),
                ))
            }
        };

        if let Some(bind) = get("CLEARANCE_BIND") {
            config.bind = parse_var("CLEARANCE_BIND", &bind)?;
        }
        if let Some(url) = get("CLEARANCE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(range) = get("CLEARANCE_LEDGER_RANGE") {
            config.ledger_range = range;
        }
        if let Some(rows) = get("CLEARANCE_LEDGER_HEADER_ROWS") {
            config.ledger_header_rows = parse_var("CLEARANCE_LEDGER_HEADER_ROWS", &rows)?;
        }
        if let Some(secs) = get("CLEARANCE_LEDGER_TIMEOUT_SECS") {
            let secs: u64 = parse_var("CLEARANCE_LEDGER_TIMEOUT_SECS", &secs)?;
            config.ledger_timeout = clamp_ledger_timeout(secs);
        }
        if let Some(policy) = get("CLEARANCE_LEDGER_DUPLICATES") {
            config.duplicate_policy = DuplicatePolicy::from_str(&policy)?;
        }
        if let Some(url) = get("CLEARANCE_SHEETS_BASE_URL") {
            config.sheets_base_url = url;
        }
        if let Some(fee) = get("CLEARANCE_BASE_SCHOOL_FEE") {
            config.base_school_fee = parse_var("CLEARANCE_BASE_SCHOOL_FEE", &fee)?;
        }

        Ok(config)
    }

    /// Set the ledger read timeout (clamped to 5..=30 seconds)
    pub fn with_ledger_timeout(mut self, timeout: Duration) -> Self {
        self.ledger_timeout = clamp_ledger_timeout(timeout.as_secs());
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Settings for the reconciliation engine
    pub fn reconciliation_settings(&self) -> ReconciliationSettings {
        ReconciliationSettings::new(&self.spreadsheet_id)
            .with_range(&self.ledger_range)
            .with_layout(LedgerLayout::default().with_header_rows(self.ledger_header_rows))
            .with_duplicate_policy(self.duplicate_policy)
            .with_ledger_timeout(self.ledger_timeout)
    }

    /// Configuration for the Google Sheets reader
    pub fn sheets_config(&self) -> SheetsConfig {
        let config = SheetsConfig::default()
            .with_base_url(&self.sheets_base_url)
            .with_timeout(self.ledger_timeout);
        match &self.sheets_credential {
            Some(credential) => config.with_credential(credential.clone()),
            None => config,
        }
    }
}

fn clamp_ledger_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_LEDGER_TIMEOUT_SECS, MAX_LEDGER_TIMEOUT_SECS))
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> ClearanceResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ClearanceError::Config(format!("{} has invalid value '{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_required_values() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("CLEARANCE_SPREADSHEET_ID", "sheet-1"),
            ("CLEARANCE_SHEETS_API_KEY", "key"),
        ]))
        .unwrap();

        assert_eq!(config.ledger_range, "Sheet1!A:C");
        assert_eq!(config.ledger_timeout, Duration::from_secs(30));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::LastWins);
        assert_eq!(config.base_school_fee, BigDecimal::from(365000));
        assert!(matches!(config.sheets_credential, Some(SheetsCredential::ApiKey(_))));

        let settings = config.reconciliation_settings();
        assert_eq!(settings.source_id, "sheet-1");
        assert_eq!(settings.layout.header_rows, 1);
    }

    #[test]
    fn test_overrides_and_clamping() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("CLEARANCE_SPREADSHEET_ID", "sheet-1"),
            ("CLEARANCE_SHEETS_ACCESS_TOKEN", "token"),
            ("CLEARANCE_SHEETS_API_KEY", "ignored"),
            ("CLEARANCE_LEDGER_TIMEOUT_SECS", "120"),
            ("CLEARANCE_LEDGER_DUPLICATES", "reject"),
            ("CLEARANCE_BIND", "127.0.0.1:8080"),
            ("CLEARANCE_BASE_SCHOOL_FEE", "400000"),
        ]))
        .unwrap();

        assert_eq!(config.ledger_timeout, Duration::from_secs(30));
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.bind.port(), 8080);
        assert!(matches!(config.sheets_credential, Some(SheetsCredential::AccessToken(_))));

        let short = config.with_ledger_timeout(Duration::from_secs(1));
        assert_eq!(short.ledger_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_required_values() {
        let missing_sheet = ServiceConfig::from_lookup(lookup(&[("CLEARANCE_SHEETS_API_KEY", "k")]));
        assert!(matches!(missing_sheet, Err(ClearanceError::Config(_))));

        let missing_credential =
            ServiceConfig::from_lookup(lookup(&[("CLEARANCE_SPREADSHEET_ID", "sheet-1")]));
        assert!(matches!(missing_credential, Err(ClearanceError::Config(_))));

        let bad_policy = ServiceConfig::from_lookup(lookup(&[
            ("CLEARANCE_SPREADSHEET_ID", "sheet-1"),
            ("CLEARANCE_SHEETS_API_KEY", "k"),
            ("CLEARANCE_LEDGER_DUPLICATES", "newest"),
        ]));
        assert!(matches!(bad_policy, Err(ClearanceError::Config(_))));
    }
}
