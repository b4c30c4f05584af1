//! Ledger Reader adapter: the external payment spreadsheet
//!
//! [`sheet`] turns raw rows into [`LedgerRow`](crate::types::LedgerRow)s and
//! a lookup keyed by normalized receipt id; [`google`] fetches raw rows over
//! HTTP from the Google Sheets values API.

pub mod google;
pub mod sheet;

pub use google::*;
pub use sheet::*;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::ClearanceError;

/// Errors raised while reading the external ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerReadError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Ledger service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Ledger read timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Invalid ledger reference: {0}")]
    InvalidReference(String),
    #[error("Ledger reader not configured: {0}")]
    NotConfigured(String),
    #[error("Ledger source failure: {0}")]
    Source(String),
}

impl From<LedgerReadError> for ClearanceError {
    fn from(err: LedgerReadError) -> Self {
        ClearanceError::LedgerUnavailable(err.to_string())
    }
}

/// Resolution of several ledger rows carrying the same receipt id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The row read last wins
    #[default]
    LastWins,
    /// The row read first wins
    FirstWins,
    /// The id is refused and classifies as ambiguous
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = ClearanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "last" | "last_wins" => Ok(DuplicatePolicy::LastWins),
            "first" | "first_wins" => Ok(DuplicatePolicy::FirstWins),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(ClearanceError::Config(format!(
                "Unknown duplicate policy '{}', expected last, first or reject",
                other
            ))),
        }
    }
}
