//! # Fee Clearance
//!
//! Verifies student fee payments against an external payment ledger and
//! records the clearance that settles a student's outstanding balance.
//!
//! ## Features
//!
//! - **Receipt reconciliation**: Per-receipt statuses, validated totals and an atomic settlement
//! - **Single-use receipts**: A receipt id can settle a balance exactly once, for any user
//! - **Ledger abstraction**: Google Sheets reader plus an in-memory ledger for tests
//! - **Admin edits**: Identity updates, fee overrides and manual clearances
//! - **Storage abstraction**: Trait-based storage with in-memory and SQLite backends
//! - **HTTP surface**: Axum routes for the profile and admin endpoints
//!
//! ## Quick Start
//!
//! ```rust
//! use fee_clearance::{MemoryLedger, MemoryStorage, ReconciliationEngine, ReconciliationSettings};
//!
//! let engine = ReconciliationEngine::new(
//!     MemoryStorage::new(),
//!     MemoryLedger::with_header(),
//!     ReconciliationSettings::new("spreadsheet-id"),
//! );
//! assert_eq!(engine.settings().range, "Sheet1!A:C");
//! ```

pub mod accounts;
pub mod admin;
pub mod config;
pub mod http;
pub mod ledger;
pub mod reconciliation;
#[cfg(feature = "sqlite")]
pub mod storage;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use accounts::Registrar;
pub use admin::AdminService;
pub use config::ServiceConfig;
pub use ledger::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::{MemoryLedger, MemoryStorage};
