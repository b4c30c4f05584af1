//! clearance-server: fee clearance HTTP service
//!
//! Serves the profile and admin routes over SQLite storage, reading payments
//! from a Google Sheets ledger.
//!
//! ## Configuration
//! - CLEARANCE_SPREADSHEET_ID: Ledger spreadsheet (required)
//! - CLEARANCE_SHEETS_API_KEY or CLEARANCE_SHEETS_ACCESS_TOKEN: Sheets credential (required)
//! - CLEARANCE_BIND: Listen address (default: 0.0.0.0:5000)
//! - CLEARANCE_DATABASE_URL: SQLite URL (default: sqlite://clearance.db?mode=rwc)
//! - CLEARANCE_LOG: Log filter (default: info)
//!
//! A `.env` file in the working directory is loaded first when present.

use tracing::{error, info};

use fee_clearance::config::{init_tracing, ServiceConfig};
use fee_clearance::http::{self, AppState};
use fee_clearance::storage::SqliteStorage;
use fee_clearance::utils::validation::EnhancedRegistrationValidator;
use fee_clearance::{AdminService, GoogleSheetsReader, ReconciliationEngine, Registrar};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env()?;
    init_tracing();

    let storage = SqliteStorage::connect(&config.database_url).await?;
    storage.init().await?;
    info!(database_url = %config.database_url, "storage ready");

    // Fail fast on a bad credential or spreadsheet id instead of on the first request
    let ledger = GoogleSheetsReader::new(config.sheets_config())?;
    if let Err(e) = ledger.ping(&config.spreadsheet_id).await {
        error!(spreadsheet_id = %config.spreadsheet_id, error = %e, "ledger readiness check failed");
        return Err(e.into());
    }
    info!(spreadsheet_id = %config.spreadsheet_id, range = %config.ledger_range, "ledger reachable");

    let engine =
        ReconciliationEngine::new(storage.clone(), ledger, config.reconciliation_settings());
    let admin = AdminService::new(storage.clone());
    let registrar = Registrar::with_validator(storage, Box::new(EnhancedRegistrationValidator))
        .with_base_school_fee(config.base_school_fee.clone());

    let app = http::app(AppState::new(engine, admin, registrar));
    http::serve(config.bind, app).await?;

    info!("clearance-server stopped");
    Ok(())
}
