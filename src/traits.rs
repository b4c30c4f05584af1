//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::ledger::LedgerReadError;
use crate::types::*;
use crate::utils::normalize::normalize_key;

/// External tabular data source holding payment receipts
///
/// Implementations return raw rows without enforcing any schema. An empty
/// range yields an empty list rather than an error.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Bulk read of a range such as `Sheet1!A:C`
    async fn read_range(
        &self,
        source_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, LedgerReadError>;
}

/// Durable per-user financial records
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Get a profile by username (case-insensitive)
    async fn get_profile(&self, username: &str) -> ClearanceResult<Option<Profile>>;

    /// List profiles, optionally filtered by a substring of email or username
    async fn list_profiles(&self, search: Option<&str>) -> ClearanceResult<Vec<Profile>>;

    /// Override fee fields; returns the updated profile
    async fn update_fees(&self, username: &str, fees: &FeeSchedule) -> ClearanceResult<Profile>;
}

/// Durable record of consumed receipt ids
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// All receipts consumed by a user
    async fn used_receipts_for_user(&self, username: &str) -> ClearanceResult<Vec<UsedReceipt>>;

    /// The subset of `receipt_ids` consumed by anyone (case-insensitive)
    async fn find_used_receipts(&self, receipt_ids: &[String]) -> ClearanceResult<Vec<UsedReceipt>>;

    /// List used receipts, optionally filtered by a substring of user or id
    async fn list_used_receipts(&self, search: Option<&str>) -> ClearanceResult<Vec<UsedReceipt>>;
}

/// Storage abstraction for the clearance system
///
/// This trait allows the reconciliation engine and admin service to work
/// with any storage backend (SQLite, in-memory, etc.).
#[async_trait]
pub trait ClearanceStorage: ProfileStore + UsageStore {
    /// Create a user and its profile together
    async fn register_user(&self, user: &User, profile: &Profile) -> ClearanceResult<()>;

    /// Get a user by username (case-insensitive)
    async fn get_user(&self, username: &str) -> ClearanceResult<Option<User>>;

    /// List users, optionally filtered by a substring of email, username or matricule
    async fn list_users(&self, search: Option<&str>) -> ClearanceResult<Vec<User>>;

    /// Rename a user and its profile; both old values must match the same record
    async fn update_identity(&self, change: &IdentityChange) -> ClearanceResult<()>;

    /// Apply a settlement atomically
    ///
    /// Inserts the clearance row, appends the profile history entry, waives
    /// the penalty, sets the excess fee, and records every receipt id as
    /// used. Either all of it is visible afterwards or none of it is.
    /// Fails if the profile revision differs from `expected_revision` or a
    /// receipt id is already recorded.
    async fn commit_settlement(&self, settlement: &Settlement) -> ClearanceResult<Clearance>;

    /// List clearances, optionally filtered by a substring of user or reference
    async fn list_clearances(&self, search: Option<&str>) -> ClearanceResult<Vec<Clearance>>;
}

/// Trait for implementing custom receipt submission rules
pub trait RequestValidator: Send + Sync {
    /// Validate a submission before any I/O happens
    fn validate_claim(&self, claim: &ReceiptClaim) -> ClearanceResult<()>;
}

/// Trait for implementing custom registration rules
pub trait RegistrationValidator: Send + Sync {
    /// Validate a registration before saving
    fn validate_registration(&self, user: &NewUser) -> ClearanceResult<()>;
}

/// Default request validator: a username and at least one receipt id
pub struct DefaultRequestValidator;

impl RequestValidator for DefaultRequestValidator {
    fn validate_claim(&self, claim: &ReceiptClaim) -> ClearanceResult<()> {
        if claim.username.trim().is_empty() {
            return Err(ClearanceError::Validation(
                "Username is required".to_string(),
            ));
        }

        if claim.receipt_ids.is_empty() {
            return Err(ClearanceError::Validation(
                "At least one receipt ID is required".to_string(),
            ));
        }

        if claim.receipt_ids.iter().any(|id| normalize_key(id).is_empty()) {
            return Err(ClearanceError::Validation(
                "Receipt IDs cannot be blank".to_string(),
            ));
        }

        Ok(())
    }
}

/// Default registration validator with basic rules
pub struct DefaultRegistrationValidator;

impl RegistrationValidator for DefaultRegistrationValidator {
    fn validate_registration(&self, user: &NewUser) -> ClearanceResult<()> {
        if user.email.trim().is_empty() {
            return Err(ClearanceError::Validation(
                "Email cannot be empty".to_string(),
            ));
        }

        if user.username.trim().is_empty() {
            return Err(ClearanceError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }

        if user.password.is_empty() {
            return Err(ClearanceError::Validation(
                "Password cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
