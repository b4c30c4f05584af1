//! Admin edit service: corrective mutations and dashboard reads

use tracing::{info, warn};

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_non_negative_amount;

/// Administrative operations over users, profiles and clearances
pub struct AdminService<S: ClearanceStorage> {
    storage: S,
}

impl<S: ClearanceStorage> AdminService<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Rename a user; both old values must identify the same record
    pub async fn update_identity(&self, change: &IdentityChange) -> ClearanceResult<()> {
        for (field, value) in [
            ("old email", &change.old_email),
            ("old username", &change.old_username),
            ("new email", &change.new_email),
            ("new username", &change.new_username),
        ] {
            if value.trim().is_empty() {
                return Err(ClearanceError::Validation(format!("{} is required", field)));
            }
        }

        self.storage.update_identity(change).await?;
        info!(
            old_username = %change.old_username,
            new_username = %change.new_username,
            "identity updated"
        );
        Ok(())
    }

    /// Override fee fields directly; values must be non-negative
    pub async fn update_fees(&self, username: &str, fees: &FeeSchedule) -> ClearanceResult<Profile> {
        validate_non_negative_amount(&fees.school_fee_due)?;
        validate_non_negative_amount(&fees.penalty_fee)?;
        validate_non_negative_amount(&fees.excess_fee)?;

        let profile = self.storage.update_fees(username, fees).await?;
        info!(
            username = %profile.username,
            school_fee_due = %profile.school_fee_due,
            penalty_fee = %profile.penalty_fee,
            excess_fee = %profile.excess_fee,
            "fees overridden"
        );
        Ok(profile)
    }

    /// Record a manual clearance without receipts; the penalty is waived
    pub async fn grant_clearance(&self, username: &str) -> ClearanceResult<Clearance> {
        let profile = self
            .storage
            .get_profile(username)
            .await?
            .ok_or_else(|| ClearanceError::ProfileNotFound(username.to_string()))?;

        let settlement = Settlement::admin_grant(&profile);
        let clearance = self.storage.commit_settlement(&settlement).await.map_err(|e| {
            warn!(username, error = %e, "manual clearance failed");
            e
        })?;
        info!(
            username = %profile.username,
            clearance_id = clearance.clearance_id,
            marker = %clearance.receipt_id,
            "manual clearance granted"
        );
        Ok(clearance)
    }

    pub async fn users(&self, search: Option<&str>) -> ClearanceResult<Vec<User>> {
        self.storage.list_users(normalize_search(search)).await
    }

    pub async fn profiles(&self, search: Option<&str>) -> ClearanceResult<Vec<Profile>> {
        self.storage.list_profiles(normalize_search(search)).await
    }

    pub async fn clearances(&self, search: Option<&str>) -> ClearanceResult<Vec<Clearance>> {
        self.storage.list_clearances(normalize_search(search)).await
    }

    pub async fn used_receipts(&self, search: Option<&str>) -> ClearanceResult<Vec<UsedReceipt>> {
        self.storage.list_used_receipts(normalize_search(search)).await
    }
}

/// Blank search terms mean "no filter"
fn normalize_search(search: Option<&str>) -> Option<&str> {
    search.map(str::trim).filter(|s| !s.is_empty())
}
