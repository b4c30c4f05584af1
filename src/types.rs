//! Core types and data structures for the fee clearance system

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Default school fee assigned to a profile at registration
pub const DEFAULT_SCHOOL_FEE: i64 = 365_000;

/// Prefix for clearance references created by an administrator rather than by receipts
pub const ADMIN_GRANT_PREFIX: &str = "ADMIN-GRANT-";

/// Registered user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique email address
    pub email: String,
    /// Unique login name, also the claimant name expected in the ledger
    pub username: String,
    /// Argon2 PHC string; the plain password is never stored
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Optional unique student registration number
    pub matricule: Option<String>,
    /// When the account was created
    pub created_at: NaiveDateTime,
}

/// Registration input carrying the plain password
#[derive(Clone, PartialEq, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub matricule: Option<String>,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("matricule", &self.matricule)
            .finish()
    }
}

impl NewUser {
    /// Create a new registration request without a matricule
    pub fn new(email: &str, username: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            matricule: None,
        }
    }

    /// Attach a matricule to the registration
    pub fn with_matricule(mut self, matricule: &str) -> Self {
        self.matricule = Some(matricule.to_string());
        self
    }

    /// Materialize the user record with an already computed password hash
    pub fn into_user(self, password_hash: String) -> User {
        User {
            email: self.email,
            username: self.username,
            password_hash,
            matricule: self.matricule,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Per-user financial record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
    pub username: String,
    /// Standing school fee for the current period
    pub school_fee_due: BigDecimal,
    /// Late payment penalty, waived on every settlement
    pub penalty_fee: BigDecimal,
    /// Credit carried forward from earlier overpayments
    pub excess_fee: BigDecimal,
    /// Clearance history, oldest first
    pub used_receipt: Vec<ClearanceEntry>,
    pub graduation_fee_paid: bool,
    pub internship_fee_paid: bool,
    /// Bumped on every mutation; commits only apply against the revision they read
    pub revision: i64,
}

impl Profile {
    /// Create a fresh profile carrying the given base fee
    pub fn new(email: String, username: String, school_fee_due: BigDecimal) -> Self {
        Self {
            email,
            username,
            school_fee_due,
            penalty_fee: BigDecimal::from(0),
            excess_fee: BigDecimal::from(0),
            used_receipt: Vec::new(),
            graduation_fee_paid: false,
            internship_fee_paid: false,
            revision: 0,
        }
    }

    /// Outstanding balance after subtracting carried credit
    pub fn net_amount_due(&self) -> BigDecimal {
        net_amount_due(&self.school_fee_due, &self.penalty_fee, &self.excess_fee)
    }

    /// Current fee fields as a schedule
    pub fn fees(&self) -> FeeSchedule {
        FeeSchedule {
            school_fee_due: self.school_fee_due.clone(),
            penalty_fee: self.penalty_fee.clone(),
            excess_fee: self.excess_fee.clone(),
        }
    }
}

/// `max(0, school_fee_due + penalty_fee - excess_fee)`
pub fn net_amount_due(
    school_fee_due: &BigDecimal,
    penalty_fee: &BigDecimal,
    excess_fee: &BigDecimal,
) -> BigDecimal {
    let net = school_fee_due + penalty_fee - excess_fee;
    if net < BigDecimal::from(0) {
        BigDecimal::from(0)
    } else {
        net
    }
}

/// Fee fields set by an administrator override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub school_fee_due: BigDecimal,
    pub penalty_fee: BigDecimal,
    pub excess_fee: BigDecimal,
}

/// Identity correction applied to both the user and the profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityChange {
    pub old_email: String,
    pub old_username: String,
    pub new_email: String,
    pub new_username: String,
}

/// One clearance event as seen from the profile's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearanceEntry {
    pub clearance_id: i64,
    pub email: String,
    pub receipt_ids: Vec<String>,
}

/// A consumed receipt; a receipt id appears here at most once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedReceipt {
    pub receipt_id: String,
    /// Username of the consuming user
    pub receipt_user: String,
    pub used_at: NaiveDateTime,
}

/// Audit row for a settlement or a manual grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clearance {
    pub clearance_id: i64,
    /// Email of the cleared user
    pub receipt_user: String,
    /// Comma-joined receipt ids, or an admin grant marker
    pub receipt_id: String,
    pub created_at: NaiveDateTime,
}

/// Parsed row of the external payment ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// Column A as written in the sheet
    pub receipt_id: String,
    /// Column B, `None` when it does not parse as a decimal
    pub amount: Option<BigDecimal>,
    /// Column C
    pub claimant: String,
    /// 1-based row number within the read range
    pub row_number: usize,
}

/// Classification of one submitted receipt id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Matched,
    AlreadyUsed,
    NotFound,
    MismatchedUsername,
    InvalidAmount,
    /// Same id submitted more than once in one request
    Duplicate,
    /// Ledger holds several rows for the id and the duplicate policy rejects it
    Ambiguous,
}

impl ReceiptStatus {
    /// User-facing explanation
    pub fn message(&self) -> &'static str {
        match self {
            ReceiptStatus::Matched => "Receipt ID and username matched.",
            ReceiptStatus::AlreadyUsed => "Receipt ID has already been used.",
            ReceiptStatus::NotFound => "Receipt ID not found.",
            ReceiptStatus::MismatchedUsername => "Receipt ID found, but username mismatched.",
            ReceiptStatus::InvalidAmount => "Receipt ID found, but the payment amount is invalid.",
            ReceiptStatus::Duplicate => "Receipt ID was submitted more than once.",
            ReceiptStatus::Ambiguous => {
                "Receipt ID appears more than once in the payment ledger; contact an administrator."
            }
        }
    }
}

/// Per-id result returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptDetail {
    #[serde(rename = "receiptId")]
    pub receipt_id: String,
    pub status: ReceiptStatus,
    pub message: String,
    /// Validated amount, present only for matched ids
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amount: Option<BigDecimal>,
}

impl ReceiptDetail {
    pub fn new(receipt_id: &str, status: ReceiptStatus) -> Self {
        Self {
            receipt_id: receipt_id.to_string(),
            status,
            message: status.message().to_string(),
            amount: None,
        }
    }

    pub fn matched(receipt_id: &str, amount: BigDecimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(receipt_id, ReceiptStatus::Matched)
        }
    }
}

/// Receipt submission for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptClaim {
    pub username: String,
    pub receipt_ids: Vec<String>,
}

impl ReceiptClaim {
    pub fn new(username: &str, receipt_ids: &[&str]) -> Self {
        Self {
            username: username.to_string(),
            receipt_ids: receipt_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// How a reconciliation ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// Nothing was owed; no reads or writes happened
    NoBalanceDue,
    /// Balance covered and state committed
    Settled {
        clearance_id: i64,
        total_validated: BigDecimal,
        amount_due: BigDecimal,
        new_excess_fee: BigDecimal,
    },
    /// Validated receipts do not cover the balance; nothing was written
    InsufficientPayment {
        total_validated: BigDecimal,
        amount_due: BigDecimal,
    },
}

/// Result of a reconciliation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub success: bool,
    pub message: String,
    pub details: Vec<ReceiptDetail>,
    pub outcome: ReconciliationOutcome,
}

impl ReconciliationReport {
    pub fn no_balance_due() -> Self {
        Self {
            success: true,
            message: "No outstanding balance.".to_string(),
            details: Vec::new(),
            outcome: ReconciliationOutcome::NoBalanceDue,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.outcome, ReconciliationOutcome::Settled { .. })
    }

    /// Status of the first detail matching `receipt_id` exactly
    pub fn status_of(&self, receipt_id: &str) -> Option<ReceiptStatus> {
        self.details
            .iter()
            .find(|d| d.receipt_id == receipt_id)
            .map(|d| d.status)
    }
}

/// Atomic write set applied by the storage commit step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub username: String,
    /// Profile revision the decision was computed from
    pub expected_revision: i64,
    /// Canonical receipt ids to mark used; empty for admin grants
    pub receipt_ids: Vec<String>,
    /// Text stored in the clearance row
    pub reference: String,
    /// Excess fee after settlement; the penalty is always waived
    pub excess_fee: BigDecimal,
}

impl Settlement {
    /// Settlement for validated receipts
    pub fn for_receipts(profile: &Profile, receipt_ids: Vec<String>, excess_fee: BigDecimal) -> Self {
        Self {
            username: profile.username.clone(),
            expected_revision: profile.revision,
            reference: receipt_ids.join(","),
            receipt_ids,
            excess_fee,
        }
    }

    /// Manual clearance with a synthetic marker and no receipts
    pub fn admin_grant(profile: &Profile) -> Self {
        Self {
            username: profile.username.clone(),
            expected_revision: profile.revision,
            receipt_ids: Vec::new(),
            reference: format!("{}{}", ADMIN_GRANT_PREFIX, uuid::Uuid::new_v4()),
            excess_fee: profile.excess_fee.clone(),
        }
    }
}

/// Errors that can occur in the clearance system
#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Payment ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("Commit failed after validation: {0}")]
    CommitFailed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClearanceError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ClearanceError::Validation(_) => "validation_error",
            ClearanceError::ProfileNotFound(_) => "profile_not_found",
            ClearanceError::UserNotFound(_) => "user_not_found",
            ClearanceError::LedgerUnavailable(_) => "ledger_unavailable",
            ClearanceError::CommitFailed(_) => "commit_failed",
            ClearanceError::Conflict(_) => "conflict",
            ClearanceError::Storage(_) => "storage_error",
            ClearanceError::Config(_) => "config_error",
        }
    }
}

/// Result type for clearance operations
pub type ClearanceResult<T> = Result<T, ClearanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_amount_due_never_negative() {
        let due = net_amount_due(
            &BigDecimal::from(100),
            &BigDecimal::from(20),
            &BigDecimal::from(500),
        );
        assert_eq!(due, BigDecimal::from(0));

        let due = net_amount_due(
            &BigDecimal::from(365000),
            &BigDecimal::from(5000),
            &BigDecimal::from(35000),
        );
        assert_eq!(due, BigDecimal::from(335000));
    }

    #[test]
    fn test_receipt_detail_wire_shape() {
        let detail = ReceiptDetail::new("R1", ReceiptStatus::MismatchedUsername);
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["receiptId"], "R1");
        assert_eq!(json["status"], "mismatched_username");
        assert!(json.get("amount").is_none());
    }

    #[test]
    fn test_admin_grant_marker() {
        let profile = Profile::new(
            "a@uni.edu".to_string(),
            "alice".to_string(),
            BigDecimal::from(DEFAULT_SCHOOL_FEE),
        );
        let grant = Settlement::admin_grant(&profile);
        assert!(grant.reference.starts_with(ADMIN_GRANT_PREFIX));
        assert!(grant.receipt_ids.is_empty());
        assert_eq!(grant.excess_fee, BigDecimal::from(0));
    }
}
