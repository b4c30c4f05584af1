//! Reconciliation engine: validates receipt claims and settles balances

use bigdecimal::BigDecimal;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::ledger::{DuplicatePolicy, LedgerIndex, LedgerLayout, LedgerReadError};
use crate::reconciliation::classify::classify_receipts;
use crate::traits::*;
use crate::types::*;
use crate::utils::normalize::normalize_key;

/// Default range holding receipt id, amount and claimant
pub const DEFAULT_LEDGER_RANGE: &str = "Sheet1!A:C";

/// Where and how the engine reads the payment ledger
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationSettings {
    /// Spreadsheet id
    pub source_id: String,
    pub range: String,
    pub layout: LedgerLayout,
    pub duplicate_policy: DuplicatePolicy,
    /// Upper bound on one ledger read
    pub ledger_timeout: Duration,
}

impl ReconciliationSettings {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            range: DEFAULT_LEDGER_RANGE.to_string(),
            layout: LedgerLayout::default(),
            duplicate_policy: DuplicatePolicy::default(),
            ledger_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_range(mut self, range: &str) -> Self {
        self.range = range.to_string();
        self
    }

    pub fn with_layout(mut self, layout: LedgerLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_ledger_timeout(mut self, timeout: Duration) -> Self {
        self.ledger_timeout = timeout;
        self
    }
}

/// Orchestrates the ledger reader, usage store and profile store
///
/// Everything up to the commit is read-only; the commit is the single
/// mutation and is delegated to [`ClearanceStorage::commit_settlement`].
pub struct ReconciliationEngine<S: ClearanceStorage, L: LedgerReader> {
    storage: S,
    ledger: L,
    validator: Box<dyn RequestValidator>,
    settings: ReconciliationSettings,
}

impl<S: ClearanceStorage, L: LedgerReader> ReconciliationEngine<S, L> {
    /// Create a new engine with the default request validator
    pub fn new(storage: S, ledger: L, settings: ReconciliationSettings) -> Self {
        Self {
            storage,
            ledger,
            validator: Box::new(DefaultRequestValidator),
            settings,
        }
    }

    /// Create a new engine with a custom request validator
    pub fn with_validator(
        storage: S,
        ledger: L,
        settings: ReconciliationSettings,
        validator: Box<dyn RequestValidator>,
    ) -> Self {
        Self {
            storage,
            ledger,
            validator,
            settings,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn settings(&self) -> &ReconciliationSettings {
        &self.settings
    }

    /// Validate `receipt_ids` for `username` and settle the balance when covered
    ///
    /// Returns `Ok` for both settled and insufficient outcomes; the report's
    /// `success` flag tells them apart. Errors are whole-operation failures.
    pub async fn reconcile(
        &self,
        username: &str,
        receipt_ids: &[String],
    ) -> ClearanceResult<ReconciliationReport> {
        let claim = ReceiptClaim {
            username: username.to_string(),
            receipt_ids: receipt_ids.to_vec(),
        };
        self.validator.validate_claim(&claim)?;

        let profile = self
            .storage
            .get_profile(username)
            .await?
            .ok_or_else(|| ClearanceError::ProfileNotFound(username.to_string()))?;

        let amount_due = profile.net_amount_due();
        if amount_due == BigDecimal::from(0) {
            info!(username = %profile.username, "no outstanding balance");
            return Ok(ReconciliationReport::no_balance_due());
        }

        let used = self.load_usage(&profile.username, receipt_ids).await?;
        let index = self.load_ledger().await?;

        let classification = classify_receipts(&profile.username, receipt_ids, &used, &index);

        if classification.total_validated < amount_due {
            warn!(
                username = %profile.username,
                total_validated = %classification.total_validated,
                amount_due = %amount_due,
                matched = classification.matched_count(),
                "receipts do not cover the outstanding balance"
            );
            let message = if classification.matched_count() == 0 {
                "Some receipts could not be verified.".to_string()
            } else {
                format!(
                    "Verified payments of {} do not cover the outstanding balance of {}.",
                    classification.total_validated, amount_due
                )
            };
            return Ok(ReconciliationReport {
                success: false,
                message,
                details: classification.details,
                outcome: ReconciliationOutcome::InsufficientPayment {
                    total_validated: classification.total_validated,
                    amount_due,
                },
            });
        }

        let new_excess_fee = &classification.total_validated - &amount_due;
        let settlement = Settlement::for_receipts(
            &profile,
            classification.validated_ids.clone(),
            new_excess_fee.clone(),
        );

        let clearance = self
            .storage
            .commit_settlement(&settlement)
            .await
            .map_err(|e| {
                error!(
                    username = %profile.username,
                    receipts = %settlement.reference,
                    error = %e,
                    "settlement commit failed after validation"
                );
                match e {
                    ClearanceError::CommitFailed(msg) => ClearanceError::CommitFailed(msg),
                    other => ClearanceError::CommitFailed(other.to_string()),
                }
            })?;

        info!(
            username = %profile.username,
            clearance_id = clearance.clearance_id,
            total_validated = %classification.total_validated,
            new_excess_fee = %new_excess_fee,
            "balance settled"
        );

        Ok(ReconciliationReport {
            success: true,
            message: "Payment verified. Outstanding balance cleared.".to_string(),
            details: classification.details,
            outcome: ReconciliationOutcome::Settled {
                clearance_id: clearance.clearance_id,
                total_validated: classification.total_validated,
                amount_due,
                new_excess_fee,
            },
        })
    }

    /// Normalized ids consumed by this user plus any submitted id consumed by anyone
    async fn load_usage(
        &self,
        username: &str,
        receipt_ids: &[String],
    ) -> ClearanceResult<HashSet<String>> {
        let mut used: HashSet<String> = self
            .storage
            .used_receipts_for_user(username)
            .await?
            .iter()
            .map(|r| normalize_key(&r.receipt_id))
            .collect();
        used.extend(
            self.storage
                .find_used_receipts(receipt_ids)
                .await?
                .iter()
                .map(|r| normalize_key(&r.receipt_id)),
        );
        Ok(used)
    }

    async fn load_ledger(&self) -> ClearanceResult<LedgerIndex> {
        let timeout = self.settings.ledger_timeout;
        let rows = tokio::time::timeout(
            timeout,
            self.ledger
                .read_range(&self.settings.source_id, &self.settings.range),
        )
        .await
        .map_err(|_| LedgerReadError::Timeout(timeout))
        .and_then(|result| result)
        .map_err(|e| {
            warn!(
                source_id = %self.settings.source_id,
                range = %self.settings.range,
                error = %e,
                "payment ledger read failed"
            );
            ClearanceError::from(e)
        })?;

        Ok(LedgerIndex::from_raw(
            &rows,
            &self.settings.layout,
            self.settings.duplicate_policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::{MemoryLedger, MemoryStorage};

    async fn engine_with(
        fee: i64,
        rows: &[(&str, &str, &str)],
    ) -> ReconciliationEngine<MemoryStorage, MemoryLedger> {
        let storage = MemoryStorage::new();
        let user = NewUser::new("alice@uni.edu", "alice", "hash").into_user("hash".to_string());
        let profile = Profile::new(user.email.clone(), user.username.clone(), BigDecimal::from(fee));
        storage.register_user(&user, &profile).await.unwrap();

        let ledger = MemoryLedger::with_header();
        for (id, amount, claimant) in rows {
            ledger.push_row(id, amount, claimant);
        }
        ReconciliationEngine::new(storage, ledger, ReconciliationSettings::new("sheet-1"))
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_validation_happens_before_io() {
        let engine = engine_with(365000, &[]).await;

        let result = engine.reconcile("alice", &[]).await;
        assert!(matches!(result, Err(ClearanceError::Validation(_))));

        let result = engine.reconcile("  ", &ids(&["R1"])).await;
        assert!(matches!(result, Err(ClearanceError::Validation(_))));
        assert_eq!(engine.ledger.reads(), 0);
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let engine = engine_with(365000, &[]).await;
        let result = engine.reconcile("carol", &ids(&["R1"])).await;
        assert!(matches!(result, Err(ClearanceError::ProfileNotFound(_))));
    }

    #[tokio::test]
    async fn test_ledger_failure_aborts_without_mutation() {
        let engine = engine_with(365000, &[("R1", "365000", "alice")]).await;
        engine.ledger.set_failure(Some("403 forbidden"));
        let before = engine.storage().snapshot().unwrap();

        let result = engine.reconcile("alice", &ids(&["R1"])).await;
        assert!(matches!(result, Err(ClearanceError::LedgerUnavailable(_))));
        assert_eq!(engine.storage().snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn test_ledger_timeout_is_unavailable() {
        let storage = MemoryStorage::new();
        let user = NewUser::new("alice@uni.edu", "alice", "hash").into_user("hash".to_string());
        let profile = Profile::new(user.email.clone(), user.username.clone(), BigDecimal::from(10));
        storage.register_user(&user, &profile).await.unwrap();
        let ledger = MemoryLedger::with_header().with_delay(Duration::from_millis(500));
        let engine = ReconciliationEngine::new(
            storage,
            ledger,
            ReconciliationSettings::new("sheet-1").with_ledger_timeout(Duration::from_millis(20)),
        );

        let result = engine.reconcile("alice", &ids(&["R1"])).await;
        match result {
            Err(ClearanceError::LedgerUnavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected ledger timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_distinct() {
        let engine = engine_with(100, &[("R1", "100", "alice")]).await;
        engine.storage().fail_commits(true);

        let result = engine.reconcile("alice", &ids(&["R1"])).await;
        assert!(matches!(result, Err(ClearanceError::CommitFailed(_))));
        assert!(engine
            .storage()
            .used_receipts_for_user("alice")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_partial_batch_still_settles_when_covered() {
        let engine = engine_with(100, &[("R1", "150", "alice")]).await;

        let report = engine.reconcile("alice", &ids(&["R1", "missing"])).await.unwrap();
        assert!(report.success);
        assert_eq!(report.status_of("missing"), Some(ReceiptStatus::NotFound));

        let profile = engine.storage().get_profile("alice").await.unwrap().unwrap();
        assert_eq!(profile.excess_fee, BigDecimal::from(50));
        assert_eq!(profile.used_receipt[0].receipt_ids, vec!["R1".to_string()]);
    }
}
