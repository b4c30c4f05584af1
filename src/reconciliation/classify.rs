//! Per-receipt classification against usage records and the ledger lookup

use bigdecimal::BigDecimal;
use std::collections::HashSet;

use crate::ledger::{LedgerEntry, LedgerIndex};
use crate::types::*;
use crate::utils::normalize::{keys_match, normalize_key};

/// Outcome of classifying one batch
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// One detail per submitted id, in submission order
    pub details: Vec<ReceiptDetail>,
    /// Sum of matched amounts
    pub total_validated: BigDecimal,
    /// Matched ids as written in the ledger, in submission order
    pub validated_ids: Vec<String>,
}

impl Classification {
    pub fn matched_count(&self) -> usize {
        self.validated_ids.len()
    }
}

/// Classify each submitted id
///
/// Checks run in a fixed order and the first failing check decides the
/// status: repeated in this request, already used, absent from the ledger,
/// rejected as ambiguous, claimed by someone else, non-positive amount.
/// `used` holds normalized ids.
pub fn classify_receipts(
    username: &str,
    receipt_ids: &[String],
    used: &HashSet<String>,
    index: &LedgerIndex,
) -> Classification {
    let mut details = Vec::with_capacity(receipt_ids.len());
    let mut total_validated = BigDecimal::from(0);
    let mut validated_ids = Vec::new();
    let mut seen = HashSet::new();

    for receipt_id in receipt_ids {
        let key = normalize_key(receipt_id);

        let status = if !seen.insert(key.clone()) {
            ReceiptStatus::Duplicate
        } else if used.contains(&key) {
            ReceiptStatus::AlreadyUsed
        } else {
            match index.get(&key) {
                None => ReceiptStatus::NotFound,
                Some(LedgerEntry::Ambiguous(_)) => ReceiptStatus::Ambiguous,
                Some(LedgerEntry::Row(row)) if !keys_match(&row.claimant, username) => {
                    ReceiptStatus::MismatchedUsername
                }
                Some(LedgerEntry::Row(row)) => match &row.amount {
                    Some(amount) if *amount > BigDecimal::from(0) => {
                        total_validated += amount;
                        validated_ids.push(row.receipt_id.clone());
                        details.push(ReceiptDetail::matched(receipt_id, amount.clone()));
                        continue;
                    }
                    _ => ReceiptStatus::InvalidAmount,
                },
            }
        };

        tracing::debug!(receipt_id = %receipt_id, ?status, "receipt classified");
        details.push(ReceiptDetail::new(receipt_id, status));
    }

    Classification {
        details,
        total_validated,
        validated_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{DuplicatePolicy, LedgerLayout};

    fn index(rows: &[(&str, &str, &str)], policy: DuplicatePolicy) -> LedgerIndex {
        let raw: Vec<Vec<String>> = rows
            .iter()
            .map(|(id, amount, user)| vec![id.to_string(), amount.to_string(), user.to_string()])
            .collect();
        LedgerIndex::from_raw(&raw, &LedgerLayout::headerless(), policy)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_every_status() {
        let index = index(
            &[
                ("R1", "200000", "Alice"),
                ("R2", "100", "bob"),
                ("R3", "0", "alice"),
                ("R4", "n/a", "alice"),
                ("R5", "5000", "alice"),
            ],
            DuplicatePolicy::LastWins,
        );
        let used: HashSet<String> = ["r5".to_string()].into_iter().collect();

        let result = classify_receipts(
            "alice",
            &ids(&["r1", "R2", "R3", "R4", "R5", "R9", "R1"]),
            &used,
            &index,
        );
        let statuses: Vec<ReceiptStatus> = result.details.iter().map(|d| d.status).collect();

        assert_eq!(
            statuses,
            vec![
                ReceiptStatus::Matched,
                ReceiptStatus::MismatchedUsername,
                ReceiptStatus::InvalidAmount,
                ReceiptStatus::InvalidAmount,
                ReceiptStatus::AlreadyUsed,
                ReceiptStatus::NotFound,
                ReceiptStatus::Duplicate,
            ]
        );
        assert_eq!(result.total_validated, BigDecimal::from(200000));
        assert_eq!(result.validated_ids, vec!["R1".to_string()]);
        assert_eq!(result.details[0].receipt_id, "r1");
    }

    #[test]
    fn test_used_wins_over_other_users_ledger_row() {
        let index = index(&[("R1", "365000", "bob")], DuplicatePolicy::LastWins);
        let used: HashSet<String> = ["r1".to_string()].into_iter().collect();

        let result = classify_receipts("alice", &ids(&["R1"]), &used, &index);
        assert_eq!(result.details[0].status, ReceiptStatus::AlreadyUsed);
        assert_eq!(result.matched_count(), 0);
    }

    #[test]
    fn test_ambiguous_under_reject_policy() {
        let index = index(
            &[("R1", "100", "alice"), ("R1", "100", "alice")],
            DuplicatePolicy::Reject,
        );
        let result = classify_receipts("alice", &ids(&["R1"]), &HashSet::new(), &index);
        assert_eq!(result.details[0].status, ReceiptStatus::Ambiguous);
        assert_eq!(result.total_validated, BigDecimal::from(0));
    }
}
