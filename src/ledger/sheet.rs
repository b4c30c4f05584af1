//! Row parsing and receipt lookup over raw ledger rows

use bigdecimal::BigDecimal;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;

use crate::ledger::DuplicatePolicy;
use crate::types::LedgerRow;
use crate::utils::normalize::normalize_key;

/// Positional column mapping of the ledger (0-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLayout {
    pub receipt_id_column: usize,
    pub amount_column: usize,
    pub claimant_column: usize,
    /// Leading rows to skip (headers)
    pub header_rows: usize,
}

impl Default for LedgerLayout {
    fn default() -> Self {
        Self {
            receipt_id_column: 0,
            amount_column: 1,
            claimant_column: 2,
            header_rows: 1,
        }
    }
}

impl LedgerLayout {
    /// Layout with no header row
    pub fn headerless() -> Self {
        Self {
            header_rows: 0,
            ..Self::default()
        }
    }

    pub fn with_header_rows(mut self, header_rows: usize) -> Self {
        self.header_rows = header_rows;
        self
    }
}

/// Parse a payment amount cell
///
/// Thousands separators and whitespace are dropped. Returns `None` when the
/// remainder is not a decimal number.
pub fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok()
}

/// Parse raw rows into ledger rows
///
/// Header rows are skipped, rows whose receipt id cell is blank are ignored,
/// and missing trailing cells read as empty.
pub fn parse_rows(rows: &[Vec<String>], layout: &LedgerLayout) -> Vec<LedgerRow> {
    let cell = |row: &Vec<String>, index: usize| -> String {
        row.get(index).map(|c| c.trim().to_string()).unwrap_or_default()
    };

    rows.iter()
        .enumerate()
        .skip(layout.header_rows)
        .filter_map(|(index, row)| {
            let receipt_id = cell(row, layout.receipt_id_column);
            if receipt_id.is_empty() {
                return None;
            }
            Some(LedgerRow {
                receipt_id,
                amount: parse_amount(&cell(row, layout.amount_column)),
                claimant: cell(row, layout.claimant_column),
                row_number: index + 1,
            })
        })
        .collect()
}

/// What the lookup holds for one receipt id
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    Row(LedgerRow),
    /// Several rows and [`DuplicatePolicy::Reject`]
    Ambiguous(Vec<LedgerRow>),
}

/// In-memory lookup of ledger rows keyed by normalized receipt id
#[derive(Debug, Clone, Default)]
pub struct LedgerIndex {
    entries: HashMap<String, LedgerEntry>,
    duplicates: usize,
}

impl LedgerIndex {
    /// Build the lookup, resolving duplicate ids through `policy`
    pub fn build(rows: Vec<LedgerRow>, policy: DuplicatePolicy) -> Self {
        let mut entries: HashMap<String, LedgerEntry> = HashMap::with_capacity(rows.len());
        let mut duplicates = 0;

        for row in rows {
            match entries.entry(normalize_key(&row.receipt_id)) {
                Entry::Vacant(slot) => {
                    slot.insert(LedgerEntry::Row(row));
                }
                Entry::Occupied(mut slot) => {
                    duplicates += 1;
                    let existing = slot.get_mut();
                    match policy {
                        DuplicatePolicy::LastWins => *existing = LedgerEntry::Row(row),
                        DuplicatePolicy::FirstWins => {}
                        DuplicatePolicy::Reject => {
                            let all = match std::mem::replace(
                                existing,
                                LedgerEntry::Ambiguous(Vec::new()),
                            ) {
                                LedgerEntry::Row(first) => vec![first, row],
                                LedgerEntry::Ambiguous(mut all) => {
                                    all.push(row);
                                    all
                                }
                            };
                            *existing = LedgerEntry::Ambiguous(all);
                        }
                    }
                }
            }
        }

        if duplicates > 0 {
            tracing::warn!(
                duplicates,
                ?policy,
                "payment ledger contains repeated receipt ids"
            );
        }

        Self {
            entries,
            duplicates,
        }
    }

    /// Parse raw rows and build the lookup in one step
    pub fn from_raw(rows: &[Vec<String>], layout: &LedgerLayout, policy: DuplicatePolicy) -> Self {
        Self::build(parse_rows(rows, layout), policy)
    }

    /// Look up a receipt id (case-insensitive)
    pub fn get(&self, receipt_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(&normalize_key(receipt_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of rows that repeated an id already seen
    pub fn duplicate_rows(&self) -> usize {
        self.duplicates
    }
}
