//! Typed coercion of raw transaction records.
//!
//! Every coercion is lenient: a value that does not parse becomes a null
//! cell and is counted, the row itself always survives.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Transaction, TransactionRecord, TransactionTable};
use crate::time_utils::parse_log_date;

// ── CoercionStats ─────────────────────────────────────────────────────────────

/// Number of cells per coerced column that ended up null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionStats {
    pub rows: usize,
    pub null_amount: usize,
    pub null_old_balance: usize,
    pub null_new_balance: usize,
    pub null_date: usize,
}

impl CoercionStats {
    /// Total null cells produced across all coerced columns.
    pub fn total_nulls(&self) -> usize {
        self.null_amount + self.null_old_balance + self.null_new_balance + self.null_date
    }
}

// ── Value coercion ────────────────────────────────────────────────────────────

/// Parse a base-10 decimal, tolerating surrounding whitespace.
///
/// Returns `None` for empty strings, non-numeric text and NaN.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| !v.is_nan())
}

// ── SchemaNormalizer ──────────────────────────────────────────────────────────

/// Stateless mapping from [`TransactionRecord`] to [`Transaction`].
pub struct SchemaNormalizer;

impl SchemaNormalizer {
    /// Coerce one record, updating `stats` for every null produced.
    pub fn normalize_record(record: TransactionRecord, stats: &mut CoercionStats) -> Transaction {
        let amount = parse_decimal(&record.amount);
        let old_balance = parse_decimal(&record.old_balance);
        let new_balance = parse_decimal(&record.new_balance);
        let date = parse_log_date(&record.date);

        stats.rows += 1;
        if amount.is_none() {
            debug!(id = %record.id, value = %record.amount, "amount is not numeric");
            stats.null_amount += 1;
        }
        if old_balance.is_none() {
            stats.null_old_balance += 1;
        }
        if new_balance.is_none() {
            stats.null_new_balance += 1;
        }
        if date.is_none() {
            stats.null_date += 1;
        }

        Transaction {
            id: record.id,
            tx_type: record.tx_type,
            source: record.source,
            action: record.action,
            user_id: record.user_id,
            payment_balance: record.payment_balance,
            update_payment_balance: record.update_payment_balance,
            metadata: record.metadata,
            currency: record.currency,
            amount,
            vat: record.vat,
            old_balance,
            new_balance,
            date,
        }
    }

    /// Coerce every record in order. No row is ever dropped.
    pub fn normalize(records: Vec<TransactionRecord>) -> (TransactionTable, CoercionStats) {
        let mut stats = CoercionStats::default();
        let rows = records
            .into_iter()
            .map(|record| Self::normalize_record(record, &mut stats))
            .collect();
        (TransactionTable::new(rows), stats)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
