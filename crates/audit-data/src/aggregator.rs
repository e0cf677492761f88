//! Aggregations over the normalized transaction table.
//!
//! Produces the flagged-user list, value counts, monthly volumes and the
//! general and per-subscriber reports consumed by the exporters.

use std::collections::{BTreeMap, HashMap, HashSet};

use audit_core::models::{NumericColumn, Transaction, TransactionTable};
use audit_core::normalizer::parse_decimal;
use audit_core::outlier::OutlierPartition;
use audit_core::statistics::DistributionSummary;
use audit_core::time_utils::{month_key, month_range};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Number of actions kept in a "top actions" listing.
pub const TOP_ACTIONS: usize = 10;

// ── Flagged users ─────────────────────────────────────────────────────────────

/// Distinct user ids with at least one negative `newBalance`.
///
/// Ids appear in the order of their first overdraft row.
pub fn identify_overdraft_users(table: &TransactionTable) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    table
        .iter()
        .filter(|row| row.is_overdraft())
        .filter(|row| seen.insert(row.user_id.as_str()))
        .map(|row| row.user_id.clone())
        .collect()
}

// ── Report types ──────────────────────────────────────────────────────────────

/// How often one value occurs in a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Transactions dated within one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodCount {
    /// `"%Y-%m"` month key.
    pub period: String,
    pub count: usize,
}

/// One `(date, value)` point of a per-subscriber series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: Option<NaiveDateTime>,
    pub value: Option<f64>,
}

/// Balance before and after one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancePoint {
    pub date: Option<NaiveDateTime>,
    pub old_balance: Option<f64>,
    pub new_balance: Option<f64>,
}

/// One row flagged as an outlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierPoint {
    pub date: Option<NaiveDateTime>,
    pub value: Option<f64>,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Table-wide distributions and breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralReport {
    pub total_transactions: usize,
    pub amount: DistributionSummary,
    pub new_balance: DistributionSummary,
    pub payment_balance: DistributionSummary,
    pub type_counts: Vec<ValueCount>,
    pub top_actions: Vec<ValueCount>,
    pub currency_counts: Vec<ValueCount>,
    pub monthly_counts: Vec<PeriodCount>,
}

/// Everything known about one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberReport {
    pub user_id: String,
    pub transaction_count: usize,
    pub amount_series: Vec<SeriesPoint>,
    pub balance_changes: Vec<BalancePoint>,
    pub type_counts: Vec<ValueCount>,
    pub amount: DistributionSummary,
    pub new_balance: DistributionSummary,
    pub payment_balance: DistributionSummary,
    pub top_actions: Vec<ValueCount>,
    pub currency_counts: Vec<ValueCount>,
}

// ── TransactionAggregator ─────────────────────────────────────────────────────

/// Stateless helper that summarises transaction tables.
pub struct TransactionAggregator;

impl TransactionAggregator {
    /// Count the values produced by `key`, most frequent first.
    ///
    /// Ties keep the order in which values first appeared.
    pub fn value_counts<'a>(
        table: &'a TransactionTable,
        key: impl Fn(&'a Transaction) -> &'a str,
    ) -> Vec<ValueCount> {
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();

        for row in table {
            let value = key(row);
            let count = counts.entry(value).or_insert_with(|| {
                order.push(value);
                0
            });
            *count += 1;
        }

        let mut out: Vec<ValueCount> = order
            .into_iter()
            .map(|value| ValueCount {
                value: value.to_string(),
                count: counts[value],
            })
            .collect();
        // Stable sort keeps first-seen order among equal counts.
        out.sort_by(|a, b| b.count.cmp(&a.count));
        out
    }

    /// The `n` most frequent actions.
    pub fn top_actions(table: &TransactionTable, n: usize) -> Vec<ValueCount> {
        let mut counts = Self::value_counts(table, |row| row.action.as_str());
        counts.truncate(n);
        counts
    }

    /// Transactions per calendar month across the dated rows.
    ///
    /// Months between the first and last date with no transactions are
    /// reported with a zero count. Undated rows are ignored.
    pub fn monthly_counts(table: &TransactionTable) -> Vec<PeriodCount> {
        let dates: Vec<&NaiveDateTime> = table.iter().filter_map(|r| r.date.as_ref()).collect();
        let (Some(first), Some(last)) = (dates.iter().min(), dates.iter().max()) else {
            return Vec::new();
        };

        let mut map: BTreeMap<String, usize> = month_range(first, last)
            .into_iter()
            .map(|key| (key, 0))
            .collect();
        for date in &dates {
            *map.entry(month_key(date)).or_default() += 1;
        }

        map.into_iter()
            .map(|(period, count)| PeriodCount { period, count })
            .collect()
    }

    /// `paymentBalance` values that parse as decimals.
    pub fn payment_balances(table: &TransactionTable) -> Vec<f64> {
        table
            .iter()
            .filter_map(|row| parse_decimal(&row.payment_balance))
            .collect()
    }

    /// Build the table-wide report.
    pub fn general_report(table: &TransactionTable) -> GeneralReport {
        GeneralReport {
            total_transactions: table.len(),
            amount: DistributionSummary::from_values(&table.values(NumericColumn::Amount)),
            new_balance: DistributionSummary::from_values(
                &table.values(NumericColumn::NewBalance),
            ),
            payment_balance: DistributionSummary::from_values(&Self::payment_balances(table)),
            type_counts: Self::value_counts(table, |row| row.tx_type.as_str()),
            top_actions: Self::top_actions(table, TOP_ACTIONS),
            currency_counts: Self::value_counts(table, |row| row.currency.as_str()),
            monthly_counts: Self::monthly_counts(table),
        }
    }

    /// Build the report for one subscriber from the rows of `table`.
    pub fn subscriber_report(table: &TransactionTable, user_id: &str) -> SubscriberReport {
        let rows = table.for_user(user_id);

        SubscriberReport {
            user_id: user_id.to_string(),
            transaction_count: rows.len(),
            amount_series: rows
                .iter()
                .map(|r| SeriesPoint {
                    date: r.date,
                    value: r.amount,
                })
                .collect(),
            balance_changes: rows
                .iter()
                .map(|r| BalancePoint {
                    date: r.date,
                    old_balance: r.old_balance,
                    new_balance: r.new_balance,
                })
                .collect(),
            type_counts: Self::value_counts(&rows, |row| row.tx_type.as_str()),
            amount: DistributionSummary::from_values(&rows.values(NumericColumn::Amount)),
            new_balance: DistributionSummary::from_values(&rows.values(NumericColumn::NewBalance)),
            payment_balance: DistributionSummary::from_values(&Self::payment_balances(&rows)),
            top_actions: Self::top_actions(&rows, TOP_ACTIONS),
            currency_counts: Self::value_counts(&rows, |row| row.currency.as_str()),
        }
    }

    /// Scatter points of every outlier row, in table order.
    pub fn outlier_points(partition: &OutlierPartition) -> Vec<OutlierPoint> {
        partition
            .outliers
            .iter()
            .map(|row| OutlierPoint {
                date: row.date,
                value: row.numeric(partition.column),
                tx_type: row.tx_type.clone(),
                id: row.id.clone(),
                user_id: row.user_id.clone(),
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
