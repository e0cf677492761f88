use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuditError;

/// Number of field lines a log block must yield before the date is attached.
pub const SEMANTIC_FIELD_COUNT: usize = 13;

/// Column names of a transaction record, in positional order.
pub const FIELD_NAMES: [&str; SEMANTIC_FIELD_COUNT + 1] = [
    "id",
    "type",
    "source",
    "action",
    "userId",
    "paymentBalance",
    "updatePaymentBalance",
    "metadata",
    "currency",
    "amount",
    "vat",
    "oldBalance",
    "newBalance",
    "date",
];

/// A transaction reconstructed from a log block, every field still raw text.
///
/// Fields map positionally to [`FIELD_NAMES`]; `date` is the stream-scoped
/// date token from the most recent `START` line, not a per-record timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub source: String,
    pub action: String,
    pub user_id: String,
    pub payment_balance: String,
    pub update_payment_balance: String,
    pub metadata: String,
    pub currency: String,
    pub amount: String,
    pub vat: String,
    pub old_balance: String,
    pub new_balance: String,
    pub date: String,
}

impl TransactionRecord {
    /// Build a record from exactly [`SEMANTIC_FIELD_COUNT`] captured values
    /// plus the date context.
    ///
    /// Returns `None` for any other arity; a record is never built from a
    /// partial capture.
    pub fn from_captured(values: Vec<String>, date: impl Into<String>) -> Option<Self> {
        let fields: [String; SEMANTIC_FIELD_COUNT] = values.try_into().ok()?;
        let [
            id,
            tx_type,
            source,
            action,
            user_id,
            payment_balance,
            update_payment_balance,
            metadata,
            currency,
            amount,
            vat,
            old_balance,
            new_balance,
        ] = fields;

        Some(Self {
            id,
            tx_type,
            source,
            action,
            user_id,
            payment_balance,
            update_payment_balance,
            metadata,
            currency,
            amount,
            vat,
            old_balance,
            new_balance,
            date: date.into(),
        })
    }

    /// All fourteen values in schema order.
    pub fn fields(&self) -> [&str; SEMANTIC_FIELD_COUNT + 1] {
        [
            &self.id,
            &self.tx_type,
            &self.source,
            &self.action,
            &self.user_id,
            &self.payment_balance,
            &self.update_payment_balance,
            &self.metadata,
            &self.currency,
            &self.amount,
            &self.vat,
            &self.old_balance,
            &self.new_balance,
            &self.date,
        ]
    }
}

/// A normalized row of the transaction table.
///
/// The three balance-like columns and the date are typed; a failed coercion
/// leaves `None` in the cell instead of dropping the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub source: String,
    pub action: String,
    pub user_id: String,
    pub payment_balance: String,
    pub update_payment_balance: String,
    pub metadata: String,
    pub currency: String,
    pub amount: Option<f64>,
    pub vat: String,
    pub old_balance: Option<f64>,
    pub new_balance: Option<f64>,
    /// Time-zone-naive log generation date.
    pub date: Option<NaiveDateTime>,
}

impl Transaction {
    /// Value of a numeric column for this row.
    pub fn numeric(&self, column: NumericColumn) -> Option<f64> {
        match column {
            NumericColumn::Amount => self.amount,
            NumericColumn::OldBalance => self.old_balance,
            NumericColumn::NewBalance => self.new_balance,
        }
    }

    /// `true` when the transaction left the subscriber with a negative balance.
    pub fn is_overdraft(&self) -> bool {
        self.new_balance.is_some_and(|b| b < 0.0)
    }
}

/// The numeric columns of the transaction schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericColumn {
    #[serde(rename = "amount")]
    Amount,
    #[serde(rename = "oldBalance")]
    OldBalance,
    #[serde(rename = "newBalance")]
    NewBalance,
}

impl NumericColumn {
    pub const ALL: [NumericColumn; 3] = [
        NumericColumn::Amount,
        NumericColumn::OldBalance,
        NumericColumn::NewBalance,
    ];

    /// Schema name of the column.
    pub fn as_str(&self) -> &'static str {
        match self {
            NumericColumn::Amount => "amount",
            NumericColumn::OldBalance => "oldBalance",
            NumericColumn::NewBalance => "newBalance",
        }
    }
}

impl fmt::Display for NumericColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NumericColumn {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NumericColumn::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AuditError::UnknownColumn(s.to_string()))
    }
}

/// An ordered collection of normalized transactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionTable {
    pub rows: Vec<Transaction>,
}

impl TransactionTable {
    pub fn new(rows: Vec<Transaction>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.rows.iter()
    }

    /// Cells of a numeric column in row order, nulls included.
    pub fn column(&self, column: NumericColumn) -> impl Iterator<Item = Option<f64>> + '_ {
        self.rows.iter().map(move |row| row.numeric(column))
    }

    /// Non-null values of a numeric column in row order.
    pub fn values(&self, column: NumericColumn) -> Vec<f64> {
        self.column(column).flatten().collect()
    }

    /// Rows belonging to one subscriber, in table order.
    pub fn for_user(&self, user_id: &str) -> TransactionTable {
        TransactionTable::new(
            self.rows
                .iter()
                .filter(|row| row.user_id == user_id)
                .cloned()
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a TransactionTable {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
