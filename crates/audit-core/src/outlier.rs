use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuditError, Result};
use crate::models::{NumericColumn, TransactionTable};
use crate::statistics::{percentile, sorted};

/// Lower percentile of the threshold formula.
pub const DEFAULT_LOWER_PERCENTILE: f64 = 25.0;
/// Upper percentile of the threshold formula. Intentionally 95, not 75.
pub const DEFAULT_UPPER_PERCENTILE: f64 = 95.0;
/// Multiplier applied to the inter-percentile range.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

// ── OutlierConfig ─────────────────────────────────────────────────────────────

/// Parameters of the upper-bound outlier threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    /// Column whose values are classified.
    pub column: NumericColumn,
    /// Percentile used as Q1, on a 0 to 100 scale.
    pub lower_percentile: f64,
    /// Percentile used as Q3, on a 0 to 100 scale.
    pub upper_percentile: f64,
    /// Factor applied to `Q3 - Q1` before adding it to Q3.
    pub iqr_multiplier: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            column: NumericColumn::Amount,
            lower_percentile: DEFAULT_LOWER_PERCENTILE,
            upper_percentile: DEFAULT_UPPER_PERCENTILE,
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
        }
    }
}

impl OutlierConfig {
    /// Reject percentile pairs and multipliers the formula cannot use.
    pub fn validate(&self) -> Result<()> {
        let in_range = |p: f64| (0.0..=100.0).contains(&p);
        if !in_range(self.lower_percentile) || !in_range(self.upper_percentile) {
            return Err(AuditError::Config(format!(
                "percentiles must lie within 0..=100 (got {} and {})",
                self.lower_percentile, self.upper_percentile
            )));
        }
        if self.lower_percentile > self.upper_percentile {
            return Err(AuditError::Config(format!(
                "lower percentile {} exceeds upper percentile {}",
                self.lower_percentile, self.upper_percentile
            )));
        }
        if !self.iqr_multiplier.is_finite() || self.iqr_multiplier < 0.0 {
            return Err(AuditError::Config(format!(
                "IQR multiplier must be finite and non-negative (got {})",
                self.iqr_multiplier
            )));
        }
        Ok(())
    }
}

// ── OutlierPartition ──────────────────────────────────────────────────────────

/// A table split around the upper limit, with the figures used to split it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierPartition {
    pub column: NumericColumn,
    /// Q1, or `None` when the column has no values.
    pub lower_quartile: Option<f64>,
    /// Q3, or `None` when the column has no values.
    pub upper_quartile: Option<f64>,
    /// `Q3 + multiplier * (Q3 - Q1)`, or `None` when the column has no values.
    pub upper_limit: Option<f64>,
    /// Rows at or below the limit, plus rows with a null value.
    pub normal: TransactionTable,
    /// Rows strictly above the limit.
    pub outliers: TransactionTable,
}

// ── OutlierClassifier ─────────────────────────────────────────────────────────

/// Splits transactions into in-range and high-side outlier sets.
pub struct OutlierClassifier {
    config: OutlierConfig,
}

impl OutlierClassifier {
    /// Create a classifier with the supplied configuration.
    pub fn new(config: OutlierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a classifier with the default 25/95/1.5 configuration on `amount`.
    pub fn with_defaults() -> Self {
        Self {
            config: OutlierConfig::default(),
        }
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Compute the upper limit for the configured column of `table`.
    ///
    /// Returns `(q1, q3, upper_limit)`, all `None` when the column holds no
    /// non-null values.
    pub fn upper_limit(&self, table: &TransactionTable) -> (Option<f64>, Option<f64>, Option<f64>) {
        let data = sorted(&table.values(self.config.column));
        let q1 = percentile(&data, self.config.lower_percentile);
        let q3 = percentile(&data, self.config.upper_percentile);
        let limit = match (q1, q3) {
            (Some(q1), Some(q3)) => Some(q3 + self.config.iqr_multiplier * (q3 - q1)),
            _ => None,
        };
        (q1, q3, limit)
    }

    /// Partition `table` around the upper limit.
    ///
    /// Only the high side is filtered. A null cell cannot exceed the limit, so
    /// such rows stay in `normal`. Row order is preserved in both halves.
    pub fn classify(&self, table: TransactionTable) -> OutlierPartition {
        let column = self.config.column;
        let (lower_quartile, upper_quartile, upper_limit) = self.upper_limit(&table);

        let (outliers, normal): (Vec<_>, Vec<_>) =
            table.rows.into_iter().partition(|row| {
                match (row.numeric(column), upper_limit) {
                    (Some(value), Some(limit)) => value > limit,
                    _ => false,
                }
            });

        debug!(
            column = %column,
            upper_limit = ?upper_limit,
            normal = normal.len(),
            outliers = outliers.len(),
            "classified outliers"
        );

        OutlierPartition {
            column,
            lower_quartile,
            upper_quartile,
            upper_limit,
            normal: TransactionTable::new(normal),
            outliers: TransactionTable::new(outliers),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
