//! Artifact writers.
//!
//! Every file except the run metadata is a pure function of the analysis
//! result, so re-running on the same archive reproduces them byte for byte.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use audit_core::models::{NumericColumn, TransactionTable, FIELD_NAMES};
use audit_core::outlier::OutlierPartition;
use audit_data::aggregator::TransactionAggregator;
use audit_data::analysis::{AnalysisMetadata, AnalysisResult};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ExportError, Result};

pub const TRANSACTIONS_FILE: &str = "transactions.csv";
pub const OVERDRAFT_USERS_FILE: &str = "overdraft_users.txt";
pub const SUMMARY_FILE: &str = "summary.json";
pub const RUN_METADATA_FILE: &str = "run_metadata.json";

/// `outliers_in_<column>.csv`
pub fn outliers_file_name(column: NumericColumn) -> String {
    format!("outliers_in_{column}.csv")
}

/// Directory name for a subscriber's artifacts.
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, `%` included, so the
/// name stays inside the output directory and distinct ids never share one.
pub fn subscriber_dir_name(user_id: &str) -> String {
    let mut name = String::from("subscriber_");
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name
}

/// Files produced by [`ReportWriter::write_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub files: Vec<PathBuf>,
}

/// Writes analysis artifacts beneath one output directory.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every artifact for `result`.
    ///
    /// The summary and subscriber reports are computed over the normal rows.
    pub fn write_all(&self, result: &AnalysisResult) -> Result<ExportSummary> {
        create_dir(&self.output_dir)?;
        let normal = &result.partition.normal;

        let mut files = vec![
            self.write_transactions(normal)?,
            self.write_overdraft_users(&result.flagged_users)?,
            self.write_outliers(&result.partition)?,
            self.write_summary(normal)?,
        ];
        for user_id in &result.flagged_users {
            files.push(self.write_subscriber(normal, user_id)?);
        }
        files.push(self.write_metadata(&result.metadata)?);

        info!(
            "Wrote {} files to {}",
            files.len(),
            self.output_dir.display()
        );
        Ok(ExportSummary { files })
    }

    /// Normal rows as CSV, header first, nulls as empty cells.
    pub fn write_transactions(&self, table: &TransactionTable) -> Result<PathBuf> {
        let path = self.output_dir.join(TRANSACTIONS_FILE);
        let mut writer = csv_writer(&path)?;
        writer.write_record(FIELD_NAMES)?;
        for row in table {
            writer.serialize(row)?;
        }
        finish_csv(writer, &path)?;
        debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(path)
    }

    /// Flagged user ids, one per line.
    pub fn write_overdraft_users(&self, users: &[String]) -> Result<PathBuf> {
        let path = self.output_dir.join(OVERDRAFT_USERS_FILE);
        let mut out = create_file(&path)?;
        for user in users {
            writeln!(out, "{user}").map_err(|e| write_error(&path, e))?;
        }
        out.flush().map_err(|e| write_error(&path, e))?;
        Ok(path)
    }

    /// Scatter points of the outlier rows.
    pub fn write_outliers(&self, partition: &OutlierPartition) -> Result<PathBuf> {
        let path = self.output_dir.join(outliers_file_name(partition.column));
        let mut writer = csv_writer(&path)?;
        writer.write_record(["date", partition.column.as_str(), "type", "id", "userId"])?;
        for point in TransactionAggregator::outlier_points(partition) {
            writer.serialize(point)?;
        }
        finish_csv(writer, &path)?;
        Ok(path)
    }

    /// General distribution report.
    pub fn write_summary(&self, table: &TransactionTable) -> Result<PathBuf> {
        let path = self.output_dir.join(SUMMARY_FILE);
        write_json(&path, &TransactionAggregator::general_report(table))?;
        Ok(path)
    }

    /// Per-subscriber report in its own directory.
    pub fn write_subscriber(&self, table: &TransactionTable, user_id: &str) -> Result<PathBuf> {
        let dir = self.output_dir.join(subscriber_dir_name(user_id));
        create_dir(&dir)?;
        let path = dir.join(SUMMARY_FILE);
        write_json(&path, &TransactionAggregator::subscriber_report(table, user_id))?;
        Ok(path)
    }

    /// Run metadata. Carries timings, so it differs between runs.
    pub fn write_metadata(&self, metadata: &AnalysisMetadata) -> Result<PathBuf> {
        let path = self.output_dir.join(RUN_METADATA_FILE);
        write_json(&path, metadata)?;
        Ok(path)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn write_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| write_error(dir, e))
}

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| write_error(path, e))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(create_file(path)?))
}

fn finish_csv(mut writer: csv::Writer<BufWriter<File>>, path: &Path) -> Result<()> {
    writer.flush().map_err(|e| write_error(path, e))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut out = create_file(path)?;
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out).map_err(|e| write_error(path, e))?;
    out.flush().map_err(|e| write_error(path, e))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::models::Transaction;
    use audit_core::outlier::OutlierClassifier;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn make_row(id: &str, user: &str, amount: Option<f64>, new_balance: Option<f64>) -> Transaction {
        Transaction {
            id: id.to_string(),
            tx_type: "debit".to_string(),
            source: "billing".to_string(),
            action: "charge".to_string(),
            user_id: user.to_string(),
            payment_balance: "10".to_string(),
            update_payment_balance: "true".to_string(),
            metadata: "{}".to_string(),
            currency: "EUR".to_string(),
            amount,
            vat: "0".to_string(),
            old_balance: Some(0.0),
            new_balance,
            date: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0),
        }
    }

    fn make_result(rows: Vec<Transaction>) -> AnalysisResult {
        let partition = OutlierClassifier::with_defaults().classify(TransactionTable::new(rows));
        let flagged_users = audit_data::aggregator::identify_overdraft_users(&partition.normal);
        AnalysisResult {
            partition,
            flagged_users,
            members: Vec::new(),
            metadata: AnalysisMetadata::default(),
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_subscriber_dir_name_sanitizes() {
        assert_eq!(subscriber_dir_name("user-42"), "subscriber_user-42");
        assert_eq!(subscriber_dir_name("a/b c"), "subscriber_a%2Fb%20c");
        assert_eq!(subscriber_dir_name(".."), "subscriber_..");
        assert_eq!(subscriber_dir_name("50%"), "subscriber_50%25");
        assert_eq!(subscriber_dir_name("é"), "subscriber_%C3%A9");
        assert_eq!(subscriber_dir_name(""), "subscriber_");
    }

    #[test]
    fn test_subscriber_dir_names_do_not_collide() {
        let ids = ["a/b", "a b", "a_b", "a%2Fb"];
        let names: std::collections::HashSet<String> =
            ids.iter().map(|id| subscriber_dir_name(id)).collect();
        assert_eq!(names.len(), ids.len());
    }

    #[test]
    fn test_write_all_keeps_every_subscriber_report() {
        let dir = TempDir::new().unwrap();
        let result = make_result(vec![
            make_row("1", "a/b", Some(1.0), Some(-1.0)),
            make_row("2", "a b", Some(1.0), Some(-2.0)),
            make_row("3", "a_b", Some(1.0), Some(-3.0)),
        ]);
        assert_eq!(result.flagged_users.len(), 3);

        let summary = ReportWriter::new(dir.path()).write_all(&result).unwrap();
        let unique: std::collections::HashSet<&PathBuf> = summary.files.iter().collect();
        assert_eq!(unique.len(), summary.files.len());

        for user in &result.flagged_users {
            let path = dir.path().join(subscriber_dir_name(user)).join(SUMMARY_FILE);
            let report: serde_json::Value = serde_json::from_str(&read(&path)).unwrap();
            assert_eq!(report["user_id"], user.as_str());
        }
    }

    #[test]
    fn test_outliers_file_name() {
        assert_eq!(
            outliers_file_name(NumericColumn::NewBalance),
            "outliers_in_newBalance.csv"
        );
    }

    #[test]
    fn test_transactions_csv_layout() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path());
        let table = TransactionTable::new(vec![make_row("tx1", "u1", None, Some(-5.0))]);

        let path = writer.write_transactions(&table).unwrap();
        let text = read(&path);
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,type,source,action,userId,paymentBalance,updatePaymentBalance,\
             metadata,currency,amount,vat,oldBalance,newBalance,date"
        );
        assert_eq!(
            lines.next().unwrap(),
            "tx1,debit,billing,charge,u1,10,true,{},EUR,,0,0.0,-5.0,2024-01-01T00:00:00"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_result_still_produces_artifacts() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path().join("out"));

        let summary = writer.write_all(&make_result(Vec::new())).unwrap();
        assert_eq!(summary.files.len(), 5);

        let out = dir.path().join("out");
        assert_eq!(read(&out.join(TRANSACTIONS_FILE)).lines().count(), 1);
        assert_eq!(read(&out.join(OVERDRAFT_USERS_FILE)), "");
        assert_eq!(read(&out.join("outliers_in_amount.csv")).lines().count(), 1);

        let report: serde_json::Value =
            serde_json::from_str(&read(&out.join(SUMMARY_FILE))).unwrap();
        assert_eq!(report["total_transactions"], 0);
    }

    #[test]
    fn test_write_all_with_flagged_users_and_outliers() {
        let dir = TempDir::new().unwrap();
        let mut rows: Vec<Transaction> = (0..20)
            .map(|i| make_row(&format!("n{i}"), "steady", Some(1.0), Some(3.0)))
            .collect();
        rows.push(make_row("neg", "u/1", Some(1.0), Some(-2.0)));
        rows.push(make_row("big", "whale", Some(1e6), Some(-9.0)));
        let result = make_result(rows);
        assert_eq!(result.partition.column, NumericColumn::Amount);

        let writer = ReportWriter::new(dir.path());
        writer.write_all(&result).unwrap();

        assert_eq!(read(&dir.path().join(OVERDRAFT_USERS_FILE)), "u/1\n");
        assert_eq!(read(&dir.path().join(TRANSACTIONS_FILE)).lines().count(), 22);

        let outliers = read(&dir.path().join("outliers_in_amount.csv"));
        let lines: Vec<&str> = outliers.lines().collect();
        assert_eq!(lines[0], "date,amount,type,id,userId");
        assert_eq!(lines[1], "2024-01-01T00:00:00,1000000.0,debit,big,whale");

        let sub = dir.path().join("subscriber_u%2F1").join(SUMMARY_FILE);
        let report: serde_json::Value = serde_json::from_str(&read(&sub)).unwrap();
        assert_eq!(report["user_id"], "u/1");
        assert_eq!(report["transaction_count"], 1);
        assert!(dir.path().join(RUN_METADATA_FILE).exists());
    }

    #[test]
    fn test_exports_are_reproducible() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let rows = vec![
            make_row("a", "u1", Some(2.0), Some(-1.0)),
            make_row("b", "u2", None, Some(4.0)),
        ];

        ReportWriter::new(first.path()).write_all(&make_result(rows.clone())).unwrap();
        ReportWriter::new(second.path()).write_all(&make_result(rows)).unwrap();

        for name in [
            TRANSACTIONS_FILE,
            OVERDRAFT_USERS_FILE,
            SUMMARY_FILE,
            "outliers_in_amount.csv",
            "subscriber_u1/summary.json",
        ] {
            assert_eq!(
                std::fs::read(first.path().join(name)).unwrap(),
                std::fs::read(second.path().join(name)).unwrap(),
                "{name} differs between runs"
            );
        }
    }

    #[test]
    fn test_unwritable_output_dir() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let writer = ReportWriter::new(blocker.join("out"));
        let err = writer.write_all(&make_result(Vec::new())).unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
    }
}
