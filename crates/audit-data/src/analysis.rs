//! Main analysis pipeline for the balance audit.
//!
//! Orchestrates archive loading, record extraction, schema normalization,
//! outlier classification and flagged-user identification, returning an
//! [`AnalysisResult`] ready for the exporters.

use std::path::{Path, PathBuf};
use std::time::Instant;

use audit_core::error::Result;
use audit_core::models::TransactionRecord;
use audit_core::normalizer::{CoercionStats, SchemaNormalizer};
use audit_core::outlier::{OutlierClassifier, OutlierConfig, OutlierPartition};
use audit_core::settings::DEFAULT_MEMBER_SUFFIX;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::identify_overdraft_users;
use crate::archive::LogArchive;
use crate::extractor::{ExtractionStats, LogRecordExtractor};

// ── Public types ──────────────────────────────────────────────────────────────

/// Inputs of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub archive_path: PathBuf,
    /// Only members whose name ends with this suffix are read.
    pub member_suffix: String,
    pub outlier: OutlierConfig,
}

impl AnalysisConfig {
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            member_suffix: DEFAULT_MEMBER_SUFFIX.to_string(),
            outlier: OutlierConfig::default(),
        }
    }
}

/// What happened to a single archive member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberReport {
    pub name: String,
    pub records: usize,
    pub stats: ExtractionStats,
    pub lines_replaced: usize,
    /// Decode failure that cut the member short, if any.
    pub error: Option<String>,
}

impl MemberReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Records extracted from every member of an archive.
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<TransactionRecord>,
    pub members: Vec<MemberReport>,
    /// Counters summed over all members.
    pub extraction: ExtractionStats,
}

/// Metadata produced alongside the analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// ISO-8601 timestamp when this result was generated.
    pub generated_at: String,
    pub archive: String,
    pub members_read: usize,
    pub members_failed: usize,
    pub extraction: ExtractionStats,
    pub coercion: CoercionStats,
    pub outlier: OutlierConfig,
    pub upper_limit: Option<f64>,
    pub normal_rows: usize,
    pub outlier_rows: usize,
    pub flagged_users: usize,
    /// Wall-clock seconds spent reading and extracting the archive.
    pub load_time_seconds: f64,
    /// Wall-clock seconds spent normalizing and classifying.
    pub transform_time_seconds: f64,
}

/// The complete output of [`analyze_archive`].
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub partition: OutlierPartition,
    /// Users with a negative balance among the normal rows.
    pub flagged_users: Vec<String>,
    pub members: Vec<MemberReport>,
    pub metadata: AnalysisMetadata,
}

// ── Public functions ──────────────────────────────────────────────────────────

/// Read every qualifying member of the archive at `path`.
///
/// Members are processed in archive order, each with its own parser context.
/// A member that fails to decode keeps the records read before the failure
/// and the run continues with the next member.
pub fn load_records(path: &Path, member_suffix: &str) -> Result<LoadedRecords> {
    let mut archive = LogArchive::open(path, member_suffix)?;
    let members = archive.log_members();
    info!(
        "Reading {} of {} entries from {}",
        members.len(),
        archive.entry_count(),
        path.display()
    );

    let extractor = LogRecordExtractor::new();
    let mut loaded = LoadedRecords::default();

    for member in &members {
        let report = match archive.read_member(member, |lines| extractor.extract(lines)) {
            Ok(read) => {
                let (records, stats) = read.value;
                let report = MemberReport {
                    name: member.name.clone(),
                    records: records.len(),
                    stats,
                    lines_replaced: read.lines_replaced,
                    error: read.decode_error.map(|e| e.to_string()),
                };
                loaded.records.extend(records);
                report
            }
            Err(e) => {
                warn!("Skipping member {}: {}", member.name, e);
                MemberReport {
                    name: member.name.clone(),
                    records: 0,
                    stats: ExtractionStats::default(),
                    lines_replaced: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        debug!(
            member = %report.name,
            records = report.records,
            dropped = report.stats.blocks_dropped,
            abandoned = report.stats.blocks_abandoned,
            lines_replaced = report.lines_replaced,
            "member processed"
        );
        loaded.extraction.merge(&report.stats);
        loaded.members.push(report);
    }

    Ok(loaded)
}

/// Run the full analysis pipeline.
///
/// 1. Extract raw records from every member of the archive.
/// 2. Coerce them into a typed [`TransactionTable`](audit_core::models::TransactionTable).
/// 3. Split the table around the outlier threshold.
/// 4. Identify overdrawn users among the normal rows.
///
/// Fails only when the configuration is invalid or the archive cannot be
/// opened.
pub fn analyze_archive(config: &AnalysisConfig) -> Result<AnalysisResult> {
    let classifier = OutlierClassifier::new(config.outlier.clone())?;

    // ── Step 1: Load records ──────────────────────────────────────────────────
    let load_start = Instant::now();
    let loaded = load_records(&config.archive_path, &config.member_suffix)?;
    let load_time = load_start.elapsed().as_secs_f64();

    // ── Step 2: Normalize and classify ────────────────────────────────────────
    let transform_start = Instant::now();
    let (table, coercion) = SchemaNormalizer::normalize(loaded.records);
    let partition = classifier.classify(table);
    let flagged_users = identify_overdraft_users(&partition.normal);
    let transform_time = transform_start.elapsed().as_secs_f64();

    let members_failed = loaded.members.iter().filter(|m| m.failed()).count();
    let metadata = AnalysisMetadata {
        generated_at: Utc::now().to_rfc3339(),
        archive: config.archive_path.display().to_string(),
        members_read: loaded.members.len(),
        members_failed,
        extraction: loaded.extraction,
        coercion,
        outlier: config.outlier.clone(),
        upper_limit: partition.upper_limit,
        normal_rows: partition.normal.len(),
        outlier_rows: partition.outliers.len(),
        flagged_users: flagged_users.len(),
        load_time_seconds: load_time,
        transform_time_seconds: transform_time,
    };

    info!(
        "Analyzed {} members ({} failed): {} normal rows, {} outliers, {} flagged users",
        metadata.members_read,
        metadata.members_failed,
        metadata.normal_rows,
        metadata.outlier_rows,
        metadata.flagged_users
    );

    Ok(AnalysisResult {
        partition,
        flagged_users,
        members: loaded.members,
        metadata,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::error::AuditError;
    use audit_core::models::NumericColumn;
    use chrono::NaiveDate;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn write_zip(dir: &Path, members: &[(&str, Vec<u8>)]) -> PathBuf {
        let path = dir.join("balance-sync-logs.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    fn block(id: &str, user: &str, amount: &str, new_balance: &str) -> String {
        format!(
            "10:00:00 INFO Transaction: {{\n\
             id: '{id}',\n\
             type: 'debit',\n\
             source: 'billing',\n\
             action: 'charge',\n\
             userId: '{user}',\n\
             paymentBalance: '10',\n\
             updatePaymentBalance: 'true',\n\
             metadata: '{{}}',\n\
             currency: 'EUR',\n\
             amount: '{amount}',\n\
             vat: '0',\n\
             oldBalance: '0',\n\
             newBalance: '{new_balance}',\n\
             }}\n"
        )
    }

    fn config_for(path: PathBuf) -> AnalysisConfig {
        AnalysisConfig::new(path)
    }

    #[test]
    fn test_single_overdraft_end_to_end() {
        let dir = TempDir::new().unwrap();
        let log = format!("2024-01-01 START sync\n{}", block("tx1", "u1", "5", "-5"));
        let path = write_zip(dir.path(), &[("day1.log.gz", gzip(&log))]);

        let result = analyze_archive(&config_for(path)).unwrap();

        assert_eq!(result.partition.normal.len(), 1);
        let row = &result.partition.normal.rows[0];
        assert_eq!(row.id, "tx1");
        assert_eq!(row.new_balance, Some(-5.0));
        assert_eq!(
            row.date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(result.flagged_users, vec!["u1"]);
        assert_eq!(result.metadata.members_read, 1);
        assert_eq!(result.metadata.extraction.records_emitted, 1);
    }

    #[test]
    fn test_members_in_archive_order_with_fresh_context() {
        let dir = TempDir::new().unwrap();
        let first = format!("2024-01-01 START\n{}", block("a", "u1", "1", "3"));
        // No START line: the previous member's date must not leak in.
        let second = block("b", "u2", "2", "4");
        let path = write_zip(
            dir.path(),
            &[
                ("b.gz", gzip(&first)),
                ("notes.txt", b"ignored".to_vec()),
                ("a.gz", gzip(&second)),
            ],
        );

        let loaded = load_records(&path, ".gz").unwrap();
        let ids: Vec<&str> = loaded.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(loaded.records[0].date, "2024-01-01");
        assert_eq!(loaded.records[1].date, "");
        assert_eq!(loaded.members.len(), 2);
    }

    #[test]
    fn test_bad_member_does_not_abort_run() {
        let dir = TempDir::new().unwrap();
        let good = format!("2024-02-01 START\n{}", block("ok", "u1", "1", "1"));
        let path = write_zip(
            dir.path(),
            &[("bad.gz", b"not gzip at all".to_vec()), ("good.gz", gzip(&good))],
        );

        let result = analyze_archive(&config_for(path)).unwrap();
        assert_eq!(result.metadata.members_failed, 1);
        assert_eq!(result.partition.normal.len(), 1);
        assert!(result.members[0].failed());
        assert!(!result.members[1].failed());
    }

    #[test]
    fn test_truncated_member_keeps_sealed_records() {
        let dir = TempDir::new().unwrap();
        let mut log = String::from("2024-01-01 START\n");
        for i in 0..200 {
            log.push_str(&block(&format!("tx{i}"), &format!("u{i}"), &i.to_string(), "1"));
        }
        let mut data = gzip(&log);
        data.truncate(data.len() * 3 / 4);
        let path = write_zip(dir.path(), &[("cut.gz", data)]);

        let loaded = load_records(&path, ".gz").unwrap();
        let member = &loaded.members[0];
        assert!(member.failed());
        assert!(member.records > 0);
        assert!(member.records < 200);
        assert_eq!(loaded.records.len(), member.records);
        assert_eq!(loaded.records[0].id, "tx0");
    }

    #[test]
    fn test_empty_archive_yields_empty_result() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(dir.path(), &[]);

        let result = analyze_archive(&config_for(path)).unwrap();
        assert!(result.partition.normal.is_empty());
        assert!(result.partition.outliers.is_empty());
        assert!(result.partition.upper_limit.is_none());
        assert!(result.flagged_users.is_empty());
        assert_eq!(result.metadata.members_read, 0);
    }

    #[test]
    fn test_missing_archive_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = analyze_archive(&config_for(dir.path().join("missing.zip")));
        assert!(matches!(result, Err(AuditError::ArchiveNotFound(_))));
    }

    #[test]
    fn test_invalid_outlier_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_zip(dir.path(), &[]);
        let mut config = config_for(path);
        config.outlier.lower_percentile = 99.0;
        config.outlier.upper_percentile = 10.0;
        assert!(matches!(analyze_archive(&config), Err(AuditError::Config(_))));
    }

    #[test]
    fn test_outlier_user_not_flagged() {
        let dir = TempDir::new().unwrap();
        let mut log = String::from("2024-01-01 START\n");
        for i in 0..20 {
            log.push_str(&block(&format!("n{i}"), "steady", "1", "1"));
        }
        log.push_str(&block("huge", "whale", "100000", "-1"));
        let path = write_zip(dir.path(), &[("day.gz", gzip(&log))]);

        let mut config = config_for(path);
        config.outlier.column = NumericColumn::Amount;
        let result = analyze_archive(&config).unwrap();

        assert_eq!(result.partition.outliers.len(), 1);
        assert_eq!(result.partition.outliers.rows[0].user_id, "whale");
        assert!(result.flagged_users.is_empty());
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let log = format!(
            "2024-01-01 START\n{}{}",
            block("a", "u1", "3", "-1"),
            block("b", "u2", "4", "2")
        );
        let path = write_zip(dir.path(), &[("day.gz", gzip(&log))]);
        let config = config_for(path);

        let first = analyze_archive(&config).unwrap();
        let second = analyze_archive(&config).unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.flagged_users, second.flagged_users);
        assert_eq!(first.members, second.members);
    }
}
