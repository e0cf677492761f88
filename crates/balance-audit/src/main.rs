mod bootstrap;

use anyhow::{Context, Result};
use audit_core::settings::Settings;
use audit_data::analysis::{analyze_archive, AnalysisConfig};
use audit_report::ReportWriter;

fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories(&settings.output_dir)?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("Balance audit v{} starting", env!("CARGO_PKG_VERSION"));

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config = AnalysisConfig {
        archive_path: settings.resolved_archive(&cwd),
        member_suffix: settings.member_suffix.clone(),
        outlier: settings.outlier_config()?,
    };
    tracing::info!(
        "Archive: {}, column: {}, percentiles: {}/{}, multiplier: {}",
        config.archive_path.display(),
        config.outlier.column,
        config.outlier.lower_percentile,
        config.outlier.upper_percentile,
        config.outlier.iqr_multiplier
    );

    let result = analyze_archive(&config)
        .with_context(|| format!("analysis of {} failed", config.archive_path.display()))?;

    let writer = ReportWriter::new(&settings.output_dir);
    let exported = writer
        .write_all(&result)
        .with_context(|| format!("cannot write reports to {}", writer.output_dir().display()))?;

    let meta = &result.metadata;
    tracing::info!(
        "Done: {} rows kept, {} outliers above {:?}, {} flagged users, {} files written",
        meta.normal_rows,
        meta.outlier_rows,
        meta.upper_limit,
        meta.flagged_users,
        exported.files.len()
    );
    if meta.coercion.total_nulls() > 0 {
        tracing::warn!(
            "{} cells could not be coerced (amount {}, oldBalance {}, newBalance {}, date {})",
            meta.coercion.total_nulls(),
            meta.coercion.null_amount,
            meta.coercion.null_old_balance,
            meta.coercion.null_new_balance,
            meta.coercion.null_date
        );
    }

    Ok(())
}
