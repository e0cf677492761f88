use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::outlier::OutlierConfig;

/// Archive name looked up in the working directory when none is given.
pub const DEFAULT_ARCHIVE_NAME: &str = "balance-sync-logs.zip";

/// Suffix a zip member must carry to be read as a compressed log.
pub const DEFAULT_MEMBER_SUFFIX: &str = ".gz";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Reconstruct transactions from balance-sync logs and audit them
#[derive(Parser, Debug, Clone)]
#[command(
    name = "balance-audit",
    about = "Reconstruct transactions from balance-sync logs and audit them",
    version
)]
pub struct Settings {
    /// Zip archive holding the gzip-compressed logs
    #[arg(long, default_value = DEFAULT_ARCHIVE_NAME)]
    pub archive: PathBuf,

    /// Directory receiving the exported artifacts
    #[arg(long, default_value = "output_directory")]
    pub output_dir: PathBuf,

    /// Only archive members whose name ends with this suffix are read
    #[arg(long, default_value = DEFAULT_MEMBER_SUFFIX)]
    pub member_suffix: String,

    /// Numeric column checked for outliers
    #[arg(long, default_value = "amount", value_parser = ["amount", "oldBalance", "newBalance"])]
    pub outlier_column: String,

    /// Percentile used as Q1 of the outlier threshold (0-100)
    #[arg(long, default_value = "25")]
    pub lower_percentile: f64,

    /// Percentile used as Q3 of the outlier threshold (0-100)
    #[arg(long, default_value = "95")]
    pub upper_percentile: f64,

    /// Multiplier applied to Q3 - Q1
    #[arg(long, default_value = "1.5")]
    pub iqr_multiplier: f64,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.balance-audit/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_suffix: Option<String>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    /// Uses `~/.balance-audit/last_used.json`.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".balance-audit").join("last_used.json")
    }

    /// Load persisted params from an explicit path.
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to an explicit path, creating parent
    /// directories if needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;

        // Write to a temp file then rename for atomicity.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &std::path::Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit CLI
    /// value was provided, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation. Accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        // Build raw ArgMatches so we can query ValueSource.
        let matches = Settings::command().get_matches_from(args.clone());

        // Parse into the typed struct using the same args.
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!("Could not clear {}: {}", config_path.display(), e);
            }
            return Self::apply_debug_flag(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI always wins over persisted values.
        if !is_arg_explicitly_set(&matches, "archive") {
            if let Some(v) = last.archive {
                settings.archive = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "output_dir") {
            if let Some(v) = last.output_dir {
                settings.output_dir = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "member_suffix") {
            if let Some(v) = last.member_suffix {
                settings.member_suffix = v;
            }
        }

        settings = Self::apply_debug_flag(settings);

        // Persist current settings for next run.
        let params = LastUsedParams::from(&settings);
        if let Err(e) = params.save_to(config_path) {
            tracing::debug!("Could not persist settings: {}", e);
        }

        settings
    }

    /// Build the validated outlier threshold configuration.
    pub fn outlier_config(&self) -> Result<OutlierConfig> {
        let config = OutlierConfig {
            column: self.outlier_column.parse()?,
            lower_percentile: self.lower_percentile,
            upper_percentile: self.upper_percentile,
            iqr_multiplier: self.iqr_multiplier,
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve the archive path against `cwd` when it is relative.
    pub fn resolved_archive(&self, cwd: &std::path::Path) -> PathBuf {
        if self.archive.is_absolute() {
            self.archive.clone()
        } else {
            cwd.join(&self.archive)
        }
    }

    /// `--debug` overrides the log level.
    fn apply_debug_flag(mut settings: Settings) -> Settings {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            archive: Some(s.archive.clone()),
            output_dir: Some(s.output_dir.clone()),
            member_suffix: Some(s.member_suffix.clone()),
        }
    }
}

// ── Helper: check if an arg was explicitly set on the command line ─────────────

/// Returns `true` when `name` was supplied explicitly on the command line
/// (not via default value or environment variable).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
