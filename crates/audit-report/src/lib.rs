//! Exporters for balance audit results.
//!
//! Turns an [`audit_data::analysis::AnalysisResult`] into CSV, JSON and text
//! artifacts under an output directory.

pub mod error;
pub mod writer;

pub use error::{ExportError, Result};
pub use writer::{ExportSummary, ReportWriter};
