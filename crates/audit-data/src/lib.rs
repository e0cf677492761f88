//! Data ingestion layer for the balance audit.
//!
//! Responsible for opening the log archive, extracting transaction records
//! from its gzip members, aggregating statistics and running the top-level
//! analysis pipeline.

pub mod aggregator;
pub mod analysis;
pub mod archive;
pub mod extractor;

pub use audit_core as core;
