//! Core types for the balance audit.
//!
//! Holds the transaction schema, typed coercion, descriptive statistics,
//! the outlier classifier and CLI settings shared by the other crates.

pub mod error;
pub mod models;
pub mod normalizer;
pub mod outlier;
pub mod settings;
pub mod statistics;
pub mod time_utils;

pub use error::{AuditError, Result};
