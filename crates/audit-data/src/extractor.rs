//! Line-by-line reconstruction of transaction records.
//!
//! A block opens at any line containing `transaction:` in any ASCII case and
//! every following line is taken as the next field, by position only, until a line
//! containing `newBalance` seals it. A sealed block becomes a record only
//! when it produced exactly [`SEMANTIC_FIELD_COUNT`] fields; anything else
//! is dropped and counted. Field labels are never checked, so a stray log
//! line inside a block shifts every later field.

use audit_core::models::{TransactionRecord, SEMANTIC_FIELD_COUNT};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Substring that carries the stream date in its first token.
pub const START_MARKER: &str = "START";

/// Substring that seals the current block.
pub const SEAL_MARKER: &str = "newBalance";

// ── ExtractionStats ───────────────────────────────────────────────────────────

/// Counters describing what happened to the blocks of one or more streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub lines: u64,
    pub blocks_started: u64,
    pub records_emitted: u64,
    /// Blocks sealed with the wrong arity or an unreadable field line.
    pub blocks_dropped: u64,
    /// Blocks cut short by a new marker or by the end of the stream.
    pub blocks_abandoned: u64,
}

impl ExtractionStats {
    /// Add `other`'s counters to these.
    pub fn merge(&mut self, other: &ExtractionStats) {
        self.lines += other.lines;
        self.blocks_started += other.blocks_started;
        self.records_emitted += other.records_emitted;
        self.blocks_dropped += other.blocks_dropped;
        self.blocks_abandoned += other.blocks_abandoned;
    }
}

// ── ParserContext ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Mutable state of one log stream.
///
/// A fresh context is used for every archive member so neither the date nor
/// a half-captured block can leak into the next stream.
#[derive(Debug, Clone)]
pub struct ParserContext {
    state: CaptureState,
    date: String,
    /// Holds at most `SEMANTIC_FIELD_COUNT + 1` values; `captured` keeps
    /// counting past that.
    fields: Vec<String>,
    captured: usize,
    malformed: bool,
    stats: ExtractionStats,
}

impl Default for ParserContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserContext {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            date: String::new(),
            fields: Vec::with_capacity(SEMANTIC_FIELD_COUNT + 1),
            captured: 0,
            malformed: false,
            stats: ExtractionStats::default(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Date token of the most recent `START` line; empty before the first one.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Number of field lines taken into the current block.
    pub fn captured(&self) -> usize {
        self.captured
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    fn begin_capture(&mut self) {
        if self.state == CaptureState::Capturing {
            debug!(
                captured = self.captured,
                "abandoning unterminated transaction block"
            );
            self.stats.blocks_abandoned += 1;
        }
        self.clear_block();
        self.state = CaptureState::Capturing;
        self.stats.blocks_started += 1;
    }

    fn push_field(&mut self, value: Option<String>) {
        self.captured += 1;
        match value {
            Some(v) if self.fields.len() <= SEMANTIC_FIELD_COUNT => self.fields.push(v),
            Some(_) => {}
            None => self.malformed = true,
        }
    }

    /// Close the current block, returning a record when it is well formed.
    fn seal(&mut self) -> Option<TransactionRecord> {
        let record = if self.captured == SEMANTIC_FIELD_COUNT && !self.malformed {
            TransactionRecord::from_captured(std::mem::take(&mut self.fields), self.date.clone())
        } else {
            None
        };

        match record {
            Some(_) => self.stats.records_emitted += 1,
            None => {
                debug!(
                    captured = self.captured,
                    malformed = self.malformed,
                    "dropping transaction block"
                );
                self.stats.blocks_dropped += 1;
            }
        }

        self.clear_block();
        self.state = CaptureState::Idle;
        record
    }

    fn clear_block(&mut self) {
        self.fields.clear();
        self.captured = 0;
        self.malformed = false;
    }
}

// ── Field extraction ──────────────────────────────────────────────────────────

fn is_trim_char(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '\'' | '"')
}

/// Value of a `label: value` line.
///
/// Whitespace, commas and quotes are trimmed from both ends of the line and
/// of the value. Returns `None` when the line has no `:`.
pub fn field_value(line: &str) -> Option<String> {
    let (_, value) = line.trim_matches(is_trim_char).split_once(':')?;
    Some(value.trim_matches(is_trim_char).to_string())
}

// ── LogRecordExtractor ────────────────────────────────────────────────────────

/// Drives [`ParserContext`]s over log lines.
pub struct LogRecordExtractor {
    transaction_marker: Regex,
}

impl Default for LogRecordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LogRecordExtractor {
    pub fn new() -> Self {
        Self {
            transaction_marker: Regex::new(r"(?i-u)transaction:").expect("regex is valid"),
        }
    }

    /// Advance `ctx` by one line, returning a record when the line sealed a
    /// well-formed block.
    ///
    /// The outcome depends only on the line and the context; nothing is
    /// looked ahead and nothing here can fail.
    pub fn process_line(&self, ctx: &mut ParserContext, line: &str) -> Option<TransactionRecord> {
        ctx.stats.lines += 1;

        if line.contains(START_MARKER) {
            ctx.date = line.split_whitespace().next().unwrap_or_default().to_string();
        }

        if self.transaction_marker.is_match(line) {
            ctx.begin_capture();
            return None;
        }

        if ctx.state != CaptureState::Capturing {
            return None;
        }

        ctx.push_field(field_value(line));

        if line.contains(SEAL_MARKER) {
            return ctx.seal();
        }

        None
    }

    /// Finish a stream. A block still open at the end counts as abandoned.
    pub fn finish(&self, mut ctx: ParserContext) -> ExtractionStats {
        if ctx.state == CaptureState::Capturing {
            debug!(
                captured = ctx.captured,
                "stream ended inside a transaction block"
            );
            ctx.stats.blocks_abandoned += 1;
        }
        ctx.stats
    }

    /// Run one complete stream through a fresh context.
    pub fn extract<I, S>(&self, lines: I) -> (Vec<TransactionRecord>, ExtractionStats)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ctx = ParserContext::new();
        let records = lines
            .into_iter()
            .filter_map(|line| self.process_line(&mut ctx, line.as_ref()))
            .collect();
        (records, self.finish(ctx))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
