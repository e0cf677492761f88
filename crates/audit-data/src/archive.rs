//! Zip archive access for the balance-sync logs.
//!
//! Opens the container, lists the gzip members in enumeration order and
//! exposes each one as a lossy-decoded line stream.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use audit_core::error::{AuditError, Result};
use flate2::read::MultiGzDecoder;
use tracing::{debug, warn};
use zip::ZipArchive;

// ── LossyLines ────────────────────────────────────────────────────────────────

/// Line iterator that never fails on bad bytes.
///
/// Lines are split on `\n` with a trailing `\r` removed. Invalid UTF-8 is
/// replaced with U+FFFD. An I/O error ends the iteration and is kept for the
/// caller to inspect with [`LossyLines::take_error`].
pub struct LossyLines<'a> {
    reader: Box<dyn BufRead + 'a>,
    buf: Vec<u8>,
    lines_replaced: usize,
    error: Option<std::io::Error>,
}

impl<'a> LossyLines<'a> {
    pub fn new(reader: impl BufRead + 'a) -> Self {
        Self {
            reader: Box::new(reader),
            buf: Vec::new(),
            lines_replaced: 0,
            error: None,
        }
    }

    /// Number of lines that needed replacement characters.
    pub fn lines_replaced(&self) -> usize {
        self.lines_replaced
    }

    /// The I/O error that ended the stream early, if any.
    pub fn take_error(&mut self) -> Option<std::io::Error> {
        self.error.take()
    }
}

impl Iterator for LossyLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.error.is_some() {
            return None;
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                let line = match String::from_utf8_lossy(&self.buf) {
                    Cow::Borrowed(s) => s.to_string(),
                    Cow::Owned(s) => {
                        self.lines_replaced += 1;
                        s
                    }
                };
                Some(line)
            }
            Err(e) => {
                self.error = Some(e);
                None
            }
        }
    }
}

// ── LogArchive ────────────────────────────────────────────────────────────────

/// One qualifying member of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Position in the archive's central directory.
    pub index: usize,
    pub name: String,
}

/// Outcome of streaming one member through a visitor.
#[derive(Debug)]
pub struct MemberRead<T> {
    /// Whatever the visitor produced, including from a truncated stream.
    pub value: T,
    pub lines_replaced: usize,
    /// Set when the gzip stream failed before its end.
    pub decode_error: Option<AuditError>,
}

/// An opened zip archive of gzip-compressed logs.
pub struct LogArchive {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    member_suffix: String,
}

impl LogArchive {
    /// Open `path` as a zip archive.
    ///
    /// Fails with [`AuditError::ArchiveNotFound`] when the path is not a file
    /// and [`AuditError::ArchiveCorrupt`] when it is not a readable zip.
    pub fn open(path: &Path, member_suffix: &str) -> Result<Self> {
        if !path.is_file() {
            return Err(AuditError::ArchiveNotFound(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|source| AuditError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| AuditError::ArchiveCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        debug!("Opened {} with {} entries", path.display(), archive.len());

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            member_suffix: member_suffix.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of entries, qualifying or not.
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    /// File entries whose name ends with the member suffix, in archive order.
    pub fn log_members(&self) -> Vec<ArchiveMember> {
        (0..self.archive.len())
            .filter_map(|index| {
                let name = self.archive.name_for_index(index)?;
                let qualifies = !name.ends_with('/') && name.ends_with(&self.member_suffix);
                qualifies.then(|| ArchiveMember {
                    index,
                    name: name.to_string(),
                })
            })
            .collect()
    }

    /// Decompress `member` and hand its lines to `visit`.
    ///
    /// Fails only when the member cannot be opened at all. A stream that breaks
    /// part-way still returns the visitor's value, with the failure recorded
    /// in [`MemberRead::decode_error`].
    pub fn read_member<T>(
        &mut self,
        member: &ArchiveMember,
        visit: impl FnOnce(&mut LossyLines<'_>) -> T,
    ) -> Result<MemberRead<T>> {
        let file = self
            .archive
            .by_index(member.index)
            .map_err(|e| AuditError::MemberDecode {
                member: member.name.clone(),
                reason: e.to_string(),
            })?;

        let mut lines = LossyLines::new(BufReader::new(MultiGzDecoder::new(file)));
        let value = visit(&mut lines);

        let decode_error = lines.take_error().map(|e| {
            warn!("Member {} ended early: {}", member.name, e);
            AuditError::MemberDecode {
                member: member.name.clone(),
                reason: e.to_string(),
            }
        });

        Ok(MemberRead {
            value,
            lines_replaced: lines.lines_replaced(),
            decode_error,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
