//! Archive data structures: constants, the header record codec and the content classifier

use std::io::{self, Read};
use std::path::Path;

use crate::error::{Error, Result};

// Wire format constants
pub const DELIMITER: u8 = b'|';
pub const FIELD_SEPARATOR: u8 = b',';
pub const ARCHIVE_EXTENSION: &str = "sau";
pub const BITS_PER_BYTE: usize = 8;
pub const PERMISSION_MASK: u32 = 0o777;

/// Cumulative non-conforming percentage above which a file is rejected
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 80.0;

const READ_CHUNK: usize = 8 * 1024;

/// Returns true for bytes that count against a file in the classifier:
/// anything outside printable ASCII, and the ASCII digits.
pub fn is_non_conforming(byte: u8) -> bool {
    !(32..=126).contains(&byte) || byte.is_ascii_digit()
}

/// Configuration for the content classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    /// A file is rejected once its cumulative non-conforming percentage
    /// goes strictly above this value.
    pub threshold_percent: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
        }
    }
}

/// Outcome of classifying one file
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// The whole stream was read without crossing the threshold.
    Accept { size: u64 },
    /// The byte at 1-based position `offset` pushed the ratio to `ratio` percent.
    Reject { offset: u64, ratio: f64 },
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

/// Single forward pass heuristic deciding whether content is text-like.
///
/// The ratio is cumulative from the first byte, so a non-conforming byte near
/// the start weighs far more than one near the end: a file whose first byte is
/// a digit or a control character is rejected on the spot.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassifierConfig,
    read: u64,
    non_conforming: u64,
    rejected: Option<(u64, f64)>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            config,
            read: 0,
            non_conforming: 0,
            rejected: None,
        }
    }

    /// Feed the next chunk of the stream. Returns false once the stream has
    /// been rejected; further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.rejected.is_some() {
            return false;
        }
        for &byte in chunk {
            self.read += 1;
            if !is_non_conforming(byte) {
                continue;
            }
            self.non_conforming += 1;
            let ratio = self.non_conforming as f64 / self.read as f64 * 100.0;
            if ratio > self.config.threshold_percent {
                self.rejected = Some((self.read, ratio));
                return false;
            }
        }
        true
    }

    /// Verdict for everything fed so far.
    pub fn verdict(&self) -> Verdict {
        match self.rejected {
            Some((offset, ratio)) => Verdict::Reject { offset, ratio },
            None => Verdict::Accept { size: self.read },
        }
    }

    /// Classify a reader, stopping at the first rejection.
    pub fn classify<R: Read>(mut self, mut reader: R) -> io::Result<Verdict> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if !self.feed(&buf[..n]) {
                break;
            }
        }
        Ok(self.verdict())
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify an in-memory buffer with the default threshold.
pub fn classify_bytes(data: &[u8]) -> Verdict {
    let mut classifier = Classifier::new();
    classifier.feed(data);
    classifier.verdict()
}

/// One file's metadata as stored in the header section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File name, a single path component
    pub name: String,
    /// Owner/group/other permission bits
    pub mode: u32,
    /// Content length in bytes
    pub size: u64,
}

impl FileRecord {
    /// Build a record, validating the name and masking the mode to its
    /// nine permission bits.
    pub fn new(name: impl Into<String>, mode: u32, size: u64) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            mode: mode & PERMISSION_MASK,
            size,
        })
    }

    /// Number of bit characters this record's payload run occupies.
    pub fn payload_len(&self) -> Option<u64> {
        self.size.checked_mul(BITS_PER_BYTE as u64)
    }

    /// Header text for this record: `|name,mode,size`
    pub fn header(&self) -> String {
        format!(
            "{}{}{}{:o}{}{}",
            DELIMITER as char,
            self.name,
            FIELD_SEPARATOR as char,
            self.mode,
            FIELD_SEPARATOR as char,
            self.size
        )
    }

    /// Parse one record starting at the delimiter at `cursor`.
    ///
    /// Returns the record and the position of the delimiter that closes it,
    /// which is also where the next record (or the payload boundary) starts.
    pub fn parse(buf: &[u8], cursor: usize) -> Result<(Self, usize)> {
        if buf.get(cursor) != Some(&DELIMITER) {
            return Err(Error::corrupt(cursor, "expected record delimiter"));
        }
        let start = cursor + 1;
        let end = buf[start..]
            .iter()
            .position(|&b| b == DELIMITER)
            .map(|p| start + p)
            .ok_or_else(|| Error::corrupt(cursor, "unterminated header record"))?;

        let body = &buf[start..end];
        let mut fields = body.split(|&b| b == FIELD_SEPARATOR);
        let (name, mode, size) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(mode), Some(size), None) => (name, mode, size),
            _ => {
                return Err(Error::corrupt(
                    start,
                    "header record must have exactly three fields",
                ))
            }
        };

        let mode_at = start + name.len() + 1;
        let size_at = mode_at + mode.len() + 1;
        let name = std::str::from_utf8(name)
            .map_err(|_| Error::corrupt(start, "file name is not valid UTF-8"))?;
        let mode = parse_mode(mode).ok_or_else(|| Error::corrupt(mode_at, "invalid permission field"))?;
        let size = parse_size(size).ok_or_else(|| Error::corrupt(size_at, "invalid size field"))?;

        let record = FileRecord::new(name, mode, size).map_err(|e| match e {
            Error::InvalidName { reason, .. } => Error::corrupt(start, format!("bad file name: {}", reason)),
            other => other,
        })?;
        Ok((record, end))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(DELIMITER as char) {
        "name contains '|'"
    } else if name.contains(FIELD_SEPARATOR as char) {
        "name contains ','"
    } else if name.contains('/') {
        "name must be a single path component"
    } else if !name.bytes().all(|b| (32..=126).contains(&b)) {
        "name must be printable ASCII"
    } else if name == "." || name == ".." {
        "name refers to a directory"
    } else {
        return Ok(());
    };
    Err(Error::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn parse_mode(field: &[u8]) -> Option<u32> {
    if field.is_empty() || !field.iter().all(|b| (b'0'..=b'7').contains(b)) {
        return None;
    }
    let text = std::str::from_utf8(field).ok()?;
    let mode = u32::from_str_radix(text, 8).ok()?;
    (mode <= PERMISSION_MASK).then_some(mode)
}

fn parse_size(field: &[u8]) -> Option<u64> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Expand one byte into its eight bit characters, most significant first.
pub fn expand_byte(byte: u8) -> [u8; BITS_PER_BYTE] {
    let mut out = [b'0'; BITS_PER_BYTE];
    for (i, slot) in out.iter_mut().enumerate() {
        if byte & (0x80 >> i) != 0 {
            *slot = b'1';
        }
    }
    out
}

/// Pack eight bit characters, most significant first, back into a byte.
/// Any character other than '1' reads as a zero bit; callers validate the
/// run with [`first_invalid_bit`] beforehand.
pub fn pack_byte(bits: &[u8]) -> u8 {
    bits.iter()
        .take(BITS_PER_BYTE)
        .fold(0u8, |acc, &c| (acc << 1) | u8::from(c == b'1'))
}

/// Index of the first character in `run` that is not '0' or '1'.
pub fn first_invalid_bit(run: &[u8]) -> Option<usize> {
    run.iter().position(|&c| c != b'0' && c != b'1')
}

/// Check that a path's file name ends with `.sau`. A bare `.sau` counts.
pub fn check_extension(path: &Path) -> Result<()> {
    let suffix = format!(".{}", ARCHIVE_EXTENSION);
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.ends_with(&suffix) => Ok(()),
        _ => Err(Error::ExtensionMismatch {
            path: path.to_path_buf(),
            expected: ARCHIVE_EXTENSION,
        }),
    }
}
