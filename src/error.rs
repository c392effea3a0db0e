//! Error type shared by the encoder and decoder

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::FileRecord;

/// Errors produced while packing or unpacking an archive.
///
/// Every variant is fatal to the operation that raised it; nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The classifier judged an input file not text-like enough.
    #[error(
        "'{}' rejected: {ratio:.1}% of bytes non-conforming after {offset} bytes",
        .path.display()
    )]
    InputRejected { path: PathBuf, offset: u64, ratio: f64 },

    /// Open, read, write or stat failure on a file.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Aggregate input size is over the configured ceiling.
    #[error("total input size {total} bytes exceeds the limit of {limit} bytes")]
    SizeLimitExceeded { total: u64, limit: u64 },

    /// More input files than the configured ceiling.
    #[error("{count} input files given, at most {limit} allowed")]
    TooManyFiles { count: usize, limit: usize },

    /// Input is a directory, socket, device or anything else but a regular file.
    #[error("'{}' is not a regular file", .path.display())]
    UnsupportedEntry { path: PathBuf },

    /// A file name that cannot be stored in a header record.
    #[error("invalid file name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Two inputs share a file name and would overwrite each other on extraction.
    #[error("duplicate file name '{0}'")]
    DuplicateName(String),

    /// The archive bytes do not follow the wire format.
    #[error("archive is corrupt at byte {offset}: {reason}")]
    FormatCorrupt { offset: usize, reason: String },

    /// The archive path does not carry the archive extension.
    #[error("'{}' is not a .{expected} archive", .path.display())]
    ExtensionMismatch { path: PathBuf, expected: &'static str },

    /// Writing an extracted file failed. The record being written is kept so
    /// the caller can report it.
    #[error(
        "failed to extract '{}' (mode {:o}, {} bytes), archive may be corrupt: {source}",
        .record.name, .record.mode, .record.size
    )]
    Extract {
        record: FileRecord,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Error::FormatCorrupt {
            offset,
            reason: reason.into(),
        }
    }
}

/// Result alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_mentions_record() {
        let record = FileRecord::new("notes.txt", 0o640, 12).unwrap();
        let err = Error::Extract {
            record,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("notes.txt"));
        assert!(msg.contains("mode 640"));
        assert!(msg.contains("corrupt"));
    }

    #[test]
    fn test_corrupt_display() {
        let err = Error::corrupt(17, "missing field separator");
        assert_eq!(
            err.to_string(),
            "archive is corrupt at byte 17: missing field separator"
        );
    }
}
