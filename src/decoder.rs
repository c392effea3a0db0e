//! Archive decoder

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::{
    check_extension, first_invalid_bit, pack_byte, FileRecord, BITS_PER_BYTE, DELIMITER,
};
use crate::backend::{ContentSink, FsBackend};
use crate::error::{Error, Result};

/// One archived file: its record and the bit characters of its payload run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<'a> {
    pub record: FileRecord,
    pub payload: &'a [u8],
}

impl Entry<'_> {
    /// Original file content
    pub fn content(&self) -> Vec<u8> {
        self.payload.chunks_exact(BITS_PER_BYTE).map(pack_byte).collect()
    }
}

/// Result of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Paths written, in archive order
    pub files: Vec<PathBuf>,
}

/// Unpacks archives
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

impl Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }

    /// Parse and validate a whole archive without writing anything.
    ///
    /// The header section runs from the first delimiter to the last one; the
    /// last delimiter is the header/payload boundary.
    pub fn parse<'a>(&self, bytes: &'a [u8]) -> Result<Vec<Entry<'a>>> {
        let first = bytes
            .iter()
            .position(|&b| b == DELIMITER)
            .ok_or_else(|| Error::corrupt(0, "no delimiter found"))?;
        // Both scans succeed or fail together.
        let boundary = bytes
            .iter()
            .rposition(|&b| b == DELIMITER)
            .unwrap_or(first);
        if first > 0 {
            warn!(skipped = first, "ignoring bytes before the header section");
        }

        let mut records = Vec::new();
        let mut cursor = first;
        while cursor < boundary {
            let (record, next) = FileRecord::parse(bytes, cursor)?;
            debug!(name = %record.name, mode = %format!("{:o}", record.mode), size = record.size, "parsed record");
            records.push(record);
            cursor = next;
        }

        let mut offset = boundary + 1;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let len = record
                .payload_len()
                .and_then(|len| usize::try_from(len).ok())
                .ok_or_else(|| Error::corrupt(offset, format!("size of '{}' is too large", record.name)))?;
            let available = bytes.len() - offset;
            if len > available {
                return Err(Error::corrupt(
                    offset,
                    format!(
                        "payload of '{}' truncated: {} bit characters declared, {} available",
                        record.name, len, available
                    ),
                ));
            }

            let payload = &bytes[offset..offset + len];
            if let Some(bad) = first_invalid_bit(payload) {
                return Err(Error::corrupt(offset + bad, "payload character is not '0' or '1'"));
            }
            entries.push(Entry { record, payload });
            offset += len;
        }

        if offset != bytes.len() {
            return Err(Error::corrupt(
                offset,
                format!("{} unexpected bytes after the last payload run", bytes.len() - offset),
            ));
        }
        Ok(entries)
    }

    /// Records of a well-formed archive, in archive order
    pub fn list(&self, bytes: &[u8]) -> Result<Vec<FileRecord>> {
        Ok(self.parse(bytes)?.into_iter().map(|e| e.record).collect())
    }

    /// Extract every file of the archive into `dest` through `sink`.
    ///
    /// Nothing is written unless the whole archive parses. A failed write
    /// stops the extraction; files already written stay in place.
    pub fn extract<K: ContentSink>(&self, bytes: &[u8], sink: &mut K, dest: &Path) -> Result<ExtractSummary> {
        let entries = self.parse(bytes)?;
        sink.create_dir_all(dest).map_err(|e| Error::io(dest, e))?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = dest.join(&entry.record.name);
            let content = entry.content();
            if let Err(source) = sink.write_file(&path, entry.record.mode, &content) {
                return Err(Error::Extract {
                    record: entry.record,
                    source,
                });
            }
            debug!(path = %path.display(), bytes = content.len(), "extracted");
            files.push(path);
        }

        info!(dest = %dest.display(), files = files.len(), "archive extracted");
        Ok(ExtractSummary { files })
    }

    /// Extract the archive file at `archive` into the directory `dest`,
    /// creating it if needed.
    pub fn extract_path(&self, archive: &Path, dest: &Path) -> Result<ExtractSummary> {
        check_extension(archive)?;
        let bytes = fs::read(archive).map_err(|e| Error::io(archive, e))?;
        self.extract(&bytes, &mut FsBackend, dest)
    }

    /// Read the archive file at `archive` and list its records
    pub fn list_path(&self, archive: &Path) -> Result<Vec<FileRecord>> {
        check_extension(archive)?;
        let bytes = fs::read(archive).map_err(|e| Error::io(archive, e))?;
        self.list(&bytes)
    }
}
