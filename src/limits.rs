//! Pre-flight checks run before an archive is created

use std::path::PathBuf;

use tracing::debug;

use crate::backend::ContentSource;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_FILES: usize = 32;
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 200 * 1024 * 1024;

/// Ceilings applied to one encode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_files: usize,
    /// Aggregate input size in bytes
    pub max_total_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
        }
    }
}

impl Limits {
    /// Check that every input is an existing regular file and that the set
    /// stays under both ceilings. Returns the aggregate size.
    pub fn check<S: ContentSource>(&self, source: &S, inputs: &[PathBuf]) -> Result<u64> {
        if inputs.len() > self.max_files {
            return Err(Error::TooManyFiles {
                count: inputs.len(),
                limit: self.max_files,
            });
        }

        let mut total: u64 = 0;
        for path in inputs {
            let meta = source.metadata(path).map_err(|e| Error::io(path, e))?;
            if !meta.is_file {
                return Err(Error::UnsupportedEntry { path: path.clone() });
            }
            total = total.saturating_add(meta.size);
        }

        if total > self.max_total_size {
            return Err(Error::SizeLimitExceeded {
                total,
                limit: self.max_total_size,
            });
        }
        debug!(files = inputs.len(), total, "pre-flight checks passed");
        Ok(total)
    }
}
