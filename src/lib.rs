//! # tarsau
//!
//! Packs a set of text files into a single `.sau` archive and unpacks it again.
//!
//! ## Archive Format
//!
//! An archive is printable ASCII throughout. A header section lists one record
//! per file, then a single `|` marks the boundary, then the payload section
//! holds every file's bytes as `0`/`1` characters, most significant bit first:
//!
//! ```text
//! |a.txt,644,10|b.txt,600,5|0110100001100101...
//! ```
//!
//! Each record is `|name,mode,size` where `mode` is the octal owner/group/other
//! permission bits and `size` the decimal byte count. Payload runs follow in
//! header order with no separators; run `k` is exactly `8 × size_k` characters.
//!
//! Only the nine permission bits survive a round trip. Timestamps, ownership,
//! directories and links are not stored.
//!
//! ## Content Classification
//!
//! The payload costs eight characters per byte, so only text-like files are
//! accepted. While reading a file the classifier counts non-conforming bytes
//! (anything outside printable ASCII, plus the digits `0`-`9`) and rejects the
//! file as soon as the cumulative share goes above 80%:
//!
//! 1. Byte is printable and not a digit → keep going
//! 2. Otherwise → recompute `non_conforming / read × 100`, reject if `> 80`
//! 3. End of stream → accept
//!
//! The share is measured from the first byte, so a file starting with a digit
//! or a control byte is rejected immediately.
//!
//! ## Example
//!
//! ```rust
//! use std::path::{Path, PathBuf};
//! use tarsau::{Decoder, Encoder, MemoryBackend};
//!
//! let mut files = MemoryBackend::new();
//! files.insert("src/hello.txt", 0o644, "Hello, world!\n");
//!
//! let archive = Encoder::new().encode_to_vec(&files, &[PathBuf::from("src/hello.txt")])?;
//! assert!(archive.starts_with(b"|hello.txt,644,14|"));
//!
//! let mut out = MemoryBackend::new();
//! Decoder::new().extract(&archive, &mut out, Path::new("out"))?;
//! assert_eq!(out.get("out/hello.txt").unwrap().data, b"Hello, world!\n");
//! # Ok::<(), tarsau::Error>(())
//! ```

pub mod archive;
pub mod backend;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod limits;

pub use archive::{
    classify_bytes, Classifier, ClassifierConfig, FileRecord, Verdict, ARCHIVE_EXTENSION,
};
pub use backend::{ContentSink, ContentSource, FileMeta, FsBackend, MemoryBackend, MemoryFile};
pub use decoder::{Decoder, Entry, ExtractSummary};
pub use encoder::{EncodeSummary, Encoder};
pub use error::{Error, Result};
pub use limits::Limits;
