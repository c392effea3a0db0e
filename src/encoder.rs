//! Archive encoder

use std::collections::HashSet;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::{
    check_extension, expand_byte, Classifier, ClassifierConfig, FileRecord, Verdict, BITS_PER_BYTE,
    DELIMITER,
};
use crate::backend::ContentSource;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Result of a successful encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Records in archive order
    pub records: Vec<FileRecord>,
    /// Total archive length in bytes
    pub archive_len: u64,
}

/// An accepted input, ready to be written
struct Planned<'a> {
    path: &'a Path,
    record: FileRecord,
}

/// Packs files into the archive format
pub struct Encoder {
    classifier: ClassifierConfig,
}

impl Encoder {
    /// Create a new encoder with the default classifier threshold
    pub fn new() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
        }
    }

    pub fn with_classifier(mut self, config: ClassifierConfig) -> Self {
        self.classifier = config;
        self
    }

    /// Encode `inputs`, read through `source`, into `writer`.
    ///
    /// Every input is classified before the first byte is written, so a
    /// rejected file leaves `writer` untouched.
    pub fn encode<S, W>(&self, source: &S, inputs: &[PathBuf], writer: W) -> Result<EncodeSummary>
    where
        S: ContentSource,
        W: Write,
    {
        let planned = self.plan(source, inputs)?;
        self.write_archive(source, &planned, writer, Path::new("<archive>"))
    }

    /// Encode into a byte vector
    pub fn encode_to_vec<S: ContentSource>(&self, source: &S, inputs: &[PathBuf]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(source, inputs, &mut out)?;
        Ok(out)
    }

    /// Encode into an archive file at `output`.
    ///
    /// The archive is assembled in a temporary file next to `output` and only
    /// renamed into place once complete. A failure part way through leaves no
    /// output behind and never clobbers an existing file. The archive gets the
    /// mode a newly created file would, 0666 less the umask.
    pub fn encode_to_path<S: ContentSource>(
        &self,
        source: &S,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<EncodeSummary> {
        check_extension(output)?;
        let planned = self.plan(source, inputs)?;

        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = staging_file(dir).map_err(|e| Error::io(dir, e))?;
        let summary = self.write_archive(source, &planned, tmp.as_file_mut(), output)?;
        tmp.persist(output).map_err(|e| Error::io(output, e.error))?;

        info!(
            archive = %output.display(),
            files = summary.records.len(),
            bytes = summary.archive_len,
            "archive created"
        );
        Ok(summary)
    }

    /// Classify every input in order and build its record. Stops at the
    /// first rejected file.
    fn plan<'a, S: ContentSource>(&self, source: &S, inputs: &'a [PathBuf]) -> Result<Vec<Planned<'a>>> {
        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(inputs.len());

        for path in inputs {
            let name = record_name(path)?;
            if !seen.insert(name.clone()) {
                return Err(Error::DuplicateName(name));
            }

            let meta = source.metadata(path).map_err(|e| Error::io(path, e))?;
            if !meta.is_file {
                return Err(Error::UnsupportedEntry { path: path.clone() });
            }

            let reader = source.open(path).map_err(|e| Error::io(path, e))?;
            let verdict = Classifier::with_config(self.classifier)
                .classify(reader)
                .map_err(|e| Error::io(path, e))?;
            let size = match verdict {
                Verdict::Accept { size } => size,
                Verdict::Reject { offset, ratio } => {
                    debug!(path = %path.display(), offset, ratio, "input rejected");
                    return Err(Error::InputRejected {
                        path: path.clone(),
                        offset,
                        ratio,
                    });
                }
            };

            let record = FileRecord::new(name, meta.mode, size)?;
            debug!(path = %path.display(), mode = %format!("{:o}", record.mode), size, "input accepted");
            planned.push(Planned { path, record });
        }

        Ok(planned)
    }

    /// Write the header section followed by every payload run.
    fn write_archive<S, W>(
        &self,
        source: &S,
        planned: &[Planned<'_>],
        writer: W,
        output: &Path,
    ) -> Result<EncodeSummary>
    where
        S: ContentSource,
        W: Write,
    {
        let mut writer = BufWriter::new(writer);
        let write_err = |e: io::Error| Error::io(output, e);
        let mut archive_len: u64 = 0;

        for item in planned {
            let header = item.record.header();
            writer.write_all(header.as_bytes()).map_err(write_err)?;
            archive_len += header.len() as u64;
        }
        writer.write_all(&[DELIMITER]).map_err(write_err)?;
        archive_len += 1;

        for item in planned {
            archive_len += write_payload(source, item, &mut writer, output)?;
        }
        writer.flush().map_err(write_err)?;

        Ok(EncodeSummary {
            records: planned.iter().map(|p| p.record.clone()).collect(),
            archive_len,
        })
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Temporary file in `dir` created with 0666 so the process umask decides
/// the final archive mode.
#[cfg(unix)]
fn staging_file(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    tempfile::Builder::new()
        .permissions(std::fs::Permissions::from_mode(0o666))
        .tempfile_in(dir)
}

#[cfg(not(unix))]
fn staging_file(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    tempfile::NamedTempFile::new_in(dir)
}

/// Re-read one input and emit its bits. Returns the number of characters written.
fn write_payload<S, W>(source: &S, item: &Planned<'_>, writer: &mut W, output: &Path) -> Result<u64>
where
    S: ContentSource,
    W: Write,
{
    let path = item.path;
    let mut reader = source.open(path).map_err(|e| Error::io(path, e))?;
    let mut buf = [0u8; READ_CHUNK];
    let mut bits = Vec::with_capacity(READ_CHUNK * BITS_PER_BYTE);
    let mut read: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        };
        read += n as u64;
        bits.clear();
        for &byte in &buf[..n] {
            bits.extend_from_slice(&expand_byte(byte));
        }
        writer.write_all(&bits).map_err(|e| Error::io(output, e))?;
    }

    if read != item.record.size {
        return Err(Error::io(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "file changed while archiving: expected {} bytes, read {}",
                    item.record.size, read
                ),
            ),
        ));
    }
    Ok(read * BITS_PER_BYTE as u64)
}

fn record_name(path: &Path) -> Result<String> {
    let name = path.file_name().ok_or_else(|| Error::InvalidName {
        name: path.display().to_string(),
        reason: "path has no file name",
    })?;
    name.to_str().map(str::to_string).ok_or_else(|| Error::InvalidName {
        name: name.to_string_lossy().into_owned(),
        reason: "name is not valid UTF-8",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileMeta, MemoryBackend};
    use std::cell::Cell;
    use std::io::Cursor;

    fn inputs(paths: &[&str]) -> Vec<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_encode_two_files() {
        let mut backend = MemoryBackend::new();
        backend.insert("src/a.txt", 0o644, "helloworld");
        backend.insert("src/b.txt", 0o600, "abcde");

        let encoder = Encoder::new();
        let out = encoder
            .encode_to_vec(&backend, &inputs(&["src/a.txt", "src/b.txt"]))
            .unwrap();

        let header = "|a.txt,644,10|b.txt,600,5|";
        assert!(out.starts_with(header.as_bytes()));
        assert_eq!(out.len(), header.len() + 120 + 40);
        assert_eq!(&out[header.len()..header.len() + 8], b"01101000"); // 'h'
        assert!(out[header.len()..].iter().all(|&c| c == b'0' || c == b'1'));
    }

    #[test]
    fn test_encode_summary_length() {
        let mut backend = MemoryBackend::new();
        backend.insert("notes", 0o640, "some notes\n");

        let mut out = Vec::new();
        let summary = Encoder::new()
            .encode(&backend, &inputs(&["notes"]), &mut out)
            .unwrap();
        assert_eq!(summary.archive_len, out.len() as u64);
        assert_eq!(summary.records, vec![FileRecord::new("notes", 0o640, 11).unwrap()]);
    }

    #[test]
    fn test_encode_empty_file() {
        let mut backend = MemoryBackend::new();
        backend.insert("empty.txt", 0o644, "");

        let out = Encoder::new().encode_to_vec(&backend, &inputs(&["empty.txt"])).unwrap();
        assert_eq!(out, b"|empty.txt,644,0|");
    }

    #[test]
    fn test_encode_strips_special_mode_bits() {
        let mut backend = MemoryBackend::new();
        backend.insert("tool", 0o4755, "text");

        let out = Encoder::new().encode_to_vec(&backend, &inputs(&["tool"])).unwrap();
        assert!(out.starts_with(b"|tool,755,4|"));
    }

    #[test]
    fn test_encode_rejects_binary_and_writes_nothing() {
        let mut backend = MemoryBackend::new();
        backend.insert("a.txt", 0o644, "fine text");
        backend.insert("blob.bin", 0o644, vec![0x00, b'a', b'b']);

        let mut out = Vec::new();
        let err = Encoder::new()
            .encode(&backend, &inputs(&["a.txt", "blob.bin"]), &mut out)
            .unwrap_err();
        match err {
            Error::InputRejected { path, offset, ratio } => {
                assert_eq!(path, PathBuf::from("blob.bin"));
                assert_eq!(offset, 1);
                assert_eq!(ratio, 100.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_encode_duplicate_names() {
        let mut backend = MemoryBackend::new();
        backend.insert("x/readme", 0o644, "one");
        backend.insert("y/readme", 0o644, "two");

        let err = Encoder::new()
            .encode_to_vec(&backend, &inputs(&["x/readme", "y/readme"]))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(name) if name == "readme"));
    }

    #[test]
    fn test_encode_name_with_delimiter() {
        let mut backend = MemoryBackend::new();
        backend.insert("a,b.txt", 0o644, "text");

        let err = Encoder::new()
            .encode_to_vec(&backend, &inputs(&["a,b.txt"]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[test]
    fn test_encode_missing_file() {
        let backend = MemoryBackend::new();
        let err = Encoder::new()
            .encode_to_vec(&backend, &inputs(&["ghost.txt"]))
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_encode_custom_threshold() {
        let mut backend = MemoryBackend::new();
        backend.insert("codes", 0o644, "ab12");

        assert!(Encoder::new().encode_to_vec(&backend, &inputs(&["codes"])).is_ok());
        let strict = Encoder::new().with_classifier(ClassifierConfig { threshold_percent: 40.0 });
        assert!(matches!(
            strict.encode_to_vec(&backend, &inputs(&["codes"])),
            Err(Error::InputRejected { .. })
        ));
    }

    #[test]
    fn test_encode_no_inputs() {
        let backend = MemoryBackend::new();
        let out = Encoder::new().encode_to_vec(&backend, &[]).unwrap();
        assert_eq!(out, b"|");
    }

    #[test]
    fn test_encode_to_path_requires_extension() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new();
        let err = Encoder::new()
            .encode_to_path(&backend, &[], &dir.path().join("out.tar"))
            .unwrap_err();
        assert!(matches!(err, Error::ExtensionMismatch { .. }));
    }

    #[test]
    fn test_encode_to_path_failure_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.sau");
        let mut backend = MemoryBackend::new();
        backend.insert("bad", 0o644, "9 lives");

        let err = Encoder::new()
            .encode_to_path(&backend, &inputs(&["bad"]), &output)
            .unwrap_err();
        assert!(matches!(err, Error::InputRejected { .. }));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Serves `text` on the first open and `textmore` afterwards.
    struct GrowingSource {
        opens: Cell<usize>,
    }

    impl ContentSource for GrowingSource {
        fn metadata(&self, _path: &Path) -> io::Result<FileMeta> {
            Ok(FileMeta {
                size: 4,
                mode: 0o644,
                is_file: true,
            })
        }

        fn open(&self, _path: &Path) -> io::Result<Box<dyn Read + '_>> {
            let n = self.opens.get();
            self.opens.set(n + 1);
            let data: &'static [u8] = if n == 0 { b"text" } else { b"textmore" };
            Ok(Box::new(Cursor::new(data)))
        }
    }

    #[test]
    fn test_encode_file_changed_between_passes() {
        let source = GrowingSource { opens: Cell::new(0) };
        let err = Encoder::new()
            .encode_to_vec(&source, &inputs(&["grows.txt"]))
            .unwrap_err();
        match err {
            Error::Io { path, source } => {
                assert_eq!(path, PathBuf::from("grows.txt"));
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_encode_to_path_changed_file_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.sau");
        let source = GrowingSource { opens: Cell::new(0) };

        let err = Encoder::new()
            .encode_to_path(&source, &inputs(&["grows.txt"]), &output)
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_encode_non_ascii_name() {
        let mut backend = MemoryBackend::new();
        backend.insert("in/naïve\nx.txt", 0o644, "hello");
        let err = Encoder::new()
            .encode_to_vec(&backend, &inputs(&["in/naïve\nx.txt"]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_encode_to_path_mode_follows_umask() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.sau");
        let mut backend = MemoryBackend::new();
        backend.insert("a.txt", 0o600, "hello");
        Encoder::new()
            .encode_to_path(&backend, &inputs(&["a.txt"]), &output)
            .unwrap();

        let reference = dir.path().join("reference");
        std::fs::File::create(&reference).unwrap();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&output), mode(&reference));
    }
}
