//! File access used by the encoder and decoder
//!
//! The codec never touches `std::fs` directly. Inputs are read through a
//! [`ContentSource`] and extracted files are written through a
//! [`ContentSink`], so the same code runs against the real filesystem
//! ([`FsBackend`]) or an in-memory tree ([`MemoryBackend`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use crate::archive::PERMISSION_MASK;

/// What the encoder needs to know about an input before reading it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    /// Permission bits, already masked to `0o777`
    pub mode: u32,
    pub is_file: bool,
}

/// Read side of a backend
pub trait ContentSource {
    fn metadata(&self, path: &Path) -> io::Result<FileMeta>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>>;
}

/// Write side of a backend
pub trait ContentSink {
    fn create_dir_all(&mut self, dir: &Path) -> io::Result<()>;

    /// Create or truncate `path`, write `data`, and leave the file with
    /// exactly the permission bits in `mode`.
    fn write_file(&mut self, path: &Path, mode: u32, data: &[u8]) -> io::Result<()>;
}

/// Backend over the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsBackend;

impl ContentSource for FsBackend {
    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        let meta = fs::metadata(path)?;
        Ok(FileMeta {
            size: meta.len(),
            mode: mode_of(&meta),
            is_file: meta.is_file(),
        })
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}

impl ContentSink for FsBackend {
    fn create_dir_all(&mut self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn write_file(&mut self, path: &Path, mode: u32, data: &[u8]) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode & PERMISSION_MASK);
        }

        let mut file = match options.open(path) {
            Ok(file) => file,
            // A read-only file left by an earlier extraction is replaced, not edited.
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && is_regular_file(path) => {
                fs::remove_file(path)?;
                options.open(path)?
            }
            Err(e) => return Err(e),
        };
        file.write_all(data)?;
        file.flush()?;
        // The umask and any pre-existing file both get in the way of `mode`.
        set_mode(&file, mode)
    }
}

fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & PERMISSION_MASK
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode & PERMISSION_MASK))
}

#[cfg(not(unix))]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    file.set_permissions(perms)
}

/// A file held by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    pub data: Vec<u8>,
    pub mode: u32,
}

/// In-memory backend, keyed by full path
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    files: BTreeMap<PathBuf, MemoryFile>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&mut self, path: impl Into<PathBuf>, mode: u32, data: impl Into<Vec<u8>>) {
        self.files.insert(
            path.into(),
            MemoryFile {
                data: data.into(),
                mode: mode & PERMISSION_MASK,
            },
        );
    }

    /// Register a directory, so that it reports as a non-file input
    pub fn insert_dir(&mut self, path: impl Into<PathBuf>) {
        self.dirs.insert(path.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&MemoryFile> {
        self.files.get(path.as_ref())
    }

    pub fn contains_dir(&self, path: impl AsRef<Path>) -> bool {
        self.dirs.contains(path.as_ref())
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &MemoryFile)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl ContentSource for MemoryBackend {
    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        if let Some(file) = self.files.get(path) {
            return Ok(FileMeta {
                size: file.data.len() as u64,
                mode: file.mode,
                is_file: true,
            });
        }
        if self.dirs.contains(path) {
            return Ok(FileMeta {
                size: 0,
                mode: 0o755,
                is_file: false,
            });
        }
        Err(not_found(path))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        let file = self.files.get(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(Cursor::new(file.data.as_slice())))
    }
}

impl ContentSink for MemoryBackend {
    fn create_dir_all(&mut self, dir: &Path) -> io::Result<()> {
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            if self.files.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", ancestor.display()),
                ));
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, mode: u32, data: &[u8]) -> io::Result<()> {
        if self.dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", path.display()),
            ));
        }
        self.insert(path, mode, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let mut backend = MemoryBackend::new();
        backend.insert("in/a.txt", 0o100644, "hello");

        let meta = backend.metadata(Path::new("in/a.txt")).unwrap();
        assert_eq!(meta, FileMeta { size: 5, mode: 0o644, is_file: true });

        let mut content = String::new();
        backend
            .open(Path::new("in/a.txt"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_memory_missing_file() {
        let backend = MemoryBackend::new();
        let err = backend.metadata(Path::new("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(backend.open(Path::new("nope")).is_err());
    }

    #[test]
    fn test_memory_dirs() {
        let mut backend = MemoryBackend::new();
        backend.create_dir_all(Path::new("out/nested")).unwrap();
        assert!(backend.contains_dir("out"));
        assert!(backend.contains_dir("out/nested"));
        assert!(!backend.metadata(Path::new("out")).unwrap().is_file);
        assert!(backend.write_file(Path::new("out"), 0o644, b"x").is_err());
    }

    #[test]
    fn test_memory_write_overwrites() {
        let mut backend = MemoryBackend::new();
        backend.write_file(Path::new("f"), 0o600, b"first").unwrap();
        backend.write_file(Path::new("f"), 0o644, b"2nd").unwrap();
        assert_eq!(
            backend.get("f"),
            Some(&MemoryFile { data: b"2nd".to_vec(), mode: 0o644 })
        );
        assert_eq!(backend.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_fs_write_sets_exact_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.txt");
        let mut backend = FsBackend;

        backend.write_file(&path, 0o755, b"run me").unwrap();
        assert_eq!(backend.metadata(&path).unwrap().mode, 0o755);

        // Existing files are truncated and take the new mode.
        backend.write_file(&path, 0o600, b"x").unwrap();
        let meta = backend.metadata(&path).unwrap();
        assert_eq!(meta.mode, 0o600);
        assert_eq!(meta.size, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_fs_write_replaces_read_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        let mut backend = FsBackend;

        backend.write_file(&path, 0o444, b"first").unwrap();
        assert_eq!(backend.metadata(&path).unwrap().mode, 0o444);

        backend.write_file(&path, 0o444, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(backend.metadata(&path).unwrap().mode, 0o444);
    }
}
