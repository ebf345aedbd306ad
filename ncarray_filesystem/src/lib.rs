//! A local filesystem storage backend for the [`ncarray`](https://docs.rs/ncarray/latest/ncarray/index.html) crate.
//!
//! Objects are addressed by plain paths or `file://` URIs.
//! Reads and writes of the same path from different handles are serialised by a per-path lock.
//!
//! ## Licence
//! `ncarray_filesystem` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.

use ncarray_storage::{
    byte_range::ByteRange, registry::BackendPlugin, Bytes, Config, OpenMode, StorageBackend,
    StorageBackendTraits, StorageError, StorageHandle, StorageHandleTraits,
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

// Register the backend.
inventory::submit! {
    BackendPlugin::new(is_kind_file, create_backend_filesystem)
}

fn is_kind_file(kind: &str) -> bool {
    kind == "file"
}

fn create_backend_filesystem(_uri: &str, _config: &Config) -> Result<StorageBackend, StorageError> {
    Ok(Arc::new(FilesystemBackend::new()))
}

/// A filesystem path error.
#[derive(Debug, Error)]
pub enum FilesystemPathError {
    /// The URI is not a valid `file://` URI.
    #[error("invalid file uri {0}")]
    InvalidUri(String),
}

impl From<FilesystemPathError> for StorageError {
    fn from(err: FilesystemPathError) -> Self {
        Self::InvalidUri(err.to_string())
    }
}

/// Maps a URI to a filesystem [`PathBuf`].
///
/// # Errors
/// Returns a [`FilesystemPathError`] if `uri` is a `file://` URI which does not name a local path.
pub fn uri_to_fspath(uri: &str) -> Result<PathBuf, FilesystemPathError> {
    if uri.starts_with("file://") {
        let url = url::Url::parse(uri).map_err(|_| FilesystemPathError::InvalidUri(uri.to_string()))?;
        url.to_file_path()
            .map_err(|()| FilesystemPathError::InvalidUri(uri.to_string()))
    } else {
        Ok(PathBuf::from(uri))
    }
}

/// A synchronous local filesystem backend.
#[derive(Debug, Default)]
pub struct FilesystemBackend {
    files: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get_file_mutex(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut files = self.files.lock();
        let file = files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::default()))
            .clone();
        drop(files);
        file
    }
}

fn not_found(uri: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(uri.to_string())
    } else {
        err.into()
    }
}

impl StorageBackendTraits for FilesystemBackend {
    fn kind(&self) -> &str {
        "file"
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<StorageHandle, StorageError> {
        let path = uri_to_fspath(uri)?;
        let lock = self.get_file_mutex(&path);
        let file = {
            let _lock = lock.write();
            let mut flags = OpenOptions::new();
            match mode {
                OpenMode::Read => {
                    flags.read(true);
                }
                OpenMode::Update => {
                    flags.read(true).write(true);
                }
                OpenMode::Create => {
                    // Create directories
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() && !parent.exists() {
                            std::fs::create_dir_all(parent)?;
                        }
                    }
                    flags.read(true).write(true).create(true).truncate(true);
                }
            }
            flags.open(&path).map_err(|err| not_found(uri, err))?
        };
        Ok(StorageHandle::new(Box::new(FileHandle {
            uri: uri.to_string(),
            mode,
            file,
            lock,
        })))
    }

    fn size(&self, uri: &str) -> Result<Option<u64>, StorageError> {
        let path = uri_to_fspath(uri)?;
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&self, uri: &str) -> Result<(), StorageError> {
        let path = uri_to_fspath(uri)?;
        let lock = self.get_file_mutex(&path);
        let _lock = lock.write();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A handle to an open local file.
struct FileHandle {
    uri: String,
    mode: OpenMode,
    file: File,
    lock: Arc<RwLock<()>>,
}

impl StorageHandleTraits for FileHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let _lock = self.lock.read();
        let size = self.file.metadata()?.len();
        let range = ByteRange::new(offset, length).validate(size)?;
        self.file.seek(SeekFrom::Start(range.start))?;
        let length = usize::try_from(range.end - range.start)
            .map_err(|_| StorageError::Other(format!("read of {length} bytes exceeds usize")))?;
        let mut buffer = vec![0; length];
        self.file.read_exact(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }

    fn write_at(&mut self, offset: u64, value: &[u8]) -> Result<(), StorageError> {
        let _lock = self.lock.write();
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(value)?;
        Ok(())
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        if self.mode.is_writable() {
            let _lock = self.lock.write();
            self.file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_uri_to_path() {
        assert_eq!(
            uri_to_fspath("/tmp/a.nca").unwrap(),
            PathBuf::from("/tmp/a.nca")
        );
        #[cfg(not(target_os = "windows"))]
        assert_eq!(
            uri_to_fspath("file:///tmp/a.nca").unwrap(),
            PathBuf::from("/tmp/a.nca")
        );
        assert!(uri_to_fspath("file://host:port:x/a").is_err());
    }
}
