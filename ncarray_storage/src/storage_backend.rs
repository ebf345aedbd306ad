use std::io::SeekFrom;

use auto_impl::auto_impl;

use crate::{Bytes, OpenMode, StorageError};

/// Storage backend traits.
///
/// A backend opens objects identified by a URI. Every backend kind (local file, memory, object store)
/// exposes the same positioned read and write operations through a [`StorageHandle`].
#[auto_impl(Arc, &)]
pub trait StorageBackendTraits: Send + Sync + std::fmt::Debug {
    /// The backend kind tag, e.g. `file`, `memory` or `s3`.
    fn kind(&self) -> &str;

    /// Returns true if objects are held on the local machine and do not need to be cached.
    fn is_local(&self) -> bool {
        true
    }

    /// Open the object at `uri` with `mode`.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the object does not exist and `mode` is [`OpenMode::Read`] or [`OpenMode::Update`],
    /// or another [`StorageError`] if there is an underlying storage error.
    fn open(&self, uri: &str, mode: OpenMode) -> Result<StorageHandle, StorageError>;

    /// Return the size in bytes of the object at `uri`.
    ///
    /// Returns [`None`] if the object does not exist.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size(&self, uri: &str) -> Result<Option<u64>, StorageError>;

    /// Returns true if the object at `uri` exists.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn exists(&self, uri: &str) -> Result<bool, StorageError> {
        Ok(self.size(uri)?.is_some())
    }

    /// Return an identifier of the current contents of the object at `uri`, such as an `ETag`.
    ///
    /// The identifier changes whenever the object is rewritten.
    /// Returns [`None`] if the object does not exist or the backend does not identify versions.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn version(&self, _uri: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    /// Remove the object at `uri`. Succeeds if the object does not exist.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn remove(&self, uri: &str) -> Result<(), StorageError>;
}

/// The operations an open object supports.
///
/// Implementations do not track a position, [`StorageHandle`] adds the cursor.
pub trait StorageHandleTraits: Send + Sync {
    /// The URI of the object.
    fn uri(&self) -> &str;

    /// The mode the object was opened with.
    fn mode(&self) -> OpenMode;

    /// Read `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidByteRangeError`] if the range extends beyond the end of the object,
    /// or another [`StorageError`] if there is an underlying storage error.
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError>;

    /// Write `value` starting at `offset`, extending the object if required.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn write_at(&mut self, offset: u64, value: &[u8]) -> Result<(), StorageError>;

    /// The current size of the object in bytes.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size(&self) -> Result<u64, StorageError>;

    /// Flush pending writes and release the object.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if pending writes could not be committed.
    fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// A handle to an open object.
///
/// Wraps a backend specific [`StorageHandleTraits`] implementation with a cursor, giving the
/// `read`/`write`/`seek`/`tell` interface of a file.
pub struct StorageHandle {
    inner: Box<dyn StorageHandleTraits>,
    position: u64,
}

impl std::fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("uri", &self.inner.uri())
            .field("mode", &self.inner.mode())
            .field("position", &self.position)
            .finish()
    }
}

impl StorageHandle {
    /// Create a new storage handle positioned at the start of the object.
    #[must_use]
    pub fn new(inner: Box<dyn StorageHandleTraits>) -> Self {
        Self { inner, position: 0 }
    }

    /// The URI of the object.
    #[must_use]
    pub fn uri(&self) -> &str {
        self.inner.uri()
    }

    /// The mode the object was opened with.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    /// The size of the object in bytes.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    pub fn size(&self) -> Result<u64, StorageError> {
        self.inner.size()
    }

    /// Read `length` bytes at `offset`. The cursor is not moved.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the range is out of bounds or there is an underlying storage error.
    pub fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        self.inner.read_at(offset, length)
    }

    /// Read up to `length` bytes from the cursor and advance it.
    ///
    /// Fewer bytes are returned if the end of the object is reached.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    pub fn read(&mut self, length: u64) -> Result<Bytes, StorageError> {
        let size = self.size()?;
        let length = std::cmp::min(length, size.saturating_sub(self.position));
        let bytes = self.read_at(self.position, length)?;
        self.position += length;
        Ok(bytes)
    }

    /// Read from the cursor to the end of the object.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    pub fn read_to_end(&mut self) -> Result<Bytes, StorageError> {
        self.read(u64::MAX)
    }

    /// Write `value` at `offset`. The cursor is not moved.
    ///
    /// # Errors
    /// Returns [`StorageError::ReadOnly`] if the object was opened for reading,
    /// or another [`StorageError`] if there is an underlying storage error.
    pub fn write_at(&mut self, offset: u64, value: &[u8]) -> Result<(), StorageError> {
        if !self.mode().is_writable() {
            return Err(StorageError::ReadOnly(self.uri().to_string()));
        }
        if value.is_empty() {
            return Ok(());
        }
        self.inner.write_at(offset, value)
    }

    /// Write `value` at the cursor and advance it.
    ///
    /// # Errors
    /// Returns [`StorageError::ReadOnly`] if the object was opened for reading,
    /// or another [`StorageError`] if there is an underlying storage error.
    pub fn write(&mut self, value: &[u8]) -> Result<(), StorageError> {
        self.write_at(self.position, value)?;
        self.position += value.len() as u64;
        Ok(())
    }

    /// Move the cursor and return its new position.
    ///
    /// Seeking beyond the end of the object is permitted, a subsequent write extends the object.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidSeek`] if the new position would be negative.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StorageError> {
        let new_position = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.size()?) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
        };
        self.position =
            u64::try_from(new_position).map_err(|_| StorageError::InvalidSeek(new_position))?;
        Ok(self.position)
    }

    /// The cursor position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Flush pending writes and release the object.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if pending writes could not be committed.
    pub fn close(self) -> Result<(), StorageError> {
        self.inner.close()
    }
}
