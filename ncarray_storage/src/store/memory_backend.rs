//! An in-memory storage backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::byte_range::ByteRange;
use crate::{
    Bytes, OpenMode, StorageBackendTraits, StorageError, StorageHandle, StorageHandleTraits,
};

type DataMap = Arc<Mutex<BTreeMap<String, BytesMut>>>;

/// An in-memory storage backend.
///
/// Objects are keyed by their full URI. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data_map: DataMap,
}

impl MemoryBackend {
    /// Create a new memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the URIs of all objects, in sorted order.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        self.data_map.lock().keys().cloned().collect()
    }
}

fn set_impl(data: &mut BytesMut, value: &[u8], offset: u64) {
    if offset == 0 && data.is_empty() {
        data.extend_from_slice(value);
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        let length = offset + value.len();
        if data.len() < length {
            data.resize(length, 0);
        }
        data[offset..length].copy_from_slice(value);
    }
}

fn read_impl(data: &[u8], offset: u64, length: u64) -> Result<Bytes, StorageError> {
    let range = ByteRange::new(offset, length).validate(data.len() as u64)?;
    #[allow(clippy::cast_possible_truncation)]
    let range = range.start as usize..range.end as usize;
    Ok(Bytes::copy_from_slice(&data[range]))
}

impl StorageBackendTraits for MemoryBackend {
    fn kind(&self) -> &str {
        "memory"
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<StorageHandle, StorageError> {
        let mut data_map = self.data_map.lock();
        match mode {
            OpenMode::Read | OpenMode::Update => {
                if !data_map.contains_key(uri) {
                    return Err(StorageError::NotFound(uri.to_string()));
                }
            }
            OpenMode::Create => {
                data_map.insert(uri.to_string(), BytesMut::new());
            }
        }
        drop(data_map);
        Ok(StorageHandle::new(Box::new(MemoryHandle {
            data_map: self.data_map.clone(),
            uri: uri.to_string(),
            mode,
        })))
    }

    fn size(&self, uri: &str) -> Result<Option<u64>, StorageError> {
        Ok(self
            .data_map
            .lock()
            .get(uri)
            .map(|data| data.len() as u64))
    }

    fn remove(&self, uri: &str) -> Result<(), StorageError> {
        self.data_map.lock().remove(uri);
        Ok(())
    }
}

/// A handle to an object in a [`MemoryBackend`].
struct MemoryHandle {
    data_map: DataMap,
    uri: String,
    mode: OpenMode,
}

impl StorageHandleTraits for MemoryHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let data_map = self.data_map.lock();
        let data = data_map
            .get(&self.uri)
            .ok_or_else(|| StorageError::NotFound(self.uri.clone()))?;
        read_impl(data, offset, length)
    }

    fn write_at(&mut self, offset: u64, value: &[u8]) -> Result<(), StorageError> {
        let mut data_map = self.data_map.lock();
        let data = data_map.entry(self.uri.clone()).or_default();
        set_impl(data, value, offset);
        Ok(())
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.data_map
            .lock()
            .get(&self.uri)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(self.uri.clone()))
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

/// A read only handle over bytes already held in memory.
///
/// Used to serve an object that has been streamed fully into memory.
pub struct BytesHandle {
    uri: String,
    bytes: Bytes,
}

impl BytesHandle {
    /// Create a new [`StorageHandle`] reading from `bytes`.
    #[must_use]
    pub fn new_handle(uri: impl Into<String>, bytes: Bytes) -> StorageHandle {
        StorageHandle::new(Box::new(Self {
            uri: uri.into(),
            bytes,
        }))
    }
}

impl StorageHandleTraits for BytesHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mode(&self) -> OpenMode {
        OpenMode::Read
    }

    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let range = ByteRange::new(offset, length).validate(self.bytes.len() as u64)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.bytes.slice(range.start as usize..range.end as usize))
    }

    fn write_at(&mut self, _offset: u64, _value: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly(self.uri.clone()))
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.bytes.len() as u64)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use super::*;

    #[test]
    fn memory_backend_cursor() -> Result<(), Box<dyn std::error::Error>> {
        let backend = MemoryBackend::new();
        let mut handle = backend.open("memory://a/b.nc", OpenMode::Create)?;
        handle.write(&[0, 1, 2, 3])?;
        assert_eq!(handle.tell(), 4);
        handle.seek(SeekFrom::Start(6))?;
        handle.write(&[6])?;
        assert_eq!(handle.size()?, 7);
        handle.seek(SeekFrom::End(-3))?;
        assert_eq!(handle.read(10)?.as_ref(), &[0, 0, 6]);
        assert!(handle.seek(SeekFrom::Current(-100)).is_err());
        handle.close()?;

        let mut handle = backend.open("memory://a/b.nc", OpenMode::Read)?;
        assert_eq!(handle.read_at(1, 2)?.as_ref(), &[1, 2]);
        assert!(handle.read_at(5, 5).is_err());
        assert!(matches!(
            handle.write(&[1]),
            Err(StorageError::ReadOnly(_))
        ));
        assert_eq!(backend.size("memory://a/b.nc")?, Some(7));
        backend.remove("memory://a/b.nc")?;
        assert!(!backend.exists("memory://a/b.nc")?);
        assert!(matches!(
            backend.open("memory://a/b.nc", OpenMode::Update),
            Err(StorageError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn bytes_handle() -> Result<(), Box<dyn std::error::Error>> {
        let mut handle = BytesHandle::new_handle("s3://host/a", Bytes::from_static(&[1, 2, 3]));
        assert_eq!(handle.read_to_end()?.as_ref(), &[1, 2, 3]);
        assert!(handle.read_to_end()?.is_empty());
        assert!(handle.write_at(0, &[1]).is_err());
        Ok(())
    }
}
