//! A storage adapter which records performance metrics.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    Bytes, OpenMode, StorageBackendTraits, StorageError, StorageHandle, StorageHandleTraits,
};

#[derive(Debug, Default)]
struct Metrics {
    bytes_read: AtomicUsize,
    bytes_written: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    opens: AtomicUsize,
    objects_removed: AtomicUsize,
}

/// The performance metrics storage adapter. Accumulates metrics, such as bytes read and written.
///
/// It is intended to aid in testing by allowing the application to validate that metrics (e.g., bytes read/written,
/// objects opened) match expected values for specific operations, such as a slice touching only the partitions it overlaps.
///
/// ### Example
/// ```rust
/// # use std::sync::Arc;
/// # use ncarray_storage::store::MemoryBackend;
/// # use ncarray_storage::storage_adapter::performance_metrics::PerformanceMetricsBackend;
/// let backend = Arc::new(MemoryBackend::new());
/// let backend = Arc::new(PerformanceMetricsBackend::new(backend));
/// // do some backend operations...
/// // assert_eq!(backend.bytes_read(), ...);
/// // assert_eq!(backend.opens(), ...);
/// ```
#[derive(Debug)]
pub struct PerformanceMetricsBackend<TBackend: ?Sized> {
    backend: Arc<TBackend>,
    metrics: Arc<Metrics>,
}

impl<TBackend: ?Sized> PerformanceMetricsBackend<TBackend> {
    /// Create a new performance metrics storage adapter.
    #[must_use]
    pub fn new(backend: Arc<TBackend>) -> Self {
        Self {
            backend,
            metrics: Arc::default(),
        }
    }

    /// Reset the performance metrics.
    pub fn reset(&self) {
        self.metrics.bytes_read.store(0, Ordering::Relaxed);
        self.metrics.bytes_written.store(0, Ordering::Relaxed);
        self.metrics.reads.store(0, Ordering::Relaxed);
        self.metrics.writes.store(0, Ordering::Relaxed);
        self.metrics.opens.store(0, Ordering::Relaxed);
        self.metrics.objects_removed.store(0, Ordering::Relaxed);
    }

    /// Returns the number of bytes read.
    pub fn bytes_read(&self) -> usize {
        self.metrics.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes written.
    pub fn bytes_written(&self) -> usize {
        self.metrics.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of read requests.
    pub fn reads(&self) -> usize {
        self.metrics.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of write requests.
    pub fn writes(&self) -> usize {
        self.metrics.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of objects opened.
    pub fn opens(&self) -> usize {
        self.metrics.opens.load(Ordering::Relaxed)
    }

    /// Returns the number of remove requests.
    pub fn objects_removed(&self) -> usize {
        self.metrics.objects_removed.load(Ordering::Relaxed)
    }
}

impl<TBackend: ?Sized + StorageBackendTraits> StorageBackendTraits
    for PerformanceMetricsBackend<TBackend>
{
    fn kind(&self) -> &str {
        self.backend.kind()
    }

    fn is_local(&self) -> bool {
        self.backend.is_local()
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<StorageHandle, StorageError> {
        let handle = self.backend.open(uri, mode)?;
        self.metrics.opens.fetch_add(1, Ordering::Relaxed);
        Ok(StorageHandle::new(Box::new(PerformanceMetricsHandle {
            uri: uri.to_string(),
            handle,
            metrics: self.metrics.clone(),
        })))
    }

    fn size(&self, uri: &str) -> Result<Option<u64>, StorageError> {
        self.backend.size(uri)
    }

    fn version(&self, uri: &str) -> Result<Option<String>, StorageError> {
        self.backend.version(uri)
    }

    fn remove(&self, uri: &str) -> Result<(), StorageError> {
        self.metrics.objects_removed.fetch_add(1, Ordering::Relaxed);
        self.backend.remove(uri)
    }
}

struct PerformanceMetricsHandle {
    uri: String,
    handle: StorageHandle,
    metrics: Arc<Metrics>,
}

impl StorageHandleTraits for PerformanceMetricsHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mode(&self) -> OpenMode {
        self.handle.mode()
    }

    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let bytes = self.handle.read_at(offset, length)?;
        self.metrics
            .bytes_read
            .fetch_add(bytes.len(), Ordering::Relaxed);
        self.metrics.reads.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }

    fn write_at(&mut self, offset: u64, value: &[u8]) -> Result<(), StorageError> {
        self.metrics
            .bytes_written
            .fetch_add(value.len(), Ordering::Relaxed);
        self.metrics.writes.fetch_add(1, Ordering::Relaxed);
        self.handle.write_at(offset, value)
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.handle.size()
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        self.handle.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    #[test]
    fn performance_metrics() -> Result<(), Box<dyn std::error::Error>> {
        let backend = Arc::new(PerformanceMetricsBackend::new(Arc::new(MemoryBackend::new())));
        let mut handle = backend.open("memory://a", OpenMode::Create)?;
        handle.write(&[1, 2, 3, 4])?;
        handle.close()?;
        let mut handle = backend.open("memory://a", OpenMode::Read)?;
        handle.read_at(1, 2)?;
        handle.close()?;
        backend.remove("memory://a")?;
        assert_eq!(backend.opens(), 2);
        assert_eq!(backend.bytes_written(), 4);
        assert_eq!(backend.writes(), 1);
        assert_eq!(backend.bytes_read(), 2);
        assert_eq!(backend.reads(), 1);
        assert_eq!(backend.objects_removed(), 1);
        backend.reset();
        assert_eq!(backend.opens(), 0);
        Ok(())
    }
}
