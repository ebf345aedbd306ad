//! [`object_store`] backend support for the [`ncarray`](https://docs.rs/ncarray/latest/ncarray/index.html) crate.
//!
//! Objects are addressed as `<scheme>://<endpoint alias>/<bucket>/<key>`, e.g. `s3://minio/bucket/data/a.nc`.
//! Clients are created per bucket by an [`ObjectStoreConnector`] and reused through a
//! [`ConnectionPool`](ncarray_storage::connection_pool::ConnectionPool).
//!
//! The backend presents the synchronous [`StorageBackendTraits`] API by driving the asynchronous
//! [`ObjectStore`] API on a runtime owned by the backend, so it must not be used from within an asynchronous context.
//!
//! Objects larger than the configured part size are transferred as multipart uploads and concurrent ranged downloads.
//! Writes are buffered and committed when the handle is closed: an upload is only visible once every part has
//! succeeded and the completion step is acknowledged, otherwise it is aborted.
//!
//! ```rust,ignore
//! let store = Arc::new(object_store::memory::InMemory::new());
//! let backend = ObjectStoreBackend::new_with_store("mem", BackendOptions::default(), store)?;
//! let mut handle = backend.open("mem://local/bucket/a.nc", OpenMode::Create)?;
//! handle.write(b"data")?;
//! handle.close()?;
//! ```
//!
//! ## Licence
//! `ncarray_object_store` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.

#[cfg(feature = "aws")]
mod s3;
mod transfer;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::{path::Path as ObjectPath, ObjectMeta, ObjectStore};

use ncarray_storage::{
    config::BackendOptions,
    connection_pool::{ConnectionPool, PoolLease},
    OpenMode, StorageBackendTraits, StorageError, StorageHandle, StorageHandleTraits,
};

#[cfg(feature = "aws")]
pub use s3::s3_connector;

/// The location of an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    /// The endpoint and bucket, e.g. `s3://minio/bucket`. Connections are pooled by this key.
    pub endpoint: String,
    /// The endpoint alias (the URI host).
    pub alias: String,
    /// The bucket.
    pub bucket: String,
    /// The key within the bucket.
    pub path: ObjectPath,
}

impl ObjectLocation {
    /// Parse an object URI of the form `<scheme>://<alias>/<bucket>/<key>`.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidUri`] if the URI has no host, bucket or key.
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidUri(uri.to_string());
        let url = url::Url::parse(uri).map_err(|_| invalid())?;
        let alias = url.host_str().ok_or_else(invalid)?.to_string();
        let mut segments = url
            .path_segments()
            .ok_or_else(invalid)?
            .filter(|segment| !segment.is_empty());
        let bucket = segments.next().ok_or_else(invalid)?.to_string();
        let key = segments.collect::<Vec<_>>().join("/");
        if key.is_empty() {
            return Err(invalid());
        }
        let path = ObjectPath::parse(&key).map_err(|_| invalid())?;
        Ok(Self {
            endpoint: format!("{}://{alias}/{bucket}", url.scheme()),
            alias,
            bucket,
            path,
        })
    }
}

/// Creates an [`ObjectStore`] client for the bucket of an [`ObjectLocation`].
pub type ObjectStoreConnector =
    Arc<dyn Fn(&ObjectLocation) -> Result<Arc<dyn ObjectStore>, StorageError> + Send + Sync>;

/// A pooled client.
///
/// Each connection is a distinct allocation, so the pool can tell connections apart even if a connector hands out the same store.
#[derive(Debug)]
pub struct ObjectStoreConnection {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreConnection {
    /// The client.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

struct Shared {
    kind: String,
    options: BackendOptions,
    connector: ObjectStoreConnector,
    pool: Arc<ConnectionPool<ObjectStoreConnection>>,
    runtime: tokio::runtime::Runtime,
}

/// An object store backend.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("kind", &self.shared.kind)
            .field("options", &self.shared.options)
            .field("pool", &self.shared.pool)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreBackend {
    /// Create a new object store backend of `kind` which creates clients with `connector`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the runtime cannot be created.
    pub fn new(
        kind: impl Into<String>,
        options: BackendOptions,
        connector: ObjectStoreConnector,
    ) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            shared: Arc::new(Shared {
                kind: kind.into(),
                options,
                connector,
                pool: Arc::new(ConnectionPool::new()),
                runtime,
            }),
        })
    }

    /// Create a new object store backend of `kind` in which every bucket is served by `store`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the runtime cannot be created.
    pub fn new_with_store(
        kind: impl Into<String>,
        options: BackendOptions,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, StorageError> {
        Self::new(kind, options, Arc::new(move |_: &ObjectLocation| Ok(store.clone())))
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool<ObjectStoreConnection> {
        &self.shared.pool
    }

    /// The backend options.
    #[must_use]
    pub fn options(&self) -> &BackendOptions {
        &self.shared.options
    }
}

impl Shared {
    fn lease(&self, location: &ObjectLocation) -> Result<PoolLease<ObjectStoreConnection>, StorageError> {
        self.pool.lease(&location.endpoint, || {
            let store = (self.connector)(location)?;
            Ok(Arc::new(ObjectStoreConnection { store }))
        })
    }

    /// Run `future` to completion on the backend runtime, failing if it does not complete within `timeout`.
    fn block_on_timeout<T, F>(
        &self,
        uri: &str,
        operation: &'static str,
        timeout: Duration,
        future: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, future).await })
            .map_err(|_| StorageError::Timeout {
                uri: uri.to_string(),
                operation,
                seconds: timeout.as_secs_f64(),
            })?
    }

    /// Run `operation` with a leased connection.
    ///
    /// A connection which timed out or failed to connect is removed from the pool rather than released.
    fn with_connection<T>(
        &self,
        location: &ObjectLocation,
        operation: impl FnOnce(&Self, Arc<dyn ObjectStore>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let lease = self.lease(location)?;
        let store = lease.connection().store().clone();
        let result = operation(self, store);
        if matches!(
            result,
            Err(StorageError::Timeout { .. } | StorageError::ConnectionError { .. })
        ) {
            lease.discard();
        }
        result
    }

    fn head(&self, uri: &str, location: &ObjectLocation) -> Result<Option<ObjectMeta>, StorageError> {
        let timeout = self.options.read_timeout();
        self.with_connection(location, |shared, store| {
            let path = location.path.clone();
            let result = shared.block_on_timeout(uri, "head", timeout, async move {
                store
                    .head(&path)
                    .await
                    .map_err(|err| map_object_store_error(uri, err))
            });
            match result {
                Ok(meta) => Ok(Some(meta)),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn read_range(
        &self,
        uri: &str,
        location: &ObjectLocation,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, StorageError> {
        self.with_connection(location, |shared, store| {
            transfer::download(shared, store, uri, &location.path, offset..offset + length)
        })
    }

    fn upload(&self, uri: &str, location: &ObjectLocation, data: Bytes) -> Result<(), StorageError> {
        self.with_connection(location, |shared, store| {
            transfer::upload(shared, store, uri, &location.path, data)
        })
    }
}

/// Convert an [`object_store::Error`] to a [`StorageError`].
#[must_use]
pub fn map_object_store_error(uri: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(uri.to_string()),
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => StorageError::ConnectionError {
            uri: uri.to_string(),
            reason: err.to_string(),
        },
        err => StorageError::Other(format!("{uri}: {err}")),
    }
}

impl StorageBackendTraits for ObjectStoreBackend {
    fn kind(&self) -> &str {
        &self.shared.kind
    }

    fn is_local(&self) -> bool {
        false
    }

    fn open(&self, uri: &str, mode: OpenMode) -> Result<StorageHandle, StorageError> {
        let location = ObjectLocation::parse(uri)?;
        let shared = self.shared.clone();
        match mode {
            OpenMode::Read => {
                let size = shared
                    .head(uri, &location)?
                    .ok_or_else(|| StorageError::NotFound(uri.to_string()))?
                    .size;
                Ok(StorageHandle::new(Box::new(ObjectReadHandle {
                    uri: uri.to_string(),
                    location,
                    size,
                    shared,
                })))
            }
            OpenMode::Update => {
                let size = shared
                    .head(uri, &location)?
                    .ok_or_else(|| StorageError::NotFound(uri.to_string()))?
                    .size;
                let buffer = shared.read_range(uri, &location, 0, size)?.to_vec();
                Ok(StorageHandle::new(Box::new(ObjectWriteHandle {
                    uri: uri.to_string(),
                    location,
                    mode,
                    buffer,
                    dirty: false,
                    shared,
                })))
            }
            OpenMode::Create => Ok(StorageHandle::new(Box::new(ObjectWriteHandle {
                uri: uri.to_string(),
                location,
                mode,
                buffer: Vec::new(),
                dirty: true,
                shared,
            }))),
        }
    }

    fn size(&self, uri: &str) -> Result<Option<u64>, StorageError> {
        let location = ObjectLocation::parse(uri)?;
        Ok(self.shared.head(uri, &location)?.map(|meta| meta.size))
    }

    fn version(&self, uri: &str) -> Result<Option<String>, StorageError> {
        let location = ObjectLocation::parse(uri)?;
        Ok(self.shared.head(uri, &location)?.map(|meta| {
            meta.e_tag
                .or(meta.version)
                .unwrap_or_else(|| format!("{}/{}", meta.last_modified.to_rfc3339(), meta.size))
        }))
    }

    fn remove(&self, uri: &str) -> Result<(), StorageError> {
        let location = ObjectLocation::parse(uri)?;
        let timeout = self.shared.options.read_timeout();
        self.shared.with_connection(&location, |shared, store| {
            let path = location.path.clone();
            let result = shared.block_on_timeout(uri, "delete", timeout, async move {
                store
                    .delete(&path)
                    .await
                    .map_err(|err| map_object_store_error(uri, err))
            });
            match result {
                Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}

/// A handle to an object opened for reading. Reads are ranged requests.
struct ObjectReadHandle {
    uri: String,
    location: ObjectLocation,
    size: u64,
    shared: Arc<Shared>,
}

impl StorageHandleTraits for ObjectReadHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mode(&self) -> OpenMode {
        OpenMode::Read
    }

    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        ncarray_storage::byte_range::ByteRange::new(offset, length)
            .validate(self.size)?;
        self.shared
            .read_range(&self.uri, &self.location, offset, length)
    }

    fn write_at(&mut self, _offset: u64, _value: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly(self.uri.clone()))
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.size)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

/// A handle to an object opened for writing. Writes are buffered and uploaded on close.
struct ObjectWriteHandle {
    uri: String,
    location: ObjectLocation,
    mode: OpenMode,
    buffer: Vec<u8>,
    dirty: bool,
    shared: Arc<Shared>,
}

impl StorageHandleTraits for ObjectWriteHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn read_at(&mut self, offset: u64, length: u64) -> Result<Bytes, StorageError> {
        let range = ncarray_storage::byte_range::ByteRange::new(offset, length)
            .validate(self.buffer.len() as u64)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(Bytes::copy_from_slice(
            &self.buffer[range.start as usize..range.end as usize],
        ))
    }

    fn write_at(&mut self, offset: u64, value: &[u8]) -> Result<(), StorageError> {
        let offset = usize::try_from(offset)
            .map_err(|_| StorageError::Other(format!("offset {offset} exceeds usize")))?;
        let end = offset + value.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset..end].copy_from_slice(value);
        self.dirty = true;
        Ok(())
    }

    fn size(&self) -> Result<u64, StorageError> {
        Ok(self.buffer.len() as u64)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        if self.dirty {
            self.shared
                .upload(&self.uri, &self.location, Bytes::from(self.buffer))
        } else {
            Ok(())
        }
    }
}
