#![allow(missing_docs)]

use std::error::Error;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::{
    memory::InMemory, path::Path as ObjectPath, GetOptions, GetResult, ListResult,
    MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOptions, PutOptions, PutPayload,
    PutResult, Result as ObjectStoreResult, UploadPart,
};

use ncarray_object_store::ObjectStoreBackend;
use ncarray_storage::{
    config::{BackendOptions, ByteSize, Config, EndpointConfig},
    registry::create_backend,
    OpenMode, StorageBackendTraits, StorageError,
};

fn small_parts() -> BackendOptions {
    BackendOptions {
        part_size: ByteSize(4),
        max_parts: 2,
        connect_timeout: 1.0,
        read_timeout: 1.0,
    }
}

/// An in-memory store which can fail a multipart part or stall reads.
#[derive(Default)]
struct FailingStore {
    inner: InMemory,
    fail_part: Option<usize>,
    stall_reads: Arc<AtomicBool>,
    aborts: Arc<AtomicUsize>,
}

impl fmt::Display for FailingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailingStore")
    }
}

impl fmt::Debug for FailingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingStore")
            .field("fail_part", &self.fail_part)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct FailingUpload {
    inner: Box<dyn MultipartUpload>,
    next_part: usize,
    fail_part: Option<usize>,
    aborts: Arc<AtomicUsize>,
}

#[async_trait]
impl MultipartUpload for FailingUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        let part = self.next_part;
        self.next_part += 1;
        if self.fail_part == Some(part) {
            Box::pin(async move {
                Err(object_store::Error::Generic {
                    store: "FailingStore",
                    source: format!("part {part} rejected").into(),
                })
            })
        } else {
            self.inner.put_part(data)
        }
    }

    async fn complete(&mut self) -> ObjectStoreResult<PutResult> {
        self.inner.complete().await
    }

    async fn abort(&mut self) -> ObjectStoreResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put_opts(
        &self,
        location: &ObjectPath,
        payload: PutPayload,
        opts: PutOptions,
    ) -> ObjectStoreResult<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &ObjectPath,
        opts: PutMultipartOptions,
    ) -> ObjectStoreResult<Box<dyn MultipartUpload>> {
        let inner = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(FailingUpload {
            inner,
            next_part: 0,
            fail_part: self.fail_part,
            aborts: self.aborts.clone(),
        }))
    }

    async fn get_opts(
        &self,
        location: &ObjectPath,
        options: GetOptions,
    ) -> ObjectStoreResult<GetResult> {
        if self.stall_reads.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &ObjectPath) -> ObjectStoreResult<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&ObjectPath>) -> BoxStream<'static, ObjectStoreResult<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&ObjectPath>) -> ObjectStoreResult<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> ObjectStoreResult<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &ObjectPath, to: &ObjectPath) -> ObjectStoreResult<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

#[test]
fn object_store_backend_in_memory() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(InMemory::new());
    let backend = ObjectStoreBackend::new_with_store("mem", BackendOptions::default(), store)?;
    assert!(!backend.is_local());
    ncarray_storage::backend_test::backend_write_read(&backend, "mem://local/bucket")?;
    ncarray_storage::backend_test::backend_create_truncates(&backend, "mem://local/bucket")?;
    // Connections are released after every operation
    assert_eq!(backend.pool().num_connections("mem://local/bucket"), 1);
    assert_eq!(backend.pool().num_available("mem://local/bucket"), 1);
    Ok(())
}

#[test]
fn object_store_backend_small_parts() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(InMemory::new());
    let backend = ObjectStoreBackend::new_with_store("mem", small_parts(), store)?;
    ncarray_storage::backend_test::backend_write_read(&backend, "mem://local/bucket")?;
    ncarray_storage::backend_test::backend_create_truncates(&backend, "mem://local/bucket")?;
    Ok(())
}

#[test]
fn object_store_multipart_upload() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(InMemory::new());
    let backend = ObjectStoreBackend::new_with_store("mem", small_parts(), store.clone())?;
    let uri = "mem://local/bucket/dir/data.nc";
    let data: Vec<u8> = (0..10).collect();

    let mut handle = backend.open(uri, OpenMode::Create)?;
    handle.write(&data)?;
    handle.close()?;

    let stored = futures::executor::block_on(async {
        store.get(&ObjectPath::from("dir/data.nc")).await?.bytes().await
    })?;
    assert_eq!(stored.as_ref(), data.as_slice());

    // Downloads are split into ranged parts and reassembled
    assert_eq!(backend.size(uri)?, Some(10));
    let mut handle = backend.open(uri, OpenMode::Read)?;
    assert_eq!(handle.read_at(0, 10)?.as_ref(), data.as_slice());
    assert_eq!(handle.read_at(3, 6)?.as_ref(), &data[3..9]);
    assert_eq!(handle.read_at(9, 1)?.as_ref(), &[9]);
    assert!(handle.read_at(8, 4).is_err());
    handle.close()?;
    Ok(())
}

#[test]
fn object_store_multipart_abort() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FailingStore {
        fail_part: Some(1),
        ..Default::default()
    });
    let aborts = store.aborts.clone();
    let backend = ObjectStoreBackend::new_with_store("mem", small_parts(), store)?;
    let uri = "mem://local/bucket/data.nc";

    let mut handle = backend.open(uri, OpenMode::Create)?;
    handle.write(&[0; 10])?;
    let result = handle.close();
    assert!(matches!(
        result,
        Err(StorageError::MultipartTransferFailure { part: 1, .. })
    ));
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert!(!backend.exists(uri)?);

    // Objects within one part are unaffected
    let mut handle = backend.open(uri, OpenMode::Create)?;
    handle.write(&[1, 2, 3])?;
    handle.close()?;
    assert_eq!(backend.size(uri)?, Some(3));
    Ok(())
}

#[test]
fn object_store_timeout_discards_connection() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FailingStore::default());
    let stall_reads = store.stall_reads.clone();
    let options = BackendOptions {
        read_timeout: 0.2,
        ..BackendOptions::default()
    };
    let backend = ObjectStoreBackend::new_with_store("mem", options, store)?;
    let uri = "mem://local/bucket/data.nc";

    let mut handle = backend.open(uri, OpenMode::Create)?;
    handle.write(&[1, 2, 3])?;
    handle.close()?;
    assert_eq!(backend.pool().num_connections("mem://local/bucket"), 1);

    stall_reads.store(true, Ordering::SeqCst);
    let result = backend.open(uri, OpenMode::Read);
    assert!(matches!(result, Err(StorageError::Timeout { operation: "head", .. })));
    assert_eq!(backend.pool().num_connections("mem://local/bucket"), 0);

    // A new connection is established for the next request
    stall_reads.store(false, Ordering::SeqCst);
    assert_eq!(backend.size(uri)?, Some(3));
    assert_eq!(backend.pool().num_connections("mem://local/bucket"), 1);
    Ok(())
}

#[test]
fn object_store_invalid_uri() -> Result<(), Box<dyn Error>> {
    let backend =
        ObjectStoreBackend::new_with_store("mem", BackendOptions::default(), Arc::new(InMemory::new()))?;
    assert!(matches!(
        backend.open("mem://local/bucket", OpenMode::Create),
        Err(StorageError::InvalidUri(_))
    ));
    Ok(())
}

#[cfg(feature = "aws")]
#[test]
fn object_store_s3_registry() -> Result<(), Box<dyn Error>> {
    let uri = "s3://minio/bucket/a.nc";
    assert!(matches!(
        create_backend(uri, &Config::default()),
        Err(StorageError::ConfigError(_))
    ));

    let config = Config::default().with_endpoint(
        "minio",
        EndpointConfig {
            url: "http://localhost:9000".to_string(),
            credentials: None,
            backend: "s3".to_string(),
            region: None,
        },
    );
    let backend = create_backend(uri, &config)?;
    assert_eq!(backend.kind(), "s3");
    assert!(!backend.is_local());
    Ok(())
}
