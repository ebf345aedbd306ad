#![allow(missing_docs)]

use std::error::Error;

use ncarray_filesystem::FilesystemBackend;
use ncarray_storage::{registry::create_backend, Config, OpenMode, StorageBackendTraits};

#[test]
fn filesystem() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let backend = FilesystemBackend::new();
    let prefix = path.path().to_string_lossy().to_string();
    ncarray_storage::backend_test::backend_write_read(&backend, &prefix)?;
    ncarray_storage::backend_test::backend_create_truncates(&backend, &prefix)?;
    Ok(())
}

#[test]
fn filesystem_registered() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let uri = path.path().join("a").join("b.nc");
    let uri = uri.to_string_lossy();
    let backend = create_backend(&uri, &Config::default())?;
    assert_eq!(backend.kind(), "file");
    let mut handle = backend.open(&uri, OpenMode::Create)?;
    handle.write(b"ncarray")?;
    handle.close()?;
    assert!(path.path().join("a").join("b.nc").exists());
    Ok(())
}

#[test]
fn filesystem_concurrent_handles() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let uri = path.path().join("c.nc").to_string_lossy().to_string();
    let backend = FilesystemBackend::new();
    let mut handle = backend.open(&uri, OpenMode::Create)?;
    handle.write(&[0; 64])?;
    handle.close()?;
    std::thread::scope(|scope| -> Result<(), Box<dyn Error + Send + Sync>> {
        let handles = (0u8..8)
            .map(|i| {
                let backend = &backend;
                let uri = &uri;
                scope.spawn(move || -> Result<(), ncarray_storage::StorageError> {
                    let mut handle = backend.open(uri, OpenMode::Update)?;
                    handle.write_at(u64::from(i) * 8, &[i; 8])?;
                    handle.close()
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().map_err(|_| "thread panicked")??;
        }
        Ok(())
    })
    .map_err(|err| err.to_string())?;
    let mut handle = backend.open(&uri, OpenMode::Read)?;
    let bytes = handle.read_to_end()?;
    for (i, chunk) in bytes.chunks(8).enumerate() {
        assert!(chunk.iter().all(|&b| usize::from(b) == i));
    }
    Ok(())
}
