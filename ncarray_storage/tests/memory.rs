#![allow(missing_docs)]

use std::error::Error;

use ncarray_storage::store::MemoryBackend;

#[test]
fn memory_backend() -> Result<(), Box<dyn Error>> {
    let backend = MemoryBackend::new();
    ncarray_storage::backend_test::backend_write_read(&backend, "memory://test")?;
    ncarray_storage::backend_test::backend_create_truncates(&backend, "memory://test")?;
    assert!(backend.uris().is_empty());
    Ok(())
}
