use std::error::Error;
use std::io::SeekFrom;

use crate::{OpenMode, StorageBackendTraits, StorageError};

/// Create, write, reopen and read an object under `prefix`.
///
/// `prefix` is a URI prefix understood by `backend`, e.g. a directory path or `s3://alias/bucket`.
///
/// # Errors
/// Returns an error if any backend operation fails or returns unexpected data.
pub fn backend_write_read<T: StorageBackendTraits>(
    backend: &T,
    prefix: &str,
) -> Result<(), Box<dyn Error>> {
    let uri = format!("{prefix}/group/a.nc");
    backend.remove(&uri)?;
    assert!(!backend.exists(&uri)?);
    assert!(matches!(
        backend.open(&uri, OpenMode::Read),
        Err(StorageError::NotFound(_))
    ));

    let mut handle = backend.open(&uri, OpenMode::Create)?;
    handle.write(&[0, 1, 2, 3])?;
    handle.seek(SeekFrom::Start(8))?;
    handle.write(&[8, 9])?;
    assert_eq!(handle.tell(), 10);
    assert_eq!(handle.size()?, 10);
    handle.close()?;
    assert_eq!(backend.size(&uri)?, Some(10));

    let mut handle = backend.open(&uri, OpenMode::Update)?;
    handle.write_at(4, &[4, 5, 6, 7])?;
    handle.close()?;

    let mut handle = backend.open(&uri, OpenMode::Read)?;
    assert_eq!(handle.read_to_end()?.as_ref(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert_eq!(handle.read_at(2, 3)?.as_ref(), &[2, 3, 4]);
    handle.seek(SeekFrom::End(-2))?;
    assert_eq!(handle.read(8)?.as_ref(), &[8, 9]);
    assert!(handle.read_at(8, 4).is_err());
    assert!(matches!(
        handle.write_at(0, &[1]),
        Err(StorageError::ReadOnly(_))
    ));
    handle.close()?;

    backend.remove(&uri)?;
    assert!(!backend.exists(&uri)?);
    Ok(())
}

/// Check that [`OpenMode::Create`] replaces an existing object.
///
/// # Errors
/// Returns an error if any backend operation fails or returns unexpected data.
pub fn backend_create_truncates<T: StorageBackendTraits>(
    backend: &T,
    prefix: &str,
) -> Result<(), Box<dyn Error>> {
    let uri = format!("{prefix}/b.nc");
    let mut handle = backend.open(&uri, OpenMode::Create)?;
    handle.write(&[1; 16])?;
    handle.close()?;
    let mut handle = backend.open(&uri, OpenMode::Create)?;
    handle.write(&[2; 4])?;
    handle.close()?;
    let mut handle = backend.open(&uri, OpenMode::Read)?;
    assert_eq!(handle.read_to_end()?.as_ref(), &[2; 4]);
    handle.close()?;
    backend.remove(&uri)?;
    Ok(())
}
