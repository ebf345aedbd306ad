//! The storage context shared by datasets.

use std::{collections::HashMap, sync::Arc};

use ncarray_storage::{
    registry::create_backend, uri_scheme, Config, OpenMode, StorageBackend, StorageBackendTraits,
    StorageError, StorageHandle,
};
use parking_lot::Mutex;

use crate::{
    array_file::{ArrayFileBackendRef, NcaFileBackend},
    cache::{CacheManager, CachePolicy},
    CfaError,
};

/// The storage context: the configuration, the storage backends, the cache manager and the array file backend.
///
/// A backend is created from the registry the first time a URI of its kind and host is opened, and is reused
/// afterwards. Datasets on `memory://` URIs therefore persist for the life of the context.
#[derive(Debug)]
pub struct StorageContext {
    config: Config,
    backends: Mutex<HashMap<String, StorageBackend>>,
    cache: CacheManager,
    array_file_backend: ArrayFileBackendRef,
}

/// The key a backend is shared by: the scheme of local kinds, else the scheme and host.
fn backend_key(uri: &str) -> String {
    let scheme = uri_scheme(uri);
    if scheme == "file" || scheme == "memory" {
        return scheme.to_string();
    }
    url::Url::parse(uri)
        .ok()
        .and_then(|url| url.host_str().map(|host| format!("{scheme}://{host}")))
        .unwrap_or_else(|| scheme.to_string())
}

impl StorageContext {
    /// Create a storage context.
    ///
    /// # Errors
    /// Returns [`CfaError::ConfigError`] if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self, CfaError> {
        config.validate()?;
        Ok(Self {
            cache: CacheManager::new(&config),
            config,
            backends: Mutex::default(),
            array_file_backend: Arc::new(NcaFileBackend::new()),
        })
    }

    /// Set the array file backend.
    #[must_use]
    pub fn with_array_file_backend(mut self, array_file_backend: ArrayFileBackendRef) -> Self {
        self.array_file_backend = array_file_backend;
        self
    }

    /// Set the cache policy.
    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache = self.cache.with_policy(policy);
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cache manager.
    #[must_use]
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// The array file backend.
    #[must_use]
    pub fn array_file_backend(&self) -> &ArrayFileBackendRef {
        &self.array_file_backend
    }

    /// Use `backend` for URIs of the kind and host of `uri`.
    pub fn insert_backend(&self, uri: &str, backend: StorageBackend) {
        self.backends.lock().insert(backend_key(uri), backend);
    }

    /// Return the backend of `uri`, creating it from the registry if needed.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if no backend is registered for the kind of `uri` or the configuration is incomplete.
    pub fn backend(&self, uri: &str) -> Result<StorageBackend, CfaError> {
        let key = backend_key(uri);
        let mut backends = self.backends.lock();
        if let Some(backend) = backends.get(&key) {
            return Ok(backend.clone());
        }
        let backend = create_backend(uri, &self.config)?;
        backends.insert(key, backend.clone());
        Ok(backend)
    }

    /// Open `uri` with `mode`. Objects opened for reading go through the cache manager.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the backend cannot be created or the object cannot be opened.
    pub fn open(&self, uri: &str, mode: OpenMode) -> Result<StorageHandle, CfaError> {
        let backend = self.backend(uri)?;
        let handle = if mode == OpenMode::Read {
            self.cache.open_read(&backend, uri)?
        } else {
            backend.open(uri, mode)?
        };
        Ok(handle)
    }

    /// Returns true if `uri` exists.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the backend cannot be created or queried.
    pub fn exists(&self, uri: &str) -> Result<bool, CfaError> {
        Ok(self.backend(uri)?.exists(uri)?)
    }

    /// Forget any cached copy of `uri` after it has been written.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if a cache file cannot be removed.
    pub fn invalidate(&self, uri: &str) -> Result<(), CfaError> {
        self.cache.invalidate(uri).map_err(CfaError::from)
    }
}

/// Map a [`StorageError::NotFound`] to `not_found`, and convert any other error.
pub(crate) fn map_not_found(err: CfaError, not_found: impl FnOnce() -> CfaError) -> CfaError {
    match err {
        CfaError::Storage(StorageError::NotFound(_)) => not_found(),
        err => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_context_backends() {
        assert_eq!(backend_key("/tmp/a.nca"), "file");
        assert_eq!(backend_key("memory://a/b.nca"), "memory");
        assert_eq!(backend_key("s3://minio/bucket/a.nca"), "s3://minio");

        let context = StorageContext::new(Config::default()).unwrap();
        let memory = context.backend("memory://a.nca").unwrap();
        assert!(Arc::ptr_eq(&memory, &context.backend("memory://b/c.nca").unwrap()));
        assert_eq!(memory.kind(), "memory");
        assert!(matches!(
            context.backend("ftp://host/a.nca"),
            Err(CfaError::Storage(StorageError::Unsupported(_)))
        ));
        assert!(!context.exists("memory://a.nca").unwrap());
    }
}
