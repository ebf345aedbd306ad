//! The cache manager of remote objects opened for reading.
//!
//! Local objects are read in place. A remote object is fetched whole, either into memory or into a file under the
//! cache location at `<cache_location>/<scheme>/<host>/<path>`, depending on its size and the available memory.
//! A cache file is reused only while the version recorded beside it at `<path>.version` matches the version the
//! backend reports for the object. Objects of backends which do not report versions are fetched on every open.
//! Cache files are not evicted.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use ncarray_filesystem::FilesystemBackend;
use ncarray_storage::{
    store::BytesHandle, uri_scheme, Config, OpenMode, StorageBackend, StorageBackendTraits,
    StorageError, StorageHandle,
};
use parking_lot::Mutex;
use sysinfo::System;

/// Where a remote object opened for reading is held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, derive_more::Display)]
pub enum CachePolicy {
    /// Hold an object in memory if it fits in the available memory and the memory size threshold, else on disk.
    #[default]
    #[display("auto")]
    Auto,
    /// Always hold objects in memory.
    #[display("memory")]
    Memory,
    /// Always hold objects on disk.
    #[display("disk")]
    Disk,
}

/// Decide where to hold an object of `size` bytes.
///
/// Returns [`CachePolicy::Memory`] or [`CachePolicy::Disk`].
#[must_use]
pub fn decide(
    size: u64,
    available_memory: u64,
    max_object_size_for_memory: u64,
    policy: CachePolicy,
) -> CachePolicy {
    match policy {
        CachePolicy::Auto => {
            if size <= available_memory && size <= max_object_size_for_memory {
                CachePolicy::Memory
            } else {
                CachePolicy::Disk
            }
        }
        policy => policy,
    }
}

/// The cache manager.
#[derive(Debug)]
pub struct CacheManager {
    config: Config,
    memory_limit: Option<u64>,
    policy: CachePolicy,
    system: Mutex<System>,
    filesystem: FilesystemBackend,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl CacheManager {
    /// Create a cache manager from the configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            memory_limit: config
                .resource_allocation
                .as_ref()
                .and_then(|resources| resources.memory)
                .map(|memory| memory.0),
            policy: CachePolicy::Auto,
            system: Mutex::new(System::new()),
            filesystem: FilesystemBackend::new(),
            locks: Mutex::default(),
        }
    }

    /// Set the cache policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The cache policy.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// The memory available for objects, the lesser of the free system memory and the configured allocation.
    #[must_use]
    pub fn available_memory(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let available = system.available_memory();
        drop(system);
        self.memory_limit
            .map_or(available, |limit| std::cmp::min(limit, available))
    }

    /// The path of the cache file of `uri`.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidUri`] if `uri` is not a valid URI.
    pub fn cache_path(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let url = url::Url::parse(uri).map_err(|_| StorageError::InvalidUri(uri.to_string()))?;
        let mut path = self.config.cache_location.join(url.scheme());
        if let Some(host) = url.host_str() {
            path.push(host);
        }
        for segment in url.path_segments().into_iter().flatten() {
            if !segment.is_empty() && segment != "." && segment != ".." {
                path.push(segment);
            }
        }
        Ok(path)
    }

    /// Open `uri` of `backend` for reading.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the object does not exist, or another [`StorageError`] if the
    /// transfer fails.
    pub fn open_read(
        &self,
        backend: &StorageBackend,
        uri: &str,
    ) -> Result<StorageHandle, StorageError> {
        if backend.is_local() {
            return backend.open(uri, OpenMode::Read);
        }
        let size = backend
            .size(uri)?
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))?;
        let decision = decide(
            size,
            self.available_memory(),
            self.config.max_object_size_for_memory.0,
            self.policy,
        );
        log::debug!("caching {uri} ({size} bytes) in {decision}");
        if decision == CachePolicy::Memory {
            let mut handle = backend.open(uri, OpenMode::Read)?;
            let bytes = handle.read_at(0, size)?;
            handle.close()?;
            Ok(BytesHandle::new_handle(uri, bytes))
        } else {
            let path = self.fetch_to_disk(backend, uri, size)?;
            self.filesystem
                .open(&path.to_string_lossy(), OpenMode::Read)
        }
    }

    fn path_lock(&self, path: &PathBuf) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(path.clone())
            .or_default()
            .clone()
    }

    fn cached_version(&self, version_path: &str) -> Result<Option<String>, StorageError> {
        if !self.filesystem.exists(version_path)? {
            return Ok(None);
        }
        let mut handle = self.filesystem.open(version_path, OpenMode::Read)?;
        let bytes = handle.read_to_end()?;
        handle.close()?;
        Ok(String::from_utf8(bytes.to_vec()).ok())
    }

    fn fetch_to_disk(
        &self,
        backend: &StorageBackend,
        uri: &str,
        size: u64,
    ) -> Result<PathBuf, StorageError> {
        let path = self.cache_path(uri)?;
        let path_str = path.to_string_lossy().to_string();
        let version_path = version_path(&path_str);
        let lock = self.path_lock(&path);
        let _lock = lock.lock();
        let version = backend.version(uri)?;
        if version.is_some()
            && self.filesystem.size(&path_str)? == Some(size)
            && self.cached_version(&version_path)? == version
        {
            log::debug!("reusing cached {uri} at {path_str}");
            return Ok(path);
        }
        self.filesystem.remove(&version_path)?;

        let options = self.config.backend_options(backend.kind());
        let block = std::cmp::max(options.part_size.0 * options.max_parts as u64, 1);
        let mut source = backend.open(uri, OpenMode::Read)?;
        let mut target = self.filesystem.open(&path_str, OpenMode::Create)?;
        let mut offset = 0;
        while offset < size {
            let length = std::cmp::min(block, size - offset);
            target.write(&source.read_at(offset, length)?)?;
            offset += length;
        }
        source.close()?;
        target.close()?;
        if let Some(version) = version {
            let mut handle = self.filesystem.open(&version_path, OpenMode::Create)?;
            handle.write(version.as_bytes())?;
            handle.close()?;
        }
        log::debug!("cached {uri} at {path_str}");
        Ok(path)
    }

    /// Remove any disk cache file of `uri`, after the object has been written.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the cache file cannot be removed.
    pub fn invalidate(&self, uri: &str) -> Result<(), StorageError> {
        if uri_scheme(uri) == "file" || uri_scheme(uri) == "memory" {
            return Ok(());
        }
        let path = self.cache_path(uri)?;
        let lock = self.path_lock(&path);
        let _lock = lock.lock();
        let path_str = path.to_string_lossy();
        self.filesystem.remove(&version_path(&path_str))?;
        self.filesystem.remove(&path_str)
    }
}

fn version_path(path: &str) -> String {
    format!("{path}.version")
}
