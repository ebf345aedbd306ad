//! The compile-time backend registry.
//!
//! Backend crates register a [`BackendPlugin`] with [`inventory::submit!`], mapping a backend kind tag to a factory
//! function. [`create_backend`] resolves the kind for a URI and calls the matching factory:
//!  - if the URI host names a configured endpoint, the endpoint's `backend` kind is used,
//!  - otherwise the URI scheme is the kind (a URI without a scheme is a local `file`).
//!
//! ```rust,ignore
//! inventory::submit! {
//!     BackendPlugin::new(is_kind_file, create_filesystem_backend)
//! }
//! ```

use std::sync::Arc;

use crate::{config::Config, store::MemoryBackend, uri_scheme, StorageBackend, StorageError};

/// A backend plugin.
pub struct BackendPlugin {
    /// Tests if the kind is a match for this plugin.
    match_kind_fn: fn(kind: &str) -> bool,
    /// Create a backend for a URI.
    create_fn: fn(uri: &str, config: &Config) -> Result<StorageBackend, StorageError>,
}

inventory::collect!(BackendPlugin);

impl BackendPlugin {
    /// Create a new plugin for registration.
    pub const fn new(
        match_kind_fn: fn(kind: &str) -> bool,
        create_fn: fn(uri: &str, config: &Config) -> Result<StorageBackend, StorageError>,
    ) -> Self {
        Self {
            match_kind_fn,
            create_fn,
        }
    }

    /// Returns true if this plugin is associated with `kind`.
    #[must_use]
    pub fn match_kind(&self, kind: &str) -> bool {
        (self.match_kind_fn)(kind)
    }

    /// Create a backend for `uri`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the backend cannot be created, such as if the configuration is incomplete.
    pub fn create(&self, uri: &str, config: &Config) -> Result<StorageBackend, StorageError> {
        (self.create_fn)(uri, config)
    }
}

inventory::submit! {
    BackendPlugin::new(is_kind_memory, create_memory_backend)
}

fn is_kind_memory(kind: &str) -> bool {
    kind == "memory"
}

fn create_memory_backend(_uri: &str, _config: &Config) -> Result<StorageBackend, StorageError> {
    Ok(Arc::new(MemoryBackend::new()))
}

/// Resolve the backend kind of `uri`.
#[must_use]
pub fn backend_kind(uri: &str, config: &Config) -> String {
    let scheme = uri_scheme(uri);
    if scheme == "file" || scheme == "memory" {
        return scheme.to_string();
    }
    config
        .endpoint_for(uri)
        .map_or_else(|| scheme.to_string(), |(_, endpoint)| endpoint.backend.clone())
}

/// Create the backend for `uri` from the registered plugins.
///
/// # Errors
/// Returns [`StorageError::Unsupported`] if no plugin is registered for the backend kind,
/// or the error of the plugin factory.
pub fn create_backend(uri: &str, config: &Config) -> Result<StorageBackend, StorageError> {
    let kind = backend_kind(uri, config);
    for plugin in inventory::iter::<BackendPlugin> {
        if plugin.match_kind(&kind) {
            log::debug!("creating {kind} backend for {uri}");
            return plugin.create(uri, config);
        }
    }
    Err(StorageError::Unsupported(format!(
        "no storage backend is registered for kind {kind} (uri {uri})"
    )))
}
