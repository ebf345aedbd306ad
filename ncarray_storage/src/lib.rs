//! The storage layer of the [`ncarray`](https://docs.rs/ncarray/latest/ncarray/index.html) crate.
//!
//! A storage backend is a system that can open objects by URI and perform positioned reads and writes on them.
//! This crate defines the backend and handle traits, an in-memory backend, a connection pool for remote clients,
//! a compile-time backend registry and the configuration consumed by every backend.
//!
//! Backends for other systems live in their own crates:
//!  - [`ncarray_filesystem`](https://docs.rs/ncarray_filesystem) for local files, and
//!  - [`ncarray_object_store`](https://docs.rs/ncarray_object_store) for object stores such as S3.
//!
//! ## Licence
//! `ncarray_storage` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod byte_range;
pub mod config;
pub mod connection_pool;
pub mod registry;
pub mod storage_adapter;
mod storage_backend;
pub mod store;

#[cfg(feature = "tests")]
/// Backend test utilities (for external backend development).
pub mod backend_test;

use std::sync::Arc;

use thiserror::Error;

use byte_range::InvalidByteRangeError;

pub use self::config::{Config, ConfigError};
pub use self::storage_backend::{StorageBackendTraits, StorageHandle, StorageHandleTraits};

/// [`Arc`] wrapped storage backend.
pub type StorageBackend = Arc<dyn StorageBackendTraits>;

/// The type for bytes used in storage reads.
///
/// An alias for [`bytes::Bytes`].
pub type Bytes = bytes::Bytes;

/// The mode an object is opened with.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub enum OpenMode {
    /// Open an existing object for reading.
    #[display("read")]
    Read,
    /// Create a new object, replacing any existing object.
    #[display("create")]
    Create,
    /// Open an existing object for reading and writing.
    #[display("update")]
    Update,
}

impl OpenMode {
    /// Returns true if the mode permits writes.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

/// A storage error.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The object does not exist.
    #[error("object {0} not found")]
    NotFound(String),
    /// A write operation was attempted on a handle opened for reading.
    #[error("a write operation was attempted on {0}, which is open for reading")]
    ReadOnly(String),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] Arc<std::io::Error>),
    /// An invalid byte range.
    #[error("invalid byte range {0}")]
    InvalidByteRangeError(#[from] InvalidByteRangeError),
    /// A seek to a negative position.
    #[error("invalid seek to position {0}")]
    InvalidSeek(i128),
    /// A connect or read call exceeded its timeout.
    #[error("{operation} on {uri} timed out after {seconds}s")]
    Timeout {
        /// The URI being accessed.
        uri: String,
        /// The operation which timed out.
        operation: &'static str,
        /// The configured timeout.
        seconds: f64,
    },
    /// The endpoint could not be reached or refused the credentials.
    #[error("connection to {uri} failed: {reason}")]
    ConnectionError {
        /// The endpoint URI.
        uri: String,
        /// The underlying failure.
        reason: String,
    },
    /// A multipart transfer failed and was aborted.
    #[error("multipart transfer of {uri} failed at part {part}: {reason}")]
    MultipartTransferFailure {
        /// The object URI.
        uri: String,
        /// The index of the failing part.
        part: usize,
        /// The underlying failure.
        reason: String,
    },
    /// An invalid URI.
    #[error("invalid uri {0}")]
    InvalidUri(String),
    /// A configuration error.
    #[error(transparent)]
    ConfigError(#[from] Arc<ConfigError>),
    /// The requested method is not supported.
    #[error("{0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(Arc::new(err))
    }
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

/// Split a URI into its scheme and the remainder.
///
/// A URI without a scheme is a local path and has the scheme `file`.
#[must_use]
pub fn uri_scheme(uri: &str) -> &str {
    match uri.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => scheme,
        _ => "file",
    }
}
