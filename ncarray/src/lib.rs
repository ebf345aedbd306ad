//! `ncarray` is a Rust library for partitioned multidimensional arrays stored under the CFA conventions.
//!
//! A dataset is a master file of groups, dimensions, attributes and variables.
//! Large variables are partitioned: their data is split into a matrix of sub-array files, and the master file records
//! the partition matrix (the location, shape and file of every sub-array) with version 0.4 or 0.5 of the CFA conventions.
//! Reads and writes of a region of a partitioned variable touch only the overlapping sub-arrays, concurrently.
//!
//! Master files and sub-arrays live on any storage backend registered with [`storage::registry`]:
//!  - `file://` URIs and plain paths via [`filesystem`],
//!  - `memory://` URIs via [`storage::store::MemoryBackend`],
//!  - `s3://` and `http(s)://` URIs via [`object_store`] (with the `object_store` feature, enabled by default).
//!
//! Objects read from remote backends are staged in memory or on local disk by the [`cache::CacheManager`] according to
//! the [`storage::Config`] of the [`StorageContext`].
//!
//! ## Logging
//! `ncarray` logs information and warnings using the [`log`] crate.
//! A logging implementation must be enabled to capture logs.
//!
//! ## Example
//! ```rust
//! # use std::sync::Arc;
//! use ncarray::{Dataset, DimSlice, StorageContext, VariableOptions};
//! use ncarray::metadata::{DataType, FileFormat};
//! use ncarray::storage::{Config, OpenMode};
//!
//! let context = Arc::new(StorageContext::new(Config::default())?);
//! let mut dataset = Dataset::create(&context, "memory://data/pr.nca", FileFormat::Cfa4)?;
//! dataset.create_dimension("", "time", Some(6))?;
//! dataset.create_dimension("", "lat", Some(2))?;
//! dataset.create_dimension("", "lon", Some(2))?;
//! dataset.create_variable(
//!     "",
//!     "pr",
//!     DataType::Float64,
//!     &["time", "lat", "lon"],
//!     VariableOptions::new().with_max_object_size(4 * 8),
//! )?;
//! let values: Vec<f64> = (0..24).map(f64::from).collect();
//! dataset.write("pr", &[(0..6).into(), (0..2).into(), (0..2).into()], &values)?;
//! println!("{}", dataset.info());
//! dataset.close()?;
//!
//! let dataset = Dataset::open(&context, "memory://data/pr.nca", OpenMode::Read)?;
//! let slice = dataset.read::<f64>("pr", &[DimSlice::new(5, 6, 1), (0..2).into(), (1..2).into()])?;
//! assert_eq!(slice, vec![21.0, 23.0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod array_file;
pub mod cache;
pub mod cfa;
pub mod codec;
pub mod context;
pub mod dataset;
pub mod element;
mod error;
pub mod resolver;

pub use context::StorageContext;
pub use dataset::{Dataset, VariableOptions};
pub use element::Element;
pub use error::CfaError;
pub use resolver::DimSlice;

pub use ncarray_filesystem as filesystem;
pub use ncarray_metadata as metadata;
#[cfg(feature = "object_store")]
pub use ncarray_object_store as object_store;
pub use ncarray_partition as partition;
pub use ncarray_storage as storage;
