//! CFA partition matrix metadata support for the [`ncarray`](https://docs.rs/ncarray/latest/ncarray/index.html) crate.
//!
//! This crate defines the serialisable form of the partition matrix of a partitioned variable and its two wire encodings:
//!  - [`v0_4`]: the whole partition matrix as a single JSON attribute (`cfa_array`) on the field variable,
//!  - [`v0_5`]: a companion group of typed array attributes referenced by the field variable (`cfa_group`).
//!
//! The encoding in use is identified by the `CFA-<version>` token of the global `Conventions` attribute, see [`CfaVersion`].
//!
//! ## Licence
//! `ncarray_metadata` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.

mod attribute;
mod data_type;
mod format;
mod partition_matrix;
pub mod v0_4;
pub mod v0_5;

pub use attribute::{AttributeValue, Attributes};
pub use data_type::DataType;
pub use format::{CfaVersion, FileFormat};
pub use partition_matrix::{PartitionMatrixMetadata, PartitionMetadata, SubarrayMetadata};

/// The attribute identifying the role of a variable.
pub const CF_ROLE: &str = "cf_role";
/// The [`CF_ROLE`] of a partitioned variable.
pub const CFA_VARIABLE: &str = "cfa_variable";
/// The attribute holding the space separated partition matrix dimensions of a partitioned variable.
pub const CFA_DIMENSIONS: &str = "cfa_dimensions";
/// The v0.4 attribute holding the JSON encoded partition matrix.
pub const CFA_ARRAY: &str = "cfa_array";
/// The v0.5 attribute naming the companion group of a partitioned variable.
pub const CFA_GROUP: &str = "cfa_group";
/// The global attribute holding the conventions of a dataset.
pub const CONVENTIONS: &str = "Conventions";

/// A metadata error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MetadataError {
    /// The `Conventions` attribute names an unsupported CFA version.
    #[error("unsupported CFA version {0}")]
    UnsupportedVersion(String),
    /// A required attribute is missing.
    #[error("missing attribute {0}")]
    MissingAttribute(String),
    /// An attribute has an invalid type or value.
    #[error("invalid attribute {name}: {reason}")]
    InvalidAttribute {
        /// The attribute name.
        name: String,
        /// Why the attribute is invalid.
        reason: String,
    },
    /// The partition matrix violates an invariant.
    #[error("invalid partition matrix: {0}")]
    InvalidPartitionMatrix(String),
    /// A partition index is out of range or duplicated.
    #[error("partition index {index:?} is invalid: {reason}")]
    PartitionIndex {
        /// The partition index.
        index: Vec<u64>,
        /// Why the index is invalid.
        reason: String,
    },
    /// Invalid JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
