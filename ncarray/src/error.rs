use ncarray_metadata::{DataType, MetadataError};
use ncarray_partition::{ArraySubsetError, SplitError};
use ncarray_storage::{ConfigError, StorageError};
use thiserror::Error;

use crate::array_file::ArrayFileError;

/// A dataset error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CfaError {
    /// The configuration is invalid or incomplete.
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    /// A remote endpoint could not be reached or refused the credentials.
    #[error("connection to {uri} failed: {reason}")]
    ConnectionError {
        /// The endpoint URI.
        uri: String,
        /// The underlying failure.
        reason: String,
    },
    /// The file is not a partitioned dataset.
    #[error("{0} is not a CFA file")]
    NotACFAFile(String),
    /// The partition matrix encoding is unknown or unsupported.
    #[error("unsupported CFA version: {0}")]
    UnsupportedCFAVersion(String),
    /// A partition index is invalid.
    #[error("invalid partition index {index:?} of variable {variable}: {reason}")]
    PartitionIndexError {
        /// The variable.
        variable: String,
        /// The partition index.
        index: Vec<u64>,
        /// Why the index is invalid.
        reason: String,
    },
    /// A partition overlapping a read has no sub-array.
    #[error("sub-array {uri} of partition {index:?} of variable {variable} is missing")]
    SubarrayMissing {
        /// The sub-array URI. For a partition never written, the URI its first write would create.
        uri: String,
        /// The variable.
        variable: String,
        /// The partition index.
        index: Vec<u64>,
    },
    /// A variable cannot be split under the size budget.
    #[error("cannot split variable {variable} of shape {shape:?} into sub-arrays of at most {max_elements} elements")]
    SplitConstraintUnsatisfiable {
        /// The variable.
        variable: String,
        /// The variable shape.
        shape: Vec<u64>,
        /// The element budget.
        max_elements: u64,
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
    /// A request has a step other than 1.
    #[error("strided slicing is unsupported: step {step} along dimension {dimension} of variable {variable}")]
    StridedSliceUnsupported {
        /// The variable.
        variable: String,
        /// The dimension index.
        dimension: usize,
        /// The requested step.
        step: u64,
    },
    /// A request exceeds the bounds of a variable.
    #[error("request {request} is out of bounds of variable {variable} with shape {shape:?}")]
    OutOfBounds {
        /// The variable.
        variable: String,
        /// The request.
        request: String,
        /// The variable shape.
        shape: Vec<u64>,
    },
    /// An operation is incompatible with the dataset format.
    #[error("incompatible format: {0}")]
    IncompatibleFormat(String),
    /// An element type does not match the variable data type.
    #[error("incompatible element type {got} for variable {variable} with data type {expected}")]
    IncompatibleElementType {
        /// The variable.
        variable: String,
        /// The variable data type.
        expected: DataType,
        /// The element data type.
        got: DataType,
    },
    /// A named group, dimension or variable does not exist.
    #[error("{kind} {name} does not exist")]
    NotFound {
        /// `group`, `dimension` or `variable`.
        kind: &'static str,
        /// The name.
        name: String,
    },
    /// A named group, dimension or variable already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// `group`, `dimension` or `variable`.
        kind: &'static str,
        /// The name.
        name: String,
    },
    /// The dataset is not writable.
    #[error("dataset {0} is open for reading")]
    ReadOnly(String),
    /// An invalid argument.
    #[error("{0}")]
    InvalidArgument(String),
    /// A storage error.
    #[error(transparent)]
    Storage(StorageError),
    /// An array file error.
    #[error(transparent)]
    ArrayFile(ArrayFileError),
    /// A metadata error.
    #[error(transparent)]
    Metadata(MetadataError),
    /// A partition planning error.
    #[error(transparent)]
    Split(SplitError),
    /// An array subset error.
    #[error(transparent)]
    ArraySubset(#[from] ArraySubsetError),
    /// A JSON error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<StorageError> for CfaError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionError { uri, reason } => Self::ConnectionError { uri, reason },
            StorageError::MultipartTransferFailure { uri, part, reason } => {
                Self::MultipartTransferFailure { uri, part, reason }
            }
            StorageError::ConfigError(err) => match std::sync::Arc::try_unwrap(err) {
                Ok(err) => Self::ConfigError(err),
                Err(err) => Self::Storage(StorageError::ConfigError(err)),
            },
            err => Self::Storage(err),
        }
    }
}

impl From<ArrayFileError> for CfaError {
    fn from(err: ArrayFileError) -> Self {
        match err {
            ArrayFileError::Storage(err) => err.into(),
            err => Self::ArrayFile(err),
        }
    }
}

impl From<MetadataError> for CfaError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UnsupportedVersion(version) => Self::UnsupportedCFAVersion(version),
            err => Self::Metadata(err),
        }
    }
}

impl From<SplitError> for CfaError {
    fn from(err: SplitError) -> Self {
        Self::Split(err)
    }
}
