use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{FileFormat, MetadataError};

/// The partition matrix of a partitioned variable.
///
/// This is also the JSON form of the v0.4 `cfa_array` attribute, for example:
/// ```json
/// {
///     "Partitions": [
///         {
///             "index": [0, 0],
///             "location": [[0, 3], [0, 9]],
///             "subarray": { "ncvar": "tas", "file": "/data/a/a_tas_[0].nc", "format": "NETCDF4", "shape": [4, 10] }
///         }
///     ],
///     "pmshape": [1, 1],
///     "pmdimensions": ["time", "lon"],
///     "base": "/data/a"
/// }
/// ```
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PartitionMatrixMetadata {
    /// The partitions.
    #[serde(rename = "Partitions")]
    pub partitions: Vec<PartitionMetadata>,
    /// The number of partitions along each partition matrix dimension.
    pub pmshape: Vec<u64>,
    /// The dimensions of the partition matrix.
    pub pmdimensions: Vec<String>,
    /// The path prefix of the sub-array files.
    pub base: String,
}

/// A partition of a [`PartitionMatrixMetadata`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PartitionMetadata {
    /// The index of the partition in the partition matrix.
    pub index: Vec<u64>,
    /// The inclusive `[lo, hi]` bounds of the partition along each dimension.
    pub location: Vec<[u64; 2]>,
    /// The sub-array holding the partition data.
    pub subarray: SubarrayMetadata,
}

/// The sub-array of a [`PartitionMetadata`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct SubarrayMetadata {
    /// The variable name in the sub-array file.
    pub ncvar: String,
    /// The URI of the sub-array file, absent if the partition has not been written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// The format of the sub-array file.
    pub format: FileFormat,
    /// The shape of the sub-array.
    pub shape: Vec<u64>,
}

impl PartitionMatrixMetadata {
    /// The number of partition matrix dimensions.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.pmshape.len()
    }

    /// Validate the partition matrix against the `shape` of its variable.
    ///
    /// # Errors
    /// Returns [`MetadataError::InvalidPartitionMatrix`] if the dimensionality is inconsistent or the partitions do not
    /// tile the variable, or [`MetadataError::PartitionIndex`] if a partition index is out of range or duplicated.
    pub fn validate(&self, shape: &[u64]) -> Result<(), MetadataError> {
        let ndim = self.pmshape.len();
        if self.pmdimensions.len() != ndim || shape.len() != ndim {
            return Err(MetadataError::InvalidPartitionMatrix(format!(
                "pmshape {:?}, pmdimensions {:?} and shape {shape:?} have different lengths",
                self.pmshape, self.pmdimensions
            )));
        }
        let expected: u64 = self.pmshape.iter().product();
        if self.partitions.len() as u64 != expected {
            return Err(MetadataError::InvalidPartitionMatrix(format!(
                "expected {expected} partitions for pmshape {:?}, found {}",
                self.pmshape,
                self.partitions.len()
            )));
        }

        // (dimension, index) -> location
        let mut bounds = BTreeMap::<(usize, u64), [u64; 2]>::new();
        let mut indices = HashSet::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            let index_error = |reason: String| MetadataError::PartitionIndex {
                index: partition.index.clone(),
                reason,
            };
            if partition.index.len() != ndim
                || partition.location.len() != ndim
                || partition.subarray.shape.len() != ndim
            {
                return Err(index_error(format!(
                    "index, location and shape must have {ndim} dimensions"
                )));
            }
            if !indices.insert(partition.index.as_slice()) {
                return Err(index_error("duplicate index".to_string()));
            }
            for (dim, ((&index, &[lo, hi]), &sub)) in partition
                .index
                .iter()
                .zip(&partition.location)
                .zip(&partition.subarray.shape)
                .enumerate()
            {
                if index >= self.pmshape[dim] {
                    return Err(index_error(format!(
                        "index {index} exceeds pmshape {}",
                        self.pmshape[dim]
                    )));
                }
                if hi < lo || hi - lo + 1 != sub {
                    return Err(index_error(format!(
                        "location [{lo}, {hi}] is inconsistent with shape {sub}"
                    )));
                }
                if let Some(existing) = bounds.insert((dim, index), [lo, hi]) {
                    if existing != [lo, hi] {
                        return Err(index_error(format!(
                            "location [{lo}, {hi}] differs from [{}, {}] along dimension {dim}",
                            existing[0], existing[1]
                        )));
                    }
                }
            }
        }

        // Locations must tile each dimension
        for (dim, &length) in shape.iter().enumerate() {
            let mut next = 0;
            for (_, [lo, hi]) in bounds.range((dim, 0)..=(dim, u64::MAX)) {
                if *lo != next {
                    return Err(MetadataError::InvalidPartitionMatrix(format!(
                        "partitions along dimension {dim} do not tile: expected a partition starting at {next}, found {lo}"
                    )));
                }
                next = hi + 1;
            }
            if next != length {
                return Err(MetadataError::InvalidPartitionMatrix(format!(
                    "partitions along dimension {dim} cover [0, {next}), expected [0, {length})"
                )));
            }
        }
        Ok(())
    }
}
