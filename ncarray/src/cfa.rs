//! The CFA data model.
//!
//! A [`Dataset`](crate::Dataset) owns a tree of [`Group`]s holding [`Dimension`]s and [`Variable`]s.
//! A partitioned variable carries a [`PartitionMatrix`] describing how its data is split into sub-array files.

mod group;
mod partition_matrix;
mod variable;

pub use group::{Dimension, Group};
pub use partition_matrix::{Partition, PartitionMatrix, Subarray};
pub use variable::Variable;

/// Split a master file URI into its base path, the URI without its extension, and its stem.
///
/// ```
/// # use ncarray::cfa::master_base;
/// assert_eq!(master_base("s3://minio/bucket/data/tas.nca"), ("s3://minio/bucket/data/tas".to_string(), "tas".to_string()));
/// assert_eq!(master_base("tas.nca"), ("tas".to_string(), "tas".to_string()));
/// ```
#[must_use]
pub fn master_base(uri: &str) -> (String, String) {
    let (prefix, file) = uri.rsplit_once('/').unwrap_or(("", uri));
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    let base = if prefix.is_empty() {
        stem.to_string()
    } else {
        format!("{prefix}/{stem}")
    };
    (base, stem.to_string())
}

/// The URI of the sub-array file of the partition with flattened index `flat_index` of `variable`.
#[must_use]
pub fn subarray_uri(base: &str, stem: &str, variable: &str, flat_index: u64) -> String {
    format!("{base}/{stem}_{variable}_[{flat_index}].nc")
}
