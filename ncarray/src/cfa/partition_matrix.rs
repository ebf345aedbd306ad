use ncarray_metadata::{
    FileFormat, MetadataError, PartitionMatrixMetadata, PartitionMetadata, SubarrayMetadata,
};
use ncarray_partition::{ravel_indices, ArraySubset, PartitionPlan};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

/// The sub-array of a [`Partition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subarray {
    /// The URI of the sub-array file, [`None`] until the partition is first written.
    pub file: Option<String>,
    /// The variable name in the sub-array file.
    pub ncvar: String,
    /// The format of the sub-array file.
    pub format: FileFormat,
    /// The shape of the sub-array.
    pub shape: Vec<u64>,
}

/// A partition of a [`PartitionMatrix`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// The index in the partition matrix.
    pub index: Vec<u64>,
    /// The inclusive `[lo, hi]` bounds along each dimension of the variable.
    pub location: Vec<[u64; 2]>,
    /// The sub-array.
    pub subarray: Subarray,
}

impl Partition {
    /// The region of the variable covered by this partition.
    #[must_use]
    pub fn subset(&self) -> ArraySubset {
        ArraySubset::from(self.location.iter().map(|[lo, hi]| *lo..hi + 1))
    }
}

impl From<PartitionMetadata> for Partition {
    fn from(metadata: PartitionMetadata) -> Self {
        let SubarrayMetadata {
            ncvar,
            file,
            format,
            shape,
        } = metadata.subarray;
        Self {
            index: metadata.index,
            location: metadata.location,
            subarray: Subarray {
                file,
                ncvar,
                format,
                shape,
            },
        }
    }
}

impl From<&Partition> for PartitionMetadata {
    fn from(partition: &Partition) -> Self {
        Self {
            index: partition.index.clone(),
            location: partition.location.clone(),
            subarray: SubarrayMetadata {
                ncvar: partition.subarray.ncvar.clone(),
                file: partition.subarray.file.clone(),
                format: partition.subarray.format,
                shape: partition.subarray.shape.clone(),
            },
        }
    }
}

/// The partition matrix of a variable.
///
/// The matrix is fixed once built, except that the file of a [`Subarray`] is recorded the first time its
/// partition is written. Recording is serialised by [`PartitionMatrix::lock_materialize`].
#[derive(Debug)]
pub struct PartitionMatrix {
    pmdimensions: Vec<String>,
    pmshape: Vec<u64>,
    base: String,
    partitions: RwLock<Vec<Partition>>,
    materialize: Mutex<()>,
}

impl PartitionMatrix {
    /// Create a partition matrix from a split `plan`. No sub-array file exists yet.
    #[must_use]
    pub fn from_plan(
        pmdimensions: Vec<String>,
        plan: PartitionPlan,
        base: String,
        ncvar: &str,
        format: FileFormat,
    ) -> Self {
        let partitions = plan
            .partitions
            .into_iter()
            .map(|partition| {
                let shape = partition.shape();
                Partition {
                    index: partition.index,
                    location: partition.location,
                    subarray: Subarray {
                        file: None,
                        ncvar: ncvar.to_string(),
                        format,
                        shape,
                    },
                }
            })
            .collect();
        Self::new(pmdimensions, plan.pmshape, base, partitions)
    }

    fn new(
        pmdimensions: Vec<String>,
        pmshape: Vec<u64>,
        base: String,
        partitions: Vec<Partition>,
    ) -> Self {
        Self {
            pmdimensions,
            pmshape,
            base,
            partitions: RwLock::new(partitions),
            materialize: Mutex::new(()),
        }
    }

    /// Create a partition matrix from its wire form, validating it against the `shape` of its variable.
    ///
    /// Partitions are sorted into C order of their index.
    ///
    /// # Errors
    /// Returns a [`MetadataError`] if the partitions do not tile the variable or an index is invalid.
    pub fn from_metadata(
        metadata: PartitionMatrixMetadata,
        shape: &[u64],
    ) -> Result<Self, MetadataError> {
        metadata.validate(shape)?;
        let PartitionMatrixMetadata {
            partitions,
            pmshape,
            pmdimensions,
            base,
        } = metadata;
        let mut partitions: Vec<Partition> = partitions.into_iter().map(Partition::from).collect();
        partitions.sort_by_key(|partition| ravel_indices(&partition.index, &pmshape));
        Ok(Self::new(pmdimensions, pmshape, base, partitions))
    }

    /// The wire form of the partition matrix.
    #[must_use]
    pub fn to_metadata(&self) -> PartitionMatrixMetadata {
        PartitionMatrixMetadata {
            partitions: self
                .partitions
                .read()
                .iter()
                .map(PartitionMetadata::from)
                .collect(),
            pmshape: self.pmshape.clone(),
            pmdimensions: self.pmdimensions.clone(),
            base: self.base.clone(),
        }
    }

    /// The partition matrix dimensions.
    #[must_use]
    pub fn pmdimensions(&self) -> &[String] {
        &self.pmdimensions
    }

    /// The number of partitions along each dimension.
    #[must_use]
    pub fn pmshape(&self) -> &[u64] {
        &self.pmshape
    }

    /// The path prefix of the sub-array files.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The number of partitions.
    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.partitions.read().len()
    }

    /// The partitions, in C order of their index.
    pub fn partitions(&self) -> RwLockReadGuard<'_, Vec<Partition>> {
        self.partitions.read()
    }

    /// The flattened index of a partition `index`.
    #[must_use]
    pub fn flat_index(&self, index: &[u64]) -> u64 {
        ravel_indices(index, &self.pmshape)
    }

    /// The sub-array file of the partition at `position`.
    #[must_use]
    pub fn file(&self, position: usize) -> Option<String> {
        self.partitions
            .read()
            .get(position)
            .and_then(|partition| partition.subarray.file.clone())
    }

    /// Record the sub-array file of the partition at `position`.
    pub fn set_file(&self, position: usize, file: String) {
        if let Some(partition) = self.partitions.write().get_mut(position) {
            partition.subarray.file = Some(file);
        }
    }

    /// Lock the matrix for creating sub-array files.
    pub fn lock_materialize(&self) -> MutexGuard<'_, ()> {
        self.materialize.lock()
    }
}

impl PartialEq for PartitionMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.to_metadata() == other.to_metadata()
    }
}

impl Clone for PartitionMatrix {
    fn clone(&self) -> Self {
        Self::new(
            self.pmdimensions.clone(),
            self.pmshape.clone(),
            self.base.clone(),
            self.partitions.read().clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use ncarray_partition::plan_with_shape;

    use super::*;

    #[test]
    fn partition_matrix_metadata() {
        let plan = plan_with_shape(&[10, 4], &[4, 2]).unwrap();
        let matrix = PartitionMatrix::from_plan(
            vec!["time".into(), "lon".into()],
            plan,
            "/data/a".into(),
            "tas",
            FileFormat::Netcdf4,
        );
        assert_eq!(matrix.num_partitions(), 6);
        assert_eq!(matrix.pmshape(), &[3, 2]);
        assert_eq!(
            matrix.partitions()[5].subset(),
            ArraySubset::new_with_ranges(&[8..10, 2..4])
        );
        assert_eq!(matrix.flat_index(&[2, 1]), 5);

        matrix.set_file(3, "/data/a/a_tas_[3].nc".into());
        assert_eq!(matrix.file(3).as_deref(), Some("/data/a/a_tas_[3].nc"));
        assert_eq!(matrix.file(2), None);

        let mut metadata = matrix.to_metadata();
        metadata.partitions.reverse();
        let decoded = PartitionMatrix::from_metadata(metadata, &[10, 4]).unwrap();
        assert_eq!(decoded, matrix);
        assert!(PartitionMatrix::from_metadata(matrix.to_metadata(), &[10, 5]).is_err());
    }
}
