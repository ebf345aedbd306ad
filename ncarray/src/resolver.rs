//! The partition resolver translates reads and writes of a region of a partitioned variable into reads and
//! writes of the overlapping regions of its sub-arrays.
//!
//! For each partition intersecting the requested region:
//!  1. the overlap is computed in the coordinates of the variable,
//!  2. it is translated into the coordinates of the sub-array (minus the partition start) and of the request
//!     (minus the request start),
//!  3. the sub-array region is read or written, and copied from or into the request buffer.
//!
//! Partitions are processed in parallel with a concurrency limit. Partitions are disjoint, so each writes a
//! disjoint part of the request buffer and the result does not depend on completion order.

use std::ops::Range;

use ncarray_partition::ArraySubset;
use ncarray_storage::OpenMode;
use rayon::prelude::*;
use rayon_iter_concurrent_limit::iter_concurrent_limit;
use unsafe_cell_slice::UnsafeCellSlice;

use crate::{
    array_file::{FileSchema, VariableSchema},
    cfa::{subarray_uri, Partition, PartitionMatrix, Variable},
    context::{map_not_found, StorageContext},
    CfaError,
};

/// A range along one dimension of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DimSlice {
    /// The first index.
    pub start: u64,
    /// One past the last index.
    pub stop: u64,
    /// The step. Only 1 is supported.
    pub step: u64,
}

impl DimSlice {
    /// Create a new slice.
    #[must_use]
    pub const fn new(start: u64, stop: u64, step: u64) -> Self {
        Self { start, stop, step }
    }
}

impl From<Range<u64>> for DimSlice {
    fn from(range: Range<u64>) -> Self {
        Self::new(range.start, range.end, 1)
    }
}

/// Convert a request into the region of a variable `name` of `shape`.
///
/// # Errors
/// Returns [`CfaError::StridedSliceUnsupported`] if a step is not 1, or [`CfaError::OutOfBounds`] if the request
/// has the wrong dimensionality or exceeds the shape.
pub fn request_subset(
    name: &str,
    shape: &[u64],
    request: &[DimSlice],
) -> Result<ArraySubset, CfaError> {
    let out_of_bounds = || CfaError::OutOfBounds {
        variable: name.to_string(),
        request: format!("{request:?}"),
        shape: shape.to_vec(),
    };
    if request.len() != shape.len() {
        return Err(out_of_bounds());
    }
    for (dimension, (slice, length)) in std::iter::zip(request, shape).enumerate() {
        if slice.step != 1 {
            return Err(CfaError::StridedSliceUnsupported {
                variable: name.to_string(),
                dimension,
                step: slice.step,
            });
        }
        if slice.start > slice.stop || slice.stop > *length {
            return Err(out_of_bounds());
        }
    }
    Ok(ArraySubset::from(
        request.iter().map(|slice| slice.start..slice.stop),
    ))
}

/// The partition resolver.
#[derive(Debug, Clone, Copy)]
pub struct PartitionResolver<'a> {
    context: &'a StorageContext,
    concurrency: usize,
}

/// An overlap of a request with a partition.
struct Overlap {
    position: usize,
    partition: Partition,
    /// The overlap in the coordinates of the sub-array.
    source: ArraySubset,
    /// The overlap in the coordinates of the request.
    target: ArraySubset,
}

fn overlaps(matrix: &PartitionMatrix, subset: &ArraySubset) -> Result<Vec<Overlap>, CfaError> {
    let partitions = matrix.partitions();
    let mut overlaps = Vec::new();
    for (position, partition) in partitions.iter().enumerate() {
        let partition_subset = partition.subset();
        if !partition_subset.intersects(subset) {
            continue;
        }
        let overlap = partition_subset.overlap(subset)?;
        overlaps.push(Overlap {
            position,
            partition: partition.clone(),
            source: overlap.relative_to(partition_subset.start())?,
            target: overlap.relative_to(subset.start())?,
        });
    }
    Ok(overlaps)
}

fn partition_matrix(variable: &Variable) -> Result<&PartitionMatrix, CfaError> {
    variable.partition_matrix.as_ref().ok_or_else(|| {
        CfaError::InvalidArgument(format!("variable {} is not partitioned", variable.name))
    })
}

impl<'a> PartitionResolver<'a> {
    /// Create a resolver.
    ///
    /// The concurrency limit is the `filehandles` resource allocation, or the number of rayon threads.
    #[must_use]
    pub fn new(context: &'a StorageContext) -> Self {
        let concurrency = context
            .config()
            .resource_allocation
            .as_ref()
            .and_then(|resources| resources.filehandles)
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);
        Self {
            context,
            concurrency,
        }
    }

    /// Set the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Read `subset` of a partitioned `variable` as little endian bytes in C order.
    ///
    /// # Errors
    /// Returns [`CfaError::SubarrayMissing`] if an overlapping partition has no sub-array file, naming the file
    /// a write would create from the master `stem`, or another [`CfaError`] if a sub-array cannot be read.
    pub fn read(
        &self,
        variable: &Variable,
        stem: &str,
        subset: &ArraySubset,
    ) -> Result<Vec<u8>, CfaError> {
        let matrix = partition_matrix(variable)?;
        let element_size = variable.data_type.size();
        let overlaps = overlaps(matrix, subset)?;
        log::debug!(
            "reading {subset} of {} from {} of {} partitions",
            variable.name,
            overlaps.len(),
            matrix.num_partitions()
        );

        let mut output = vec![0u8; subset.num_elements_usize() * element_size];
        {
            let output_slice = UnsafeCellSlice::new(&mut output);
            let read_partition = |overlap: &Overlap| -> Result<(), CfaError> {
                let missing = |uri: &str| CfaError::SubarrayMissing {
                    uri: uri.to_string(),
                    variable: variable.name.clone(),
                    index: overlap.partition.index.clone(),
                };
                let Some(file) = overlap.partition.subarray.file.as_deref() else {
                    let flat_index = matrix.flat_index(&overlap.partition.index);
                    return Err(missing(&subarray_uri(
                        matrix.base(),
                        stem,
                        &variable.name,
                        flat_index,
                    )));
                };
                let handle = self
                    .context
                    .open(file, OpenMode::Read)
                    .map_err(|err| map_not_found(err, || missing(file)))?;
                let mut array_file = self.context.array_file_backend().open(handle)?;
                let bytes =
                    array_file.read_region("", &overlap.partition.subarray.ncvar, &overlap.source)?;
                array_file.close()?;
                log::debug!("read {} of {file}", overlap.source);

                let dense = ArraySubset::new_with_shape(overlap.target.shape().to_vec());
                for (source, target, elements) in
                    dense.contiguous_copy_runs(overlap.target.shape(), &overlap.target, subset.shape())?
                {
                    #[allow(clippy::cast_possible_truncation)]
                    let (source, target, length) = (
                        source as usize * element_size,
                        target as usize * element_size,
                        elements as usize * element_size,
                    );
                    // SAFETY: partitions are disjoint, so the targets of different partitions are disjoint
                    let output = unsafe { output_slice.index_mut(target..target + length) };
                    output.copy_from_slice(&bytes[source..source + length]);
                }
                Ok(())
            };
            iter_concurrent_limit!(
                self.concurrency,
                0..overlaps.len(),
                try_for_each,
                |index: usize| read_partition(&overlaps[index])
            )?;
        }
        Ok(output)
    }

    /// Write `bytes`, little endian elements in C order, to `subset` of a partitioned `variable`.
    ///
    /// The sub-array file of a partition written for the first time is created, named after the master `stem`.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if `bytes` has the wrong length or a sub-array cannot be created or written.
    pub fn write(
        &self,
        variable: &Variable,
        stem: &str,
        subset: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), CfaError> {
        let matrix = partition_matrix(variable)?;
        let element_size = variable.data_type.size();
        let expected = subset.num_elements_usize() * element_size;
        if bytes.len() != expected {
            return Err(CfaError::InvalidArgument(format!(
                "expected {expected} bytes to write to {subset} of {}, got {}",
                variable.name,
                bytes.len()
            )));
        }
        let overlaps = overlaps(matrix, subset)?;
        log::debug!(
            "writing {subset} of {} to {} of {} partitions",
            variable.name,
            overlaps.len(),
            matrix.num_partitions()
        );

        let write_partition = |overlap: &Overlap| -> Result<(), CfaError> {
            let dense = ArraySubset::new_with_shape(overlap.target.shape().to_vec());
            let mut region = vec![0u8; overlap.target.num_elements_usize() * element_size];
            for (source, target, elements) in
                overlap
                    .target
                    .contiguous_copy_runs(subset.shape(), &dense, overlap.target.shape())?
            {
                #[allow(clippy::cast_possible_truncation)]
                let (source, target, length) = (
                    source as usize * element_size,
                    target as usize * element_size,
                    elements as usize * element_size,
                );
                region[target..target + length].copy_from_slice(&bytes[source..source + length]);
            }

            let file = self.materialize(variable, matrix, stem, overlap)?;
            let handle = self.context.open(&file, OpenMode::Update)?;
            let mut array_file = self.context.array_file_backend().open(handle)?;
            array_file.write_region("", &overlap.partition.subarray.ncvar, &overlap.source, &region)?;
            array_file.close()?;
            self.context.invalidate(&file)?;
            log::debug!("wrote {} of {file}", overlap.source);
            Ok(())
        };
        iter_concurrent_limit!(
            self.concurrency,
            0..overlaps.len(),
            try_for_each,
            |index: usize| write_partition(&overlaps[index])
        )
    }

    /// Return the sub-array file of a partition, creating it on first write.
    fn materialize(
        &self,
        variable: &Variable,
        matrix: &PartitionMatrix,
        stem: &str,
        overlap: &Overlap,
    ) -> Result<String, CfaError> {
        if let Some(file) = matrix.file(overlap.position) {
            return Ok(file);
        }
        let _lock = matrix.lock_materialize();
        if let Some(file) = matrix.file(overlap.position) {
            return Ok(file);
        }

        let partition = &overlap.partition;
        let flat_index = matrix.flat_index(&partition.index);
        let file = subarray_uri(matrix.base(), stem, &variable.name, flat_index);
        let schema = subarray_schema(variable, partition)?;
        let handle = self.context.open(&file, OpenMode::Create)?;
        self.context
            .array_file_backend()
            .create(handle, schema)?
            .close()?;
        self.context.invalidate(&file)?;
        matrix.set_file(overlap.position, file.clone());
        log::debug!(
            "created sub-array {file} for partition {:?} of {}",
            partition.index,
            variable.name
        );
        Ok(file)
    }
}

/// The schema of the sub-array file of `partition`: the dimensions of the variable with the partition lengths,
/// and the variable with its attributes.
fn subarray_schema(variable: &Variable, partition: &Partition) -> Result<FileSchema, CfaError> {
    let mut schema = FileSchema::new(partition.subarray.format);
    for (dimension, length) in std::iter::zip(&variable.dimensions, &partition.subarray.shape) {
        schema.create_dimension("", dimension, Some(*length))?;
    }
    schema.create_variable(
        "",
        VariableSchema::new(
            &partition.subarray.ncvar,
            variable.data_type,
            variable.dimensions.clone(),
        )
        .with_attributes(variable.attributes.clone()),
    )?;
    Ok(schema)
}
