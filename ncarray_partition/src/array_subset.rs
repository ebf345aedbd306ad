//! Array subsets.
//!
//! An [`ArraySubset`] represents a rectangular region of an array, such as the region of a read request,
//! the region of the master array covered by a partition, or the overlap of the two.
//!
//! This module also provides convenience functions for:
//!  - computing the byte ranges of array subsets within an array with a fixed element size,
//!  - pairing the contiguous runs of equally shaped subsets of two arrays, see [`ContiguousCopyRuns`].

use std::fmt::Display;
use std::ops::Range;

use thiserror::Error;

use crate::iterators::{ContiguousCopyRuns, ContiguousLinearisedIndices, Indices};
use crate::{ArrayIndices, ArrayShape};

/// An array subset error.
#[derive(Clone, Debug, Error)]
#[allow(missing_docs)]
pub enum ArraySubsetError {
    /// Incompatible dimensionality.
    #[error("incompatible dimensionality {got}, expected {expected}")]
    IncompatibleDimensionality { got: usize, expected: usize },
    /// Incompatible start and shape.
    #[error("incompatible start {start:?} with shape {shape:?}")]
    IncompatibleStartShape {
        start: ArrayIndices,
        shape: ArrayShape,
    },
    /// Incompatible offset.
    #[error("incompatible offset {offset:?} for region with start {start:?}")]
    IncompatibleOffset { start: Vec<u64>, offset: Vec<u64> },
    /// The subset is out of bounds of the array.
    #[error("subset {subset} is out of bounds of array shape {array_shape:?}")]
    OutOfBounds {
        subset: ArraySubset,
        array_shape: ArrayShape,
    },
    /// The subsets of a copy have different shapes.
    #[error("subset shape {source_shape:?} does not match {target_shape:?}")]
    IncompatibleShapes {
        source_shape: ArrayShape,
        target_shape: ArrayShape,
    },
}

/// An array subset.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ArraySubset {
    /// The start of the array subset.
    pub(crate) start: ArrayIndices,
    /// The shape of the array subset.
    pub(crate) shape: ArrayShape,
}

impl Display for ArraySubset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_ranges())
    }
}

impl<T: IntoIterator<Item = Range<u64>>> From<T> for ArraySubset {
    fn from(ranges: T) -> Self {
        let (start, shape) = ranges
            .into_iter()
            .map(|range| (range.start, range.end.saturating_sub(range.start)))
            .unzip();
        Self { start, shape }
    }
}

impl ArraySubset {
    /// Create a new array subset from a list of [`Range`]s.
    #[must_use]
    pub fn new_with_ranges(ranges: &[Range<u64>]) -> Self {
        Self::from(ranges.iter().cloned())
    }

    /// Create a new array subset with `shape` starting at the origin.
    #[must_use]
    pub fn new_with_shape(shape: ArrayShape) -> Self {
        Self {
            start: vec![0; shape.len()],
            shape,
        }
    }

    /// Create a new array subset.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if the size of `start` and `shape` do not match.
    pub fn new_with_start_shape(
        start: ArrayIndices,
        shape: ArrayShape,
    ) -> Result<Self, ArraySubsetError> {
        if start.len() == shape.len() {
            Ok(Self { start, shape })
        } else {
            Err(ArraySubsetError::IncompatibleStartShape { start, shape })
        }
    }

    /// Return the start of the array subset.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// Return the shape of the array subset.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Return the end (exclusive) of the array subset.
    #[must_use]
    pub fn end_exc(&self) -> ArrayIndices {
        std::iter::zip(&self.start, &self.shape)
            .map(|(start, size)| start + size)
            .collect()
    }

    /// Return the array subset as a vec of ranges.
    #[must_use]
    pub fn to_ranges(&self) -> Vec<Range<u64>> {
        std::iter::zip(&self.start, &self.shape)
            .map(|(&start, &size)| start..start + size)
            .collect()
    }

    /// Returns if the array subset is empty (i.e. has a zero element in its shape).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|i| i == &0)
    }

    /// Return the dimensionality of the array subset.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// Return the number of elements of the array subset.
    ///
    /// Equal to the product of the components of its shape.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Return the number of elements of the array subset as a [`usize`].
    ///
    /// # Panics
    /// Panics if the number of elements exceeds [`usize::MAX`].
    #[must_use]
    pub fn num_elements_usize(&self) -> usize {
        usize::try_from(self.num_elements()).unwrap()
    }

    /// Returns true if the array subset is within the bounds of an array of `array_shape`.
    #[must_use]
    pub fn inbounds_shape(&self, array_shape: &[u64]) -> bool {
        self.dimensionality() == array_shape.len()
            && std::iter::zip(self.end_exc(), array_shape).all(|(end, &shape)| end <= shape)
    }

    /// Return the overlapping subset between this array subset and `subset_other`.
    ///
    /// The overlap is empty if the subsets do not intersect.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError::IncompatibleDimensionality`] if the dimensionality of `subset_other` does not match.
    pub fn overlap(&self, subset_other: &ArraySubset) -> Result<Self, ArraySubsetError> {
        if subset_other.dimensionality() != self.dimensionality() {
            return Err(ArraySubsetError::IncompatibleDimensionality {
                got: subset_other.dimensionality(),
                expected: self.dimensionality(),
            });
        }
        let (start, shape) = itertools::izip!(
            &self.start,
            self.end_exc(),
            &subset_other.start,
            subset_other.end_exc()
        )
        .map(|(&start, end, &other_start, other_end)| {
            let overlap_start = std::cmp::max(start, other_start);
            let overlap_end = std::cmp::min(end, other_end);
            (overlap_start, overlap_end.saturating_sub(overlap_start))
        })
        .unzip();
        Ok(Self { start, shape })
    }

    /// Returns true if this array subset shares at least one element with `subset_other`.
    ///
    /// Subsets of differing dimensionality never intersect.
    #[must_use]
    pub fn intersects(&self, subset_other: &ArraySubset) -> bool {
        self.overlap(subset_other)
            .is_ok_and(|overlap| !overlap.is_empty())
    }

    /// Return the subset relative to `start`.
    ///
    /// Creates an array subset starting at [`ArraySubset::start()`] - `start`.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if the length of `start` does not match the dimensionality, or if `start` exceeds the start of the subset.
    pub fn relative_to(&self, start: &[u64]) -> Result<Self, ArraySubsetError> {
        if start.len() != self.dimensionality()
            || std::iter::zip(start, &self.start).any(|(offset, start)| offset > start)
        {
            return Err(ArraySubsetError::IncompatibleOffset {
                start: self.start.clone(),
                offset: start.to_vec(),
            });
        }
        Ok(Self {
            start: std::iter::zip(&self.start, start)
                .map(|(start, offset)| start - offset)
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Returns an iterator over the indices of elements within the subset.
    #[must_use]
    pub fn indices(&self) -> Indices {
        Indices::new(self.clone())
    }

    /// Returns an iterator over the linearised indices of contiguous elements within the subset.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if the `array_shape` does not encapsulate this array subset.
    pub fn contiguous_linearised_indices(
        &self,
        array_shape: &[u64],
    ) -> Result<ContiguousLinearisedIndices, ArraySubsetError> {
        ContiguousLinearisedIndices::new(self, array_shape)
    }

    /// Returns an iterator over the byte ranges of contiguous elements within the subset.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if the `array_shape` does not encapsulate this array subset.
    pub fn iter_contiguous_byte_ranges(
        &self,
        array_shape: &[u64],
        element_size: usize,
    ) -> Result<impl Iterator<Item = Range<u64>>, ArraySubsetError> {
        let element_size = element_size as u64;
        Ok(self
            .contiguous_linearised_indices(array_shape)?
            .map(move |(index, elements)| {
                index * element_size..(index + elements) * element_size
            }))
    }

    /// Returns an iterator over the contiguous runs copying this subset of an array of `array_shape`
    /// to `target_subset` of an array of `target_array_shape`.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if a subset is out of bounds of its array, or if the subset shapes differ.
    pub fn contiguous_copy_runs(
        &self,
        array_shape: &[u64],
        target_subset: &ArraySubset,
        target_array_shape: &[u64],
    ) -> Result<ContiguousCopyRuns, ArraySubsetError> {
        ContiguousCopyRuns::new(self, array_shape, target_subset, target_array_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_subset() {
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10, 10]).is_ok());
        assert!(ArraySubset::new_with_start_shape(vec![0, 0], vec![10]).is_err());

        let array_subset0 = ArraySubset::new_with_ranges(&[1..5, 2..6]);
        let array_subset1 = ArraySubset::new_with_ranges(&[3..6, 4..7]);
        assert_eq!(
            array_subset0.overlap(&array_subset1).unwrap(),
            ArraySubset::new_with_ranges(&[3..5, 4..6])
        );
        assert!(array_subset0.intersects(&array_subset1));
        assert!(!array_subset0.intersects(&ArraySubset::new_with_ranges(&[5..6, 0..10])));
        assert_eq!(
            array_subset0.relative_to(&[1, 1]).unwrap(),
            ArraySubset::new_with_ranges(&[0..4, 1..5])
        );
        assert!(array_subset0.relative_to(&[1, 1, 1]).is_err());
        assert!(array_subset0.relative_to(&[2, 0]).is_err());
        assert!(array_subset0.inbounds_shape(&[10, 10]));
        assert!(!array_subset0.inbounds_shape(&[2, 2]));
        assert!(!array_subset0.inbounds_shape(&[10, 10, 10]));
        assert_eq!(array_subset0.to_ranges(), vec![1..5, 2..6]);
        assert_eq!(array_subset0.end_exc(), vec![5, 6]);
        assert_eq!(array_subset0.to_string(), "[1..5, 2..6]");

        let array_subset2 = ArraySubset::new_with_ranges(&[3..6, 4..7, 0..1]);
        assert!(array_subset0.overlap(&array_subset2).is_err());
    }

    #[test]
    fn array_subset_bytes() {
        let array_subset = ArraySubset::new_with_ranges(&[1..3, 1..3]);

        assert!(array_subset
            .iter_contiguous_byte_ranges(&[1, 1], 1)
            .is_err());
        let ranges = array_subset
            .iter_contiguous_byte_ranges(&[4, 4], 1)
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(ranges, vec![5..7, 9..11]);

        let ranges = ArraySubset::new_with_ranges(&[1..3, 0..4])
            .iter_contiguous_byte_ranges(&[4, 4], 2)
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(ranges, vec![8..24]);
    }
}
