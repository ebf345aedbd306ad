//! Array subset iterators.
//!
//! All iterators visit the last dimension fastest (i.e. C-contiguous order).

use std::iter::FusedIterator;

use crate::{ArrayIndices, ArraySubset, ArraySubsetError};

/// Iterates over element indices in an array subset.
#[derive(Clone, Debug)]
pub struct Indices {
    subset: ArraySubset,
    next: Option<ArrayIndices>,
}

impl Indices {
    /// Create a new indices iterator.
    #[must_use]
    pub fn new(subset: ArraySubset) -> Self {
        let next = if subset.is_empty() {
            None
        } else {
            Some(subset.start.clone())
        };
        Self { subset, next }
    }
}

impl Iterator for Indices {
    type Item = ArrayIndices;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut next = current.clone();
        for (dim, index) in next.iter_mut().enumerate().rev() {
            *index += 1;
            if *index < self.subset.start[dim] + self.subset.shape[dim] {
                self.next = Some(next);
                return Some(current);
            }
            *index = self.subset.start[dim];
        }
        // Every dimension wrapped, or the subset is zero dimensional
        Some(current)
    }
}

impl FusedIterator for Indices {}

/// Compute the C order strides of an array of `shape`.
fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }
    strides
}

fn check_inbounds(subset: &ArraySubset, array_shape: &[u64]) -> Result<(), ArraySubsetError> {
    if subset.dimensionality() != array_shape.len() {
        Err(ArraySubsetError::IncompatibleDimensionality {
            got: array_shape.len(),
            expected: subset.dimensionality(),
        })
    } else if subset.inbounds_shape(array_shape) {
        Ok(())
    } else {
        Err(ArraySubsetError::OutOfBounds {
            subset: subset.clone(),
            array_shape: array_shape.to_vec(),
        })
    }
}

fn linearise(indices: &[u64], start: &[u64], strides: &[u64]) -> u64 {
    itertools::izip!(indices, start, strides)
        .map(|(index, start, stride)| (index + start) * stride)
        .sum()
}

/// Iterates over matching contiguous runs of two equally shaped subsets of two arrays.
///
/// The iterator item is a tuple: (source linearised index, target linearised index, # contiguous elements).
///
/// Trailing dimensions are merged into a single run while both subsets span the whole of that dimension
/// in their respective arrays, so copying a subset between arrays of the same shape is a single run.
#[derive(Clone, Debug)]
pub struct ContiguousCopyRuns {
    outer: Indices,
    source_start: ArrayIndices,
    source_strides: Vec<u64>,
    target_start: ArrayIndices,
    target_strides: Vec<u64>,
    contiguous_elements: u64,
}

impl ContiguousCopyRuns {
    /// Create a new contiguous copy runs iterator.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if a subset is out of bounds of its array, or if the subset shapes differ.
    pub fn new(
        source_subset: &ArraySubset,
        source_array_shape: &[u64],
        target_subset: &ArraySubset,
        target_array_shape: &[u64],
    ) -> Result<Self, ArraySubsetError> {
        check_inbounds(source_subset, source_array_shape)?;
        check_inbounds(target_subset, target_array_shape)?;
        if source_subset.shape != target_subset.shape {
            return Err(ArraySubsetError::IncompatibleShapes {
                source_shape: source_subset.shape.clone(),
                target_shape: target_subset.shape.clone(),
            });
        }

        let shape = &source_subset.shape;
        let ndim = shape.len();
        let mut contiguous_elements = 1;
        let mut inner_dims = 0;
        for dim in (0..ndim).rev() {
            contiguous_elements *= shape[dim];
            inner_dims += 1;
            let source_full =
                source_subset.start[dim] == 0 && shape[dim] == source_array_shape[dim];
            let target_full =
                target_subset.start[dim] == 0 && shape[dim] == target_array_shape[dim];
            if !(source_full && target_full) {
                break;
            }
        }

        // Iterate over the outer dimensions, the inner dimensions are fixed at their start
        let mut outer_shape = shape.clone();
        for size in outer_shape.iter_mut().skip(ndim - inner_dims) {
            *size = std::cmp::min(*size, 1);
        }
        let outer = ArraySubset::new_with_start_shape(vec![0; ndim], outer_shape)?;
        Ok(Self {
            outer: outer.indices(),
            source_start: source_subset.start.clone(),
            source_strides: strides(source_array_shape),
            target_start: target_subset.start.clone(),
            target_strides: strides(target_array_shape),
            contiguous_elements,
        })
    }

    /// Return the number of contiguous elements (fixed on each iteration).
    #[must_use]
    pub fn contiguous_elements(&self) -> u64 {
        self.contiguous_elements
    }
}

impl Iterator for ContiguousCopyRuns {
    type Item = (u64, u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.outer.next()?;
        Some((
            linearise(&indices, &self.source_start, &self.source_strides),
            linearise(&indices, &self.target_start, &self.target_strides),
            self.contiguous_elements,
        ))
    }
}

impl FusedIterator for ContiguousCopyRuns {}

/// Iterates over linearised indices of contiguous elements in an array subset.
///
/// The iterator item is a tuple: (linearised index, # contiguous elements).
///
/// For example, consider a 4x3 array with linearised element indices
/// ```text
/// 0   1   2
/// 3   4   5
/// 6   7   8
/// 9  10  11
/// ```
/// An iterator with an array subset covering the entire array will produce
/// ```rust,ignore
/// [(0, 12)]
/// ```
/// An iterator with an array subset corresponding to the lower right 2x2 region will produce
/// ```rust,ignore
/// [(7, 2), (10, 2)]
/// ```
#[derive(Clone, Debug)]
pub struct ContiguousLinearisedIndices {
    inner: ContiguousCopyRuns,
}

impl ContiguousLinearisedIndices {
    /// Create a new contiguous linearised indices iterator.
    ///
    /// # Errors
    /// Returns [`ArraySubsetError`] if `array_shape` does not encapsulate `subset`.
    pub fn new(subset: &ArraySubset, array_shape: &[u64]) -> Result<Self, ArraySubsetError> {
        Ok(Self {
            inner: ContiguousCopyRuns::new(subset, array_shape, subset, array_shape)?,
        })
    }

    /// Return the number of contiguous elements (fixed on each iteration).
    #[must_use]
    pub fn contiguous_elements(&self) -> u64 {
        self.inner.contiguous_elements()
    }
}

impl Iterator for ContiguousLinearisedIndices {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(index, _, elements)| (index, elements))
    }
}

impl FusedIterator for ContiguousLinearisedIndices {}
