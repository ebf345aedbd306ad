//! Array subsets and the partition matrix splitter for the [`ncarray`](https://docs.rs/ncarray/latest/ncarray/index.html) crate.
//!
//! - [`ArraySubset`] describes a rectangular region of an array, with the geometry needed to translate
//!   a region of a master array into regions of its sub-arrays.
//! - [`plan`] splits an array into a partition matrix of sub-arrays under an element budget,
//!   and [`plan_with_shape`] splits it into sub-arrays of an explicit shape.
//!
//! ## Licence
//! `ncarray_partition` is licensed under either of
//! - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//! - the MIT license <http://opensource.org/licenses/MIT>, at your option.

pub mod array_subset;
pub mod iterators;
mod splitter;

pub use array_subset::{ArraySubset, ArraySubsetError};
pub use splitter::{
    plan, plan_with_shape, AxisRole, PartitionPlan, PlannedPartition, SplitError,
};

/// An array shape. Dimensions may be zero.
pub type ArrayShape = Vec<u64>;

/// An ND index to an element in an array.
pub type ArrayIndices = Vec<u64>;

/// Convert ND `indices` within an array of `shape` to a linearised (C order) index.
///
/// The result is meaningless if the indices are out of bounds.
#[must_use]
pub fn ravel_indices(indices: &[u64], shape: &[u64]) -> u64 {
    let mut index = 0;
    let mut count = 1;
    for (i, s) in std::iter::zip(indices, shape).rev() {
        index += i * count;
        count *= s;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ravel() {
        assert_eq!(ravel_indices(&[1, 2, 3], &[4, 5, 6]), 30 + 2 * 6 + 3);
        assert_eq!(ravel_indices(&[1, 2, 3], &[2, 3, 4]), 23);
        assert_eq!(ravel_indices(&[0, 0, 1], &[2, 3, 4]), 1);
        assert_eq!(ravel_indices(&[], &[]), 0);
    }
}
