//! The partition matrix splitter.
//!
//! [`plan`] grows the number of splits of a master array until every sub-array holds at most a budget of elements.
//! Splits alternate between the fast (spatial, `Y` and `X`) axes and the slow axis (`T`, else `Z`, else the first `N`),
//! keeping `d_lat * d_lon` close to `d_T` so that sub-arrays are balanced between whole fields and long time series.

use derive_more::Display;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ravel_indices, ArrayShape};

/// The role of a dimension in the splitter.
#[derive(Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum AxisRole {
    /// Time, the slow (and possibly unlimited) axis.
    T,
    /// Vertical.
    Z,
    /// Latitude, a fast axis.
    Y,
    /// Longitude, a fast axis.
    X,
    /// Any other axis.
    N,
}

impl AxisRole {
    /// Infer the role of a dimension from its `axis` attribute, or failing that its name.
    ///
    /// An `axis` attribute of `T`, `Z`, `Y` or `X` (any case) is authoritative.
    /// Otherwise names starting with `lat` are `Y`, `lon` are `X`, `lev` are `Z`,
    /// and names starting with `t`, `z`, `y` or `x` take that role. Anything else is `N`.
    #[must_use]
    pub fn infer(name: &str, axis: Option<&str>) -> Self {
        if let Some(role) = axis.and_then(|axis| Self::from_letter(axis.trim())) {
            return role;
        }
        let name = name.to_ascii_lowercase();
        if name.starts_with("lat") {
            Self::Y
        } else if name.starts_with("lon") {
            Self::X
        } else if name.starts_with("lev") {
            Self::Z
        } else {
            name.get(..1).and_then(Self::from_letter).unwrap_or(Self::N)
        }
    }

    fn from_letter(letter: &str) -> Option<Self> {
        match letter.to_ascii_uppercase().as_str() {
            "T" => Some(Self::T),
            "Z" => Some(Self::Z),
            "Y" => Some(Self::Y),
            "X" => Some(Self::X),
            _ => None,
        }
    }
}

/// A splitter error.
#[derive(Clone, Debug, Error)]
#[allow(missing_docs)]
pub enum SplitError {
    /// The budget cannot be met even with every splittable axis split into single elements.
    #[error("cannot split shape {shape:?} into sub-arrays of at most {max_elements} elements")]
    SplitConstraintUnsatisfiable { shape: ArrayShape, max_elements: u64 },
    /// The number of axis roles or sub-array dimensions does not match the shape.
    #[error("incompatible dimensionality {got}, expected {expected}")]
    IncompatibleDimensionality { got: usize, expected: usize },
    /// A partitioned array must have at least one dimension, and every dimension must be non-zero.
    #[error("cannot partition shape {0:?}")]
    InvalidShape(ArrayShape),
    /// A sub-array shape has a zero dimension.
    #[error("invalid sub-array shape {0:?}")]
    InvalidSubarrayShape(ArrayShape),
}

/// A partition of a [`PartitionPlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedPartition {
    /// The index of the partition in the partition matrix.
    pub index: Vec<u64>,
    /// The inclusive `[lo, hi]` bounds of the partition along each dimension.
    pub location: Vec<[u64; 2]>,
}

impl PlannedPartition {
    /// The shape of the sub-array of this partition.
    #[must_use]
    pub fn shape(&self) -> ArrayShape {
        self.location.iter().map(|[lo, hi]| hi - lo + 1).collect()
    }
}

/// A partition matrix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    /// The number of partitions along each dimension.
    pub pmshape: ArrayShape,
    /// The partitions in C order of their index.
    pub partitions: Vec<PlannedPartition>,
}

impl PartitionPlan {
    fn new(bounds: Vec<Vec<[u64; 2]>>) -> Self {
        let pmshape: ArrayShape = bounds.iter().map(|bounds| bounds.len() as u64).collect();
        let partitions = bounds
            .iter()
            .map(|bounds| bounds.iter().copied().enumerate())
            .multi_cartesian_product()
            .map(|product| {
                let (index, location) = product
                    .into_iter()
                    .map(|(index, location)| (index as u64, location))
                    .unzip();
                PlannedPartition { index, location }
            })
            .collect();
        Self {
            pmshape,
            partitions,
        }
    }

    /// The number of partitions.
    #[must_use]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// The largest number of elements in a sub-array.
    #[must_use]
    pub fn max_subarray_elements(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| partition.shape().iter().product())
            .max()
            .unwrap_or(0)
    }

    /// The flattened (C order) index of `partition`.
    #[must_use]
    pub fn flat_index(&self, partition: &PlannedPartition) -> u64 {
        ravel_indices(&partition.index, &self.pmshape)
    }
}

/// Split a dimension of `length` into `splits` contiguous inclusive bounds.
///
/// The first `length % splits` partitions hold one element more than the rest.
fn balanced_bounds(length: u64, splits: u64) -> Vec<[u64; 2]> {
    let remainder = length % splits;
    let small = length / splits;
    let mut offset = 0;
    (0..splits)
        .map(|i| {
            let size = if i < remainder { small + 1 } else { small };
            let bounds = [offset, offset + size - 1];
            offset += size;
            bounds
        })
        .collect()
}

fn validate_shape(shape: &[u64]) -> Result<(), SplitError> {
    if shape.is_empty() || shape.contains(&0) {
        Err(SplitError::InvalidShape(shape.to_vec()))
    } else {
        Ok(())
    }
}

/// A group of axes split together.
///
/// Incrementing a group increments its first axis which is not exhausted.
struct AxisGroup(Vec<usize>);

impl AxisGroup {
    fn active(&self, shape: &[u64], splits: &[u64]) -> Option<usize> {
        self.0.iter().copied().find(|&dim| splits[dim] < shape[dim])
    }

    fn increment(&self, shape: &[u64], splits: &mut [u64]) -> bool {
        if let Some(dim) = self.active(shape, splits) {
            splits[dim] += 1;
            true
        } else {
            false
        }
    }
}

/// Increment the less split of the fast axes, preferring `Y` on a tie.
fn increment_fast(y: Option<usize>, x: Option<usize>, shape: &[u64], splits: &mut [u64]) -> bool {
    let splittable = |dim: Option<usize>| dim.filter(|&dim| splits[dim] < shape[dim]);
    let dim = match (splittable(y), splittable(x)) {
        (Some(y), Some(x)) => Some(if splits[y] <= splits[x] { y } else { x }),
        (y, x) => y.or(x),
    };
    if let Some(dim) = dim {
        splits[dim] += 1;
        true
    } else {
        false
    }
}

fn object_size(shape: &[u64], splits: &[u64]) -> u64 {
    std::iter::zip(shape, splits)
        .map(|(length, splits)| length.div_ceil(*splits))
        .product()
}

/// Lower split counts while the budget still holds.
///
/// An increment does not always shrink the largest sub-array (e.g. 5 elements in 3 or 4 splits),
/// so the alternating increments can leave splits the budget does not need.
fn prune(shape: &[u64], splits: &mut [u64], max_elements: u64) {
    loop {
        let redundant = (0..splits.len()).find(|&dim| {
            if splits[dim] == 1 {
                return false;
            }
            splits[dim] -= 1;
            let fits = object_size(shape, splits) <= max_elements;
            splits[dim] += 1;
            fits
        });
        match redundant {
            Some(dim) => splits[dim] -= 1,
            None => break,
        }
    }
}

/// Plan the partition matrix of an array of `shape` with dimension `roles`, such that no sub-array exceeds `max_elements`.
///
/// Dimensions of length 1 are never split, and no split count can be lowered without exceeding the budget.
/// When neither fast axis is present, the `N` axes follow the slow axis in dimension order as further slow axes.
///
/// # Errors
/// Returns [`SplitError::SplitConstraintUnsatisfiable`] if the budget cannot be met by splitting the fast and slow axes,
/// or another [`SplitError`] if the shape or roles are invalid.
pub fn plan(shape: &[u64], roles: &[AxisRole], max_elements: u64) -> Result<PartitionPlan, SplitError> {
    validate_shape(shape)?;
    if roles.len() != shape.len() {
        return Err(SplitError::IncompatibleDimensionality {
            got: roles.len(),
            expected: shape.len(),
        });
    }

    let find = |role: AxisRole| roles.iter().position(|&r| r == role);
    let y = find(AxisRole::Y);
    let x = find(AxisRole::X);
    let slow_axis = find(AxisRole::T)
        .or_else(|| find(AxisRole::Z))
        .or_else(|| find(AxisRole::N));
    let mut slow = AxisGroup(slow_axis.into_iter().collect());
    if y.is_none() && x.is_none() {
        slow.0.extend(
            roles
                .iter()
                .enumerate()
                .filter(|&(dim, &role)| role == AxisRole::N && Some(dim) != slow_axis)
                .map(|(dim, _)| dim),
        );
    }

    let mut splits = vec![1; shape.len()];
    while object_size(shape, &splits) > max_elements {
        let d_lat_lon = y.map_or(1, |y| splits[y]) * x.map_or(1, |x| splits[x]);
        let d_t = slow
            .active(shape, &splits)
            .or(slow_axis)
            .map_or(u64::MAX, |dim| splits[dim]);
        let incremented = if d_lat_lon <= d_t {
            increment_fast(y, x, shape, &mut splits) || slow.increment(shape, &mut splits)
        } else {
            slow.increment(shape, &mut splits) || increment_fast(y, x, shape, &mut splits)
        };
        if !incremented {
            return Err(SplitError::SplitConstraintUnsatisfiable {
                shape: shape.to_vec(),
                max_elements,
            });
        }
    }
    prune(shape, &mut splits, max_elements);
    log::debug!("planned split counts {splits:?} for shape {shape:?} (roles {roles:?}, budget {max_elements})");

    let bounds = std::iter::zip(shape, &splits)
        .map(|(&length, &splits)| balanced_bounds(length, splits))
        .collect();
    Ok(PartitionPlan::new(bounds))
}

/// Plan the partition matrix of an array of `shape` with sub-arrays of `subarray_shape`.
///
/// The last partition along each dimension holds the remainder if the dimension is not a multiple of the sub-array shape.
///
/// # Errors
/// Returns a [`SplitError`] if the shapes are invalid or have different dimensionality.
pub fn plan_with_shape(shape: &[u64], subarray_shape: &[u64]) -> Result<PartitionPlan, SplitError> {
    validate_shape(shape)?;
    if subarray_shape.len() != shape.len() {
        return Err(SplitError::IncompatibleDimensionality {
            got: subarray_shape.len(),
            expected: shape.len(),
        });
    }
    if subarray_shape.contains(&0) {
        return Err(SplitError::InvalidSubarrayShape(subarray_shape.to_vec()));
    }
    let bounds = std::iter::zip(shape, subarray_shape)
        .map(|(&length, &size)| {
            (0..length.div_ceil(size))
                .map(|i| [i * size, std::cmp::min((i + 1) * size, length) - 1])
                .collect()
        })
        .collect();
    Ok(PartitionPlan::new(bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use AxisRole::{N, T, X, Y, Z};

    fn assert_tiles(plan: &PartitionPlan, shape: &[u64]) {
        for (dim, &length) in shape.iter().enumerate() {
            let mut bounds = plan
                .partitions
                .iter()
                .map(|partition| (partition.index[dim], partition.location[dim]))
                .collect::<Vec<_>>();
            bounds.sort_unstable();
            bounds.dedup();
            assert_eq!(bounds.len() as u64, plan.pmshape[dim]);
            let mut next = 0;
            for (_, [lo, hi]) in bounds {
                assert_eq!(lo, next);
                next = hi + 1;
            }
            assert_eq!(next, length);
        }
    }

    #[test]
    fn axis_role_infer() {
        assert_eq!(AxisRole::infer("time", None), T);
        assert_eq!(AxisRole::infer("t", None), T);
        assert_eq!(AxisRole::infer("level", None), Z);
        assert_eq!(AxisRole::infer("z", None), Z);
        assert_eq!(AxisRole::infer("latitude", None), Y);
        assert_eq!(AxisRole::infer("lon", None), X);
        assert_eq!(AxisRole::infer("ensemble", None), N);
        assert_eq!(AxisRole::infer("ensemble", Some("t")), T);
        assert_eq!(AxisRole::infer("time", Some("bad")), T);
        assert_eq!(AxisRole::infer("", None), N);
    }

    #[test]
    fn plan_tzyx() {
        let shape = [8, 1, 4, 4];
        let plan = super::plan(&shape, &[T, Z, Y, X], 8).unwrap();
        assert_eq!(plan.pmshape, vec![4, 1, 2, 2]);
        assert_eq!(plan.num_partitions(), 16);
        assert!(plan.max_subarray_elements() <= 8);
        assert_tiles(&plan, &shape);
        assert_eq!(plan.partitions[0].index, vec![0, 0, 0, 0]);
        assert_eq!(plan.partitions[1].index, vec![0, 0, 0, 1]);
        assert_eq!(plan.flat_index(&plan.partitions[5]), 5);
    }

    #[test]
    fn plan_balanced_bounds() {
        assert_eq!(balanced_bounds(10, 3), vec![[0, 3], [4, 6], [7, 9]]);
        assert_eq!(balanced_bounds(4, 4), vec![[0, 0], [1, 1], [2, 2], [3, 3]]);
        assert_eq!(balanced_bounds(7, 1), vec![[0, 6]]);
    }

    #[test]
    fn plan_within_budget() {
        let plan = super::plan(&[10, 1], &[T, N], 100).unwrap();
        assert_eq!(plan.pmshape, vec![1, 1]);
        assert_eq!(plan.partitions[0].location, vec![[0, 9], [0, 0]]);
    }

    #[test]
    fn plan_no_fast_axes() {
        // Only N axes, split in dimension order once the first is exhausted
        let shape = [2, 6];
        let plan = super::plan(&shape, &[N, N], 2).unwrap();
        assert_eq!(plan.pmshape, vec![2, 3]);
        assert_tiles(&plan, &shape);

        // Only fast axes
        let shape = [5, 7];
        let plan = super::plan(&shape, &[Y, X], 6).unwrap();
        assert!(plan.max_subarray_elements() <= 6);
        assert_tiles(&plan, &shape);
    }

    #[test]
    fn plan_exhausted_group_falls_back() {
        // The fast axes are exhausted, so the slow axis keeps splitting
        let shape = [20, 2, 2];
        let plan = super::plan(&shape, &[T, Y, X], 2).unwrap();
        assert_eq!(plan.pmshape, vec![10, 2, 2]);
        assert_tiles(&plan, &shape);
    }

    #[test]
    fn plan_unsatisfiable() {
        // Z is not splittable while T is present
        assert!(matches!(
            plan(&[2, 4], &[T, Z], 1),
            Err(SplitError::SplitConstraintUnsatisfiable { .. })
        ));
        assert!(matches!(
            plan(&[4, 4], &[T, Y], 0),
            Err(SplitError::SplitConstraintUnsatisfiable { .. })
        ));
        assert!(plan(&[4, 0], &[T, Y], 1).is_err());
        assert!(plan(&[], &[], 1).is_err());
        assert!(plan(&[4, 4], &[T], 1).is_err());
    }

    #[test]
    fn plan_grid_minimal() {
        let lengths = [1u64, 2, 3, 5, 7];
        let role_sets: [&[AxisRole]; 7] = [
            &[T, X],
            &[Y, X],
            &[N, N],
            &[T, Z],
            &[T, Y, X],
            &[Z, N, X],
            &[N, N, N],
        ];
        for roles in role_sets {
            for shape in std::iter::repeat(lengths)
                .take(roles.len())
                .multi_cartesian_product()
            {
                let elements: u64 = shape.iter().product();
                for max_elements in 1..=elements {
                    let Ok(plan) = super::plan(&shape, roles, max_elements) else {
                        continue;
                    };
                    assert!(plan.max_subarray_elements() <= max_elements);
                    assert_tiles(&plan, &shape);
                    for dim in 0..shape.len() {
                        assert!(plan.pmshape[dim] <= shape[dim]);
                        if plan.pmshape[dim] > 1 {
                            let mut splits = plan.pmshape.clone();
                            splits[dim] -= 1;
                            assert!(
                                object_size(&shape, &splits) > max_elements,
                                "{shape:?} {roles:?} {max_elements}: {:?} is not minimal",
                                plan.pmshape
                            );
                        }
                    }
                }
                assert_eq!(
                    super::plan(&shape, roles, elements).unwrap().num_partitions(),
                    1
                );
            }
        }
    }

    #[test]
    fn plan_prune_overshoot() {
        // 5 elements in 3 or 4 splits give the same largest sub-array
        let mut splits = vec![4, 1];
        prune(&[5, 3], &mut splits, 6);
        assert_eq!(splits, vec![3, 1]);
        let mut splits = vec![2, 2];
        prune(&[4, 4], &mut splits, 4);
        assert_eq!(splits, vec![2, 2]);
    }

    #[test]
    fn plan_explicit_shape() {
        let shape = [10, 4];
        let plan = plan_with_shape(&shape, &[3, 4]).unwrap();
        assert_eq!(plan.pmshape, vec![4, 1]);
        assert_eq!(
            plan.partitions
                .iter()
                .map(|partition| partition.location[0])
                .collect::<Vec<_>>(),
            vec![[0, 2], [3, 5], [6, 8], [9, 9]]
        );
        assert_tiles(&plan, &shape);
        assert!(plan_with_shape(&shape, &[0, 4]).is_err());
        assert!(plan_with_shape(&shape, &[3]).is_err());
    }
}
