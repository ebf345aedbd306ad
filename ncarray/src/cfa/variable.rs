use ncarray_metadata::{Attributes, DataType, CFA_VARIABLE};

use super::PartitionMatrix;

/// A variable of a [`Group`](super::Group).
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    /// The name.
    pub name: String,
    /// The element type.
    pub data_type: DataType,
    /// The dimension names.
    pub dimensions: Vec<String>,
    /// The shape, resolved from the dimension lengths.
    pub shape: Vec<u64>,
    /// The attributes, excluding the partition matrix encoding.
    pub attributes: Attributes,
    /// The partition matrix, or [`None`] if the data is stored in the master file.
    pub partition_matrix: Option<PartitionMatrix>,
}

impl Variable {
    /// The `cf_role` of the variable: `cfa_variable` if it is partitioned, else empty.
    #[must_use]
    pub fn cf_role(&self) -> &'static str {
        if self.partition_matrix.is_some() {
            CFA_VARIABLE
        } else {
            ""
        }
    }

    /// Returns true if the variable is partitioned.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.partition_matrix.is_some()
    }

    /// Returns true if this is a coordinate variable, a variable named after its only dimension.
    #[must_use]
    pub fn is_coordinate(&self) -> bool {
        self.dimensions.len() == 1 && self.dimensions[0] == self.name
    }

    /// The number of elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }
}
