//! Convention codecs encode the partition matrix of a variable into the master file and decode it back.
//!
//! The codec of a dataset is selected by the `CFA-<version>` token of its global `Conventions` attribute:
//!  - [`CodecV04`] stores the partition matrix as the JSON `cfa_array` attribute of the variable,
//!  - [`CodecV05`] stores it as array attributes of a companion group `cfa_<variable>`.

mod v04;
mod v05;

use ncarray_metadata::{
    AttributeValue, CfaVersion, PartitionMatrixMetadata, CFA_ARRAY, CFA_DIMENSIONS, CFA_GROUP,
    CFA_VARIABLE, CF_ROLE,
};

pub use v04::CodecV04;
pub use v05::CodecV05;

use crate::{
    array_file::{GroupSchema, VariableSchema},
    cfa::{PartitionMatrix, Variable},
    CfaError,
};

/// Convention codec traits.
pub trait ConventionCodec: Send + Sync {
    /// The convention version of the codec.
    fn version(&self) -> CfaVersion;

    /// Encode the partition matrix of `variable` into its schema in `group`.
    ///
    /// The variable schema must already be in `group`.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the variable is not partitioned or the encoding fails.
    fn encode(&self, variable: &Variable, group: &mut GroupSchema) -> Result<(), CfaError>;

    /// Decode the partition matrix of `variable` of `group`, validating it against the variable `shape`.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the encoding is missing or invalid.
    fn decode(
        &self,
        variable: &VariableSchema,
        group: &GroupSchema,
        shape: &[u64],
    ) -> Result<PartitionMatrix, CfaError>;
}

static CODEC_V0_4: CodecV04 = CodecV04;
static CODEC_V0_5: CodecV05 = CodecV05;

/// Return the codec of a convention `version`.
#[must_use]
pub fn codec(version: CfaVersion) -> &'static dyn ConventionCodec {
    match version {
        CfaVersion::V0_4 => &CODEC_V0_4,
        CfaVersion::V0_5 => &CODEC_V0_5,
    }
}

/// Detect the encoding of `variable`.
///
/// Returns [`None`] if the variable is not partitioned.
///
/// # Errors
/// Returns [`CfaError::UnsupportedCFAVersion`] if the variable has `cf_role = "cfa_variable"` without a
/// `cfa_array` or `cfa_group` attribute.
pub fn detect(variable: &VariableSchema) -> Result<Option<CfaVersion>, CfaError> {
    let role = variable.attributes.get(CF_ROLE).and_then(AttributeValue::as_str);
    if role != Some(CFA_VARIABLE) {
        return Ok(None);
    }
    if ncarray_metadata::v0_4::is_encoded(&variable.attributes) {
        return Ok(Some(CfaVersion::V0_4));
    }
    if ncarray_metadata::v0_5::is_encoded(&variable.attributes) {
        return Ok(Some(CfaVersion::V0_5));
    }
    Err(CfaError::UnsupportedCFAVersion(format!(
        "variable {} is partitioned but has neither {CFA_ARRAY} nor {CFA_GROUP}",
        variable.name
    )))
}

/// Returns true if `name` is an attribute of the partition matrix encoding.
#[must_use]
pub fn is_encoding_attribute(name: &str) -> bool {
    matches!(name, CF_ROLE | CFA_DIMENSIONS | CFA_ARRAY | CFA_GROUP)
}

fn partition_matrix(variable: &Variable) -> Result<PartitionMatrixMetadata, CfaError> {
    variable
        .partition_matrix
        .as_ref()
        .map(PartitionMatrix::to_metadata)
        .ok_or_else(|| {
            CfaError::InvalidArgument(format!("variable {} is not partitioned", variable.name))
        })
}

fn variable_schema<'a>(
    group: &'a mut GroupSchema,
    name: &str,
) -> Result<&'a mut VariableSchema, CfaError> {
    group
        .variable_mut(name)
        .ok_or_else(|| CfaError::NotFound {
            kind: "variable",
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use ncarray_metadata::{DataType, FileFormat};
    use ncarray_partition::plan_with_shape;

    use super::*;

    pub(crate) fn variable() -> Variable {
        let plan = plan_with_shape(&[10, 4], &[4, 4]).unwrap();
        let matrix = PartitionMatrix::from_plan(
            vec!["time".into(), "lon".into()],
            plan,
            "/data/a".into(),
            "tas",
            FileFormat::Netcdf4,
        );
        matrix.set_file(1, "/data/a/a_tas_[1].nc".into());
        let mut attributes = ncarray_metadata::Attributes::new();
        attributes.insert("units".into(), "K".into());
        Variable {
            name: "tas".into(),
            data_type: DataType::Float32,
            dimensions: vec!["time".into(), "lon".into()],
            shape: vec![10, 4],
            attributes,
            partition_matrix: Some(matrix),
        }
    }

    pub(crate) fn encoded(variable: &Variable, version: CfaVersion) -> GroupSchema {
        let mut group = GroupSchema::default();
        group.variables.push(
            VariableSchema::new(&variable.name, variable.data_type, variable.dimensions.clone())
                .with_attributes(variable.attributes.clone())
                .with_allocated(false),
        );
        codec(version).encode(variable, &mut group).unwrap();
        group
    }

    #[test]
    fn codec_detect() {
        let variable = variable();
        for version in [CfaVersion::V0_4, CfaVersion::V0_5] {
            let group = encoded(&variable, version);
            let schema = group.variable("tas").unwrap();
            assert_eq!(detect(schema).unwrap(), Some(version));
            assert_eq!(codec(version).version(), version);
        }

        let mut group = encoded(&variable, CfaVersion::V0_5);
        group.variable_mut("tas").unwrap().attributes.remove(CFA_GROUP);
        assert!(matches!(
            detect(group.variable("tas").unwrap()),
            Err(CfaError::UnsupportedCFAVersion(_))
        ));

        let plain = VariableSchema::new("lat", DataType::Float64, vec!["lat".into()]);
        assert_eq!(detect(&plain).unwrap(), None);
    }

    #[test]
    fn codec_not_partitioned() {
        let mut variable = variable();
        variable.partition_matrix = None;
        let mut group = GroupSchema::default();
        group.variables.push(VariableSchema::new("tas", DataType::Float32, vec![]));
        assert!(codec(CfaVersion::V0_4).encode(&variable, &mut group).is_err());
    }
}
