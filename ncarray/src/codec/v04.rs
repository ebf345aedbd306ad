use ncarray_metadata::{v0_4, CfaVersion};

use super::{partition_matrix, variable_schema, ConventionCodec};
use crate::{
    array_file::{GroupSchema, VariableSchema},
    cfa::{PartitionMatrix, Variable},
    CfaError,
};

/// The v0.4 convention codec: the partition matrix is the JSON `cfa_array` attribute of the variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecV04;

impl ConventionCodec for CodecV04 {
    fn version(&self) -> CfaVersion {
        CfaVersion::V0_4
    }

    fn encode(&self, variable: &Variable, group: &mut GroupSchema) -> Result<(), CfaError> {
        let attributes = v0_4::encode(&partition_matrix(variable)?)?;
        variable_schema(group, &variable.name)?
            .attributes
            .extend(attributes);
        Ok(())
    }

    fn decode(
        &self,
        variable: &VariableSchema,
        _group: &GroupSchema,
        shape: &[u64],
    ) -> Result<PartitionMatrix, CfaError> {
        let metadata = v0_4::decode(&variable.attributes)?;
        Ok(PartitionMatrix::from_metadata(metadata, shape)?)
    }
}

#[cfg(test)]
mod tests {
    use ncarray_metadata::{CFA_ARRAY, CFA_DIMENSIONS};

    use super::*;
    use crate::codec::tests::{encoded, variable};

    #[test]
    fn codec_v0_4_round_trip() {
        let variable = variable();
        let group = encoded(&variable, CfaVersion::V0_4);
        assert!(group.groups.is_empty());
        let schema = group.variable("tas").unwrap();
        assert_eq!(
            schema.attributes[CFA_DIMENSIONS].as_str(),
            Some("time lon")
        );
        assert!(schema.attributes[CFA_ARRAY]
            .as_str()
            .unwrap()
            .contains("\"Partitions\""));
        let decoded = CodecV04.decode(schema, &group, &[10, 4]).unwrap();
        assert_eq!(Some(decoded), variable.partition_matrix);
    }
}
