use ncarray_metadata::{v0_5, CfaVersion};

use super::{partition_matrix, variable_schema, ConventionCodec};
use crate::{
    array_file::{GroupSchema, VariableSchema},
    cfa::{PartitionMatrix, Variable},
    CfaError,
};

/// The v0.5 convention codec: the partition matrix is held by the companion group `cfa_<variable>`,
/// a child of the group of the variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecV05;

impl ConventionCodec for CodecV05 {
    fn version(&self) -> CfaVersion {
        CfaVersion::V0_5
    }

    fn encode(&self, variable: &Variable, group: &mut GroupSchema) -> Result<(), CfaError> {
        let (variable_attributes, group_attributes) =
            v0_5::encode(&variable.name, &partition_matrix(variable)?);
        variable_schema(group, &variable.name)?
            .attributes
            .extend(variable_attributes);
        let name = v0_5::group_name(&variable.name);
        if group.group(&name).is_some() {
            return Err(CfaError::AlreadyExists { kind: "group", name });
        }
        let mut companion = GroupSchema::new(name);
        companion.attributes = group_attributes;
        group.groups.push(companion);
        Ok(())
    }

    fn decode(
        &self,
        variable: &VariableSchema,
        group: &GroupSchema,
        shape: &[u64],
    ) -> Result<PartitionMatrix, CfaError> {
        let name = v0_5::referenced_group(&variable.attributes)?;
        let companion = group.group(name).ok_or_else(|| CfaError::NotFound {
            kind: "group",
            name: name.to_string(),
        })?;
        let metadata = v0_5::decode(&companion.attributes)?;
        Ok(PartitionMatrix::from_metadata(metadata, shape)?)
    }
}

#[cfg(test)]
mod tests {
    use ncarray_metadata::{v0_5::CFA_FILE, MetadataError, CFA_ARRAY, CFA_GROUP};

    use super::*;
    use crate::codec::tests::{encoded, variable};

    #[test]
    fn codec_v0_5_round_trip() {
        let variable = variable();
        let group = encoded(&variable, CfaVersion::V0_5);
        let schema = group.variable("tas").unwrap();
        assert_eq!(schema.attributes[CFA_GROUP].as_str(), Some("cfa_tas"));
        assert!(!schema.attributes.contains_key(CFA_ARRAY));
        let companion = group.group("cfa_tas").unwrap();
        assert_eq!(
            companion.attributes[CFA_FILE].as_texts().unwrap(),
            &["", "/data/a/a_tas_[1].nc", ""]
        );
        let decoded = CodecV05.decode(schema, &group, &[10, 4]).unwrap();
        assert_eq!(Some(decoded), variable.partition_matrix);

        let mut group = group;
        assert!(CodecV05.encode(&variable, &mut group).is_err());
    }

    #[test]
    fn codec_v0_5_named_group() {
        let variable = variable();
        let mut group = encoded(&variable, CfaVersion::V0_5);
        let mut companion = group.group("cfa_tas").unwrap().clone();
        companion.name = "tas_partitions".to_string();
        group.groups = vec![companion];
        let schema = group.variable_mut("tas").unwrap();
        schema
            .attributes
            .insert(CFA_GROUP.to_string(), "tas_partitions".into());
        let schema = group.variable("tas").unwrap();
        let decoded = CodecV05.decode(schema, &group, &[10, 4]).unwrap();
        assert_eq!(Some(decoded), variable.partition_matrix);

        // The default companion name is not a fallback
        let mut schema = schema.clone();
        schema
            .attributes
            .insert(CFA_GROUP.to_string(), "cfa_missing".into());
        assert!(matches!(
            CodecV05.decode(&schema, &group, &[10, 4]),
            Err(CfaError::NotFound { kind: "group", name }) if name == "cfa_missing"
        ));
        schema.attributes.remove(CFA_GROUP);
        assert!(matches!(
            CodecV05.decode(&schema, &group, &[10, 4]),
            Err(CfaError::Metadata(MetadataError::MissingAttribute(name))) if name == CFA_GROUP
        ));
    }
}
