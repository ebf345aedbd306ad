//! The v0.4 encoding: the partition matrix as a JSON attribute.
//!
//! The field variable carries:
//!  - `cf_role = "cfa_variable"`,
//!  - `cfa_dimensions`: the space separated partition matrix dimensions,
//!  - `cfa_array`: the JSON serialised [`PartitionMatrixMetadata`].

use crate::{
    AttributeValue, Attributes, MetadataError, PartitionMatrixMetadata, CFA_ARRAY, CFA_DIMENSIONS,
    CFA_VARIABLE, CF_ROLE,
};

/// Encode a partition matrix into field variable attributes.
///
/// # Errors
/// Returns [`MetadataError::Json`] if the partition matrix cannot be serialised.
pub fn encode(metadata: &PartitionMatrixMetadata) -> Result<Attributes, MetadataError> {
    let mut attributes = Attributes::new();
    attributes.insert(CF_ROLE.to_string(), CFA_VARIABLE.into());
    attributes.insert(
        CFA_DIMENSIONS.to_string(),
        metadata.pmdimensions.join(" ").into(),
    );
    attributes.insert(
        CFA_ARRAY.to_string(),
        serde_json::to_string(metadata)?.into(),
    );
    Ok(attributes)
}

/// Returns true if the field variable `attributes` hold a v0.4 partition matrix.
#[must_use]
pub fn is_encoded(attributes: &Attributes) -> bool {
    attributes.contains_key(CFA_ARRAY)
}

/// Decode a partition matrix from field variable attributes.
///
/// # Errors
/// Returns a [`MetadataError`] if `cfa_array` is missing, is not a string, or is not a valid partition matrix.
pub fn decode(attributes: &Attributes) -> Result<PartitionMatrixMetadata, MetadataError> {
    let json = attributes
        .get(CFA_ARRAY)
        .ok_or_else(|| MetadataError::MissingAttribute(CFA_ARRAY.to_string()))?;
    let AttributeValue::Text(json) = json else {
        return Err(MetadataError::InvalidAttribute {
            name: CFA_ARRAY.to_string(),
            reason: "expected a JSON string".to_string(),
        });
    };
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition_matrix::tests::partition_matrix;

    #[test]
    fn v0_4_round_trip() {
        let metadata = partition_matrix();
        let attributes = encode(&metadata).unwrap();
        assert!(is_encoded(&attributes));
        assert_eq!(attributes[CF_ROLE].as_str(), Some(CFA_VARIABLE));
        assert_eq!(attributes[CFA_DIMENSIONS].as_str(), Some("time lon"));
        assert_eq!(decode(&attributes).unwrap(), metadata);
    }

    #[test]
    fn v0_4_invalid() {
        let mut attributes = Attributes::new();
        assert!(matches!(
            decode(&attributes),
            Err(MetadataError::MissingAttribute(_))
        ));
        attributes.insert(CFA_ARRAY.to_string(), AttributeValue::Int(1));
        assert!(matches!(
            decode(&attributes),
            Err(MetadataError::InvalidAttribute { .. })
        ));
        attributes.insert(CFA_ARRAY.to_string(), r#"{"pmshape": [1]}"#.into());
        assert!(matches!(decode(&attributes), Err(MetadataError::Json(_))));
    }
}
