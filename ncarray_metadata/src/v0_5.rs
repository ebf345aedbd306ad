//! The v0.5 encoding: the partition matrix as a companion group of array attributes.
//!
//! The field variable carries:
//!  - `cf_role = "cfa_variable"`,
//!  - `cfa_dimensions`: the space separated partition matrix dimensions,
//!  - `cfa_group`: the name of the companion group, `cfa_<variable>`.
//!
//! The companion group carries one attribute per field of the partition matrix.
//! Per-partition fields are flattened in partition order, with multidimensional fields in row-major order per partition.
//! An empty `cfa_file` entry marks a partition which has not been written.

use crate::{
    AttributeValue, Attributes, FileFormat, MetadataError, PartitionMatrixMetadata,
    PartitionMetadata, SubarrayMetadata, CFA_DIMENSIONS, CFA_GROUP, CFA_VARIABLE, CF_ROLE,
};

/// The number of partitions along each partition matrix dimension.
pub const CFA_PMSHAPE: &str = "cfa_pmshape";
/// The partition matrix dimensions.
pub const CFA_PMDIMENSIONS: &str = "cfa_pmdimensions";
/// The path prefix of the sub-array files.
pub const CFA_BASE: &str = "cfa_base";
/// The flattened partition indices.
pub const CFA_INDEX: &str = "cfa_index";
/// The flattened inclusive partition bounds, `lo` then `hi` per dimension.
pub const CFA_LOCATION: &str = "cfa_location";
/// The flattened sub-array shapes.
pub const CFA_SHAPE: &str = "cfa_shape";
/// The sub-array file URIs.
pub const CFA_FILE: &str = "cfa_file";
/// The sub-array variable names.
pub const CFA_NCVAR: &str = "cfa_ncvar";
/// The sub-array file formats.
pub const CFA_FORMAT: &str = "cfa_format";

/// The name of the companion group of `variable`.
#[must_use]
pub fn group_name(variable: &str) -> String {
    format!("cfa_{variable}")
}

/// The name of the companion group referenced by the field variable `attributes`.
///
/// # Errors
/// Returns [`MetadataError::MissingAttribute`] if there is no `cfa_group` attribute,
/// or [`MetadataError::InvalidAttribute`] if it is not a non-empty string.
pub fn referenced_group(attributes: &Attributes) -> Result<&str, MetadataError> {
    get(attributes, CFA_GROUP)?
        .as_str()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid(CFA_GROUP, "expected a group name"))
}

/// Returns true if the field variable `attributes` reference a companion group.
#[must_use]
pub fn is_encoded(attributes: &Attributes) -> bool {
    attributes.contains_key(CFA_GROUP)
}

/// Encode a partition matrix of `variable` into field variable attributes and companion group attributes.
///
/// Returns `(variable attributes, group attributes)`.
#[must_use]
pub fn encode(variable: &str, metadata: &PartitionMatrixMetadata) -> (Attributes, Attributes) {
    let mut variable_attributes = Attributes::new();
    variable_attributes.insert(CF_ROLE.to_string(), CFA_VARIABLE.into());
    variable_attributes.insert(
        CFA_DIMENSIONS.to_string(),
        metadata.pmdimensions.join(" ").into(),
    );
    variable_attributes.insert(CFA_GROUP.to_string(), group_name(variable).into());

    let to_i64 = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
    let partitions = &metadata.partitions;
    let mut group = Attributes::new();
    group.insert(
        CFA_PMSHAPE.to_string(),
        AttributeValue::Ints(metadata.pmshape.iter().copied().map(to_i64).collect()),
    );
    group.insert(
        CFA_PMDIMENSIONS.to_string(),
        AttributeValue::Texts(metadata.pmdimensions.clone()),
    );
    group.insert(CFA_BASE.to_string(), metadata.base.as_str().into());
    group.insert(
        CFA_INDEX.to_string(),
        AttributeValue::Ints(
            partitions
                .iter()
                .flat_map(|partition| partition.index.iter().copied().map(to_i64))
                .collect(),
        ),
    );
    group.insert(
        CFA_LOCATION.to_string(),
        AttributeValue::Ints(
            partitions
                .iter()
                .flat_map(|partition| partition.location.iter().flatten().copied().map(to_i64))
                .collect(),
        ),
    );
    group.insert(
        CFA_SHAPE.to_string(),
        AttributeValue::Ints(
            partitions
                .iter()
                .flat_map(|partition| partition.subarray.shape.iter().copied().map(to_i64))
                .collect(),
        ),
    );
    group.insert(
        CFA_FILE.to_string(),
        AttributeValue::Texts(
            partitions
                .iter()
                .map(|partition| partition.subarray.file.clone().unwrap_or_default())
                .collect(),
        ),
    );
    group.insert(
        CFA_NCVAR.to_string(),
        AttributeValue::Texts(
            partitions
                .iter()
                .map(|partition| partition.subarray.ncvar.clone())
                .collect(),
        ),
    );
    group.insert(
        CFA_FORMAT.to_string(),
        AttributeValue::Texts(
            partitions
                .iter()
                .map(|partition| partition.subarray.format.to_string())
                .collect(),
        ),
    );
    (variable_attributes, group)
}

fn get<'a>(attributes: &'a Attributes, name: &str) -> Result<&'a AttributeValue, MetadataError> {
    attributes
        .get(name)
        .ok_or_else(|| MetadataError::MissingAttribute(name.to_string()))
}

fn invalid(name: &str, reason: impl Into<String>) -> MetadataError {
    MetadataError::InvalidAttribute {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn get_u64s(attributes: &Attributes, name: &str) -> Result<Vec<u64>, MetadataError> {
    get(attributes, name)?
        .as_ints()
        .ok_or_else(|| invalid(name, "expected an array of integers"))?
        .iter()
        .map(|&value| u64::try_from(value).map_err(|_| invalid(name, format!("negative value {value}"))))
        .collect()
}

fn get_texts<'a>(attributes: &'a Attributes, name: &str) -> Result<&'a [String], MetadataError> {
    get(attributes, name)?
        .as_texts()
        .ok_or_else(|| invalid(name, "expected an array of strings"))
}

/// Decode a partition matrix from companion group attributes.
///
/// # Errors
/// Returns a [`MetadataError`] if an attribute is missing, has the wrong type, or has a length inconsistent with the
/// partition matrix.
pub fn decode(group: &Attributes) -> Result<PartitionMatrixMetadata, MetadataError> {
    let pmshape = get_u64s(group, CFA_PMSHAPE)?;
    let pmdimensions = get_texts(group, CFA_PMDIMENSIONS)?.to_vec();
    let base = get(group, CFA_BASE)?
        .as_str()
        .ok_or_else(|| invalid(CFA_BASE, "expected a string"))?
        .to_string();
    let index = get_u64s(group, CFA_INDEX)?;
    let location = get_u64s(group, CFA_LOCATION)?;
    let shape = get_u64s(group, CFA_SHAPE)?;
    let file = get_texts(group, CFA_FILE)?;
    let ncvar = get_texts(group, CFA_NCVAR)?;
    let format = get_texts(group, CFA_FORMAT)?;

    let ndim = pmshape.len();
    let num_partitions = file.len();
    let check_len = |name: &str, len: usize, expected: usize| {
        if len == expected {
            Ok(())
        } else {
            Err(invalid(
                name,
                format!("expected {expected} values for {num_partitions} partitions, found {len}"),
            ))
        }
    };
    check_len(CFA_INDEX, index.len(), num_partitions * ndim)?;
    check_len(CFA_LOCATION, location.len(), num_partitions * ndim * 2)?;
    check_len(CFA_SHAPE, shape.len(), num_partitions * ndim)?;
    check_len(CFA_NCVAR, ncvar.len(), num_partitions)?;
    check_len(CFA_FORMAT, format.len(), num_partitions)?;

    let partitions = (0..num_partitions)
        .map(|i| {
            Ok(PartitionMetadata {
                index: index[i * ndim..(i + 1) * ndim].to_vec(),
                location: location[i * ndim * 2..(i + 1) * ndim * 2]
                    .chunks_exact(2)
                    .map(|bounds| [bounds[0], bounds[1]])
                    .collect(),
                subarray: SubarrayMetadata {
                    ncvar: ncvar[i].clone(),
                    file: (!file[i].is_empty()).then(|| file[i].clone()),
                    format: format[i].parse::<FileFormat>()?,
                    shape: shape[i * ndim..(i + 1) * ndim].to_vec(),
                },
            })
        })
        .collect::<Result<Vec<_>, MetadataError>>()?;

    Ok(PartitionMatrixMetadata {
        partitions,
        pmshape,
        pmdimensions,
        base,
    })
}
