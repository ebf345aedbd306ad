//! The array-file capability.
//!
//! An array file holds named, typed, multidimensional variables and their attributes, organised in groups.
//! Master files and sub-array files are both array files.
//!
//! The structure of a file is described by a [`FileSchema`], fixed when the file is created.
//! An [`ArrayFileBackend`] creates and opens files on a [`StorageHandle`], and the resulting [`ArrayFileTraits`]
//! reads and writes regions of variables.
//!
//! [`NcaFileBackend`] implements the capability with a simple self-describing format.

mod nca_file;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ncarray_metadata::{AttributeValue, Attributes, DataType, FileFormat};
use ncarray_partition::{ArraySubset, ArraySubsetError};
use ncarray_storage::{StorageError, StorageHandle};

pub use nca_file::{NcaFile, NcaFileBackend};

/// An array file error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArrayFileError {
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Invalid JSON in a file header.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// An invalid region.
    #[error(transparent)]
    ArraySubset(#[from] ArraySubsetError),
    /// The file header is invalid.
    #[error("{uri} is not a valid array file: {reason}")]
    InvalidHeader {
        /// The file URI.
        uri: String,
        /// Why the header is invalid.
        reason: String,
    },
    /// A named group, dimension or variable does not exist.
    #[error("{kind} {name} does not exist")]
    NotFound {
        /// `group`, `dimension` or `variable`.
        kind: &'static str,
        /// The name.
        name: String,
    },
    /// A named group, dimension or variable already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// `group`, `dimension` or `variable`.
        kind: &'static str,
        /// The name.
        name: String,
    },
    /// A variable with data has an unlimited dimension.
    #[error("variable {0} has an unlimited dimension")]
    UnlimitedDimension(String),
    /// The data for a region has the wrong length.
    #[error("expected {expected} bytes for variable {variable}, got {got}")]
    UnexpectedLength {
        /// The variable.
        variable: String,
        /// The expected number of bytes.
        expected: usize,
        /// The number of bytes supplied.
        got: usize,
    },
    /// The file format does not support groups.
    #[error("format {0} does not support groups")]
    GroupsUnsupported(FileFormat),
}

/// A dimension of a [`GroupSchema`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct DimensionSchema {
    /// The name.
    pub name: String,
    /// The length, or [`None`] if unlimited.
    pub length: Option<u64>,
}

const fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_true(value: &bool) -> bool {
    *value
}

/// A variable of a [`GroupSchema`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct VariableSchema {
    /// The name.
    pub name: String,
    /// The data type.
    pub data_type: DataType,
    /// The dimension names.
    pub dimensions: Vec<String>,
    /// The attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Whether the file holds data for the variable.
    ///
    /// Partitioned variables in a master file have no data of their own.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub allocated: bool,
}

impl VariableSchema {
    /// Create a new variable schema with data.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType, dimensions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            dimensions,
            attributes: Attributes::new(),
            allocated: true,
        }
    }

    /// Set the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set whether the file holds data for the variable.
    #[must_use]
    pub fn with_allocated(mut self, allocated: bool) -> Self {
        self.allocated = allocated;
        self
    }

    /// The `_FillValue` attribute as a number.
    #[must_use]
    pub fn fill_value(&self) -> Option<f64> {
        self.attributes
            .get("_FillValue")
            .and_then(AttributeValue::as_f64)
    }
}

/// A group of a [`FileSchema`].
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct GroupSchema {
    /// The name. The root group has an empty name.
    pub name: String,
    /// The attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// The dimensions.
    #[serde(default)]
    pub dimensions: Vec<DimensionSchema>,
    /// The variables.
    #[serde(default)]
    pub variables: Vec<VariableSchema>,
    /// The child groups.
    #[serde(default)]
    pub groups: Vec<GroupSchema>,
}

impl GroupSchema {
    /// Create a new empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Return a dimension of this group.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&DimensionSchema> {
        self.dimensions.iter().find(|dimension| dimension.name == name)
    }

    /// Return a variable of this group.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableSchema> {
        self.variables.iter().find(|variable| variable.name == name)
    }

    /// Return a mutable variable of this group.
    #[must_use]
    pub fn variable_mut(&mut self, name: &str) -> Option<&mut VariableSchema> {
        self.variables
            .iter_mut()
            .find(|variable| variable.name == name)
    }

    /// Return a child group of this group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupSchema> {
        self.groups.iter().find(|group| group.name == name)
    }
}

fn path_components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

/// Join a group path and a name.
#[must_use]
pub fn join_path(group: &str, name: &str) -> String {
    if group.is_empty() {
        name.to_string()
    } else {
        format!("{group}/{name}")
    }
}

/// The structure of an array file.
///
/// Groups are addressed by `/` separated paths relative to the root group, which has the empty path.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct FileSchema {
    /// The file format.
    pub format: FileFormat,
    /// The root group.
    pub root: GroupSchema,
}

impl FileSchema {
    /// Create a new empty schema.
    #[must_use]
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            root: GroupSchema::default(),
        }
    }

    /// Return the group at `path`.
    #[must_use]
    pub fn group(&self, path: &str) -> Option<&GroupSchema> {
        path_components(path).try_fold(&self.root, |group, name| group.group(name))
    }

    /// Return the mutable group at `path`.
    #[must_use]
    pub fn group_mut(&mut self, path: &str) -> Option<&mut GroupSchema> {
        path_components(path).try_fold(&mut self.root, |group, name| {
            group.groups.iter_mut().find(|group| group.name == name)
        })
    }

    fn group_mut_or_err(&mut self, path: &str) -> Result<&mut GroupSchema, ArrayFileError> {
        self.group_mut(path).ok_or_else(|| ArrayFileError::NotFound {
            kind: "group",
            name: path.to_string(),
        })
    }

    /// Create a group at `path`. The parent group must exist.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the format does not support groups, the parent does not exist, or the group exists.
    pub fn create_group(&mut self, path: &str) -> Result<&mut GroupSchema, ArrayFileError> {
        if !self.format.supports_groups() {
            return Err(ArrayFileError::GroupsUnsupported(self.format));
        }
        let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = self.group_mut_or_err(parent)?;
        if parent.group(name).is_some() {
            return Err(ArrayFileError::AlreadyExists {
                kind: "group",
                name: path.to_string(),
            });
        }
        parent.groups.push(GroupSchema::new(name));
        let index = parent.groups.len() - 1;
        Ok(&mut parent.groups[index])
    }

    /// Create a dimension in the group at `group`.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the group does not exist or already has the dimension.
    pub fn create_dimension(
        &mut self,
        group: &str,
        name: &str,
        length: Option<u64>,
    ) -> Result<(), ArrayFileError> {
        let group_schema = self.group_mut_or_err(group)?;
        if group_schema.dimension(name).is_some() {
            return Err(ArrayFileError::AlreadyExists {
                kind: "dimension",
                name: join_path(group, name),
            });
        }
        group_schema.dimensions.push(DimensionSchema {
            name: name.to_string(),
            length,
        });
        Ok(())
    }

    /// Return the dimension `name` visible from the group at `group`, searching the group and then its ancestors.
    #[must_use]
    pub fn dimension(&self, group: &str, name: &str) -> Option<&DimensionSchema> {
        let mut path = group;
        loop {
            if let Some(dimension) = self.group(path).and_then(|group| group.dimension(name)) {
                return Some(dimension);
            }
            if path.is_empty() {
                return None;
            }
            path = path.rsplit_once('/').map_or("", |(parent, _)| parent);
        }
    }

    /// Create a variable in the group at `group`.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the group or a dimension does not exist, or the variable exists.
    pub fn create_variable(
        &mut self,
        group: &str,
        variable: VariableSchema,
    ) -> Result<(), ArrayFileError> {
        for dimension in &variable.dimensions {
            if self.dimension(group, dimension).is_none() {
                return Err(ArrayFileError::NotFound {
                    kind: "dimension",
                    name: join_path(group, dimension),
                });
            }
        }
        let group_schema = self.group_mut_or_err(group)?;
        if group_schema.variable(&variable.name).is_some() {
            return Err(ArrayFileError::AlreadyExists {
                kind: "variable",
                name: join_path(group, &variable.name),
            });
        }
        group_schema.variables.push(variable);
        Ok(())
    }

    /// Return the variable `name` of the group at `group`.
    #[must_use]
    pub fn variable(&self, group: &str, name: &str) -> Option<&VariableSchema> {
        self.group(group).and_then(|group| group.variable(name))
    }

    /// Return the shape of the variable `name` of the group at `group`.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the variable does not exist or has an unlimited dimension.
    pub fn variable_shape(&self, group: &str, name: &str) -> Result<Vec<u64>, ArrayFileError> {
        let path = join_path(group, name);
        let variable = self
            .variable(group, name)
            .ok_or_else(|| ArrayFileError::NotFound {
                kind: "variable",
                name: path.clone(),
            })?;
        variable
            .dimensions
            .iter()
            .map(|dimension| {
                self.dimension(group, dimension)
                    .ok_or_else(|| ArrayFileError::NotFound {
                        kind: "dimension",
                        name: join_path(group, dimension),
                    })?
                    .length
                    .ok_or_else(|| ArrayFileError::UnlimitedDimension(path.clone()))
            })
            .collect()
    }

    /// Set an attribute of the group at `group`, or of its variable `variable`.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the group or variable does not exist.
    pub fn set_attribute(
        &mut self,
        group: &str,
        variable: Option<&str>,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), ArrayFileError> {
        let group_schema = self.group_mut_or_err(group)?;
        let attributes = if let Some(variable) = variable {
            &mut group_schema
                .variable_mut(variable)
                .ok_or_else(|| ArrayFileError::NotFound {
                    kind: "variable",
                    name: join_path(group, variable),
                })?
                .attributes
        } else {
            &mut group_schema.attributes
        };
        attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Return an attribute of the group at `group`, or of its variable `variable`.
    #[must_use]
    pub fn attribute(&self, group: &str, variable: Option<&str>, name: &str) -> Option<&AttributeValue> {
        let group = self.group(group)?;
        match variable {
            Some(variable) => group.variable(variable)?.attributes.get(name),
            None => group.attributes.get(name),
        }
    }

    /// Return the allocated variables in file order as `(group path, variable)`.
    #[must_use]
    pub fn allocated_variables(&self) -> Vec<(String, &VariableSchema)> {
        fn visit<'a>(group: &'a GroupSchema, path: &str, out: &mut Vec<(String, &'a VariableSchema)>) {
            out.extend(
                group
                    .variables
                    .iter()
                    .filter(|variable| variable.allocated)
                    .map(|variable| (path.to_string(), variable)),
            );
            for child in &group.groups {
                visit(child, &join_path(path, &child.name), out);
            }
        }
        let mut out = Vec::new();
        visit(&self.root, "", &mut out);
        out
    }
}

/// Array file traits.
pub trait ArrayFileTraits: Send {
    /// The URI of the file.
    fn uri(&self) -> &str;

    /// The schema of the file.
    fn schema(&self) -> &FileSchema;

    /// Read a region of the variable `variable` of the group at `group`.
    ///
    /// Returns the little endian bytes of the region in C order.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the variable does not exist, the region is out of bounds, or there is a storage error.
    fn read_region(
        &mut self,
        group: &str,
        variable: &str,
        subset: &ArraySubset,
    ) -> Result<Vec<u8>, ArrayFileError>;

    /// Write a region of the variable `variable` of the group at `group` from little endian bytes in C order.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the variable does not exist, the region is out of bounds,
    /// `bytes` has the wrong length, or there is a storage error.
    fn write_region(
        &mut self,
        group: &str,
        variable: &str,
        subset: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), ArrayFileError>;

    /// Close the file, flushing any pending writes.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if there is a storage error.
    fn close(self: Box<Self>) -> Result<(), ArrayFileError>;
}

/// An array file backend creates and opens array files.
pub trait ArrayFileBackend: Send + Sync + std::fmt::Debug {
    /// Create a file with `schema` on `handle`. Variable data is initialised to its fill value, or zero.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the schema is invalid or there is a storage error.
    fn create(
        &self,
        handle: StorageHandle,
        schema: FileSchema,
    ) -> Result<Box<dyn ArrayFileTraits>, ArrayFileError>;

    /// Open the file on `handle`.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if the file is invalid or there is a storage error.
    fn open(&self, handle: StorageHandle) -> Result<Box<dyn ArrayFileTraits>, ArrayFileError>;
}

/// A shared [`ArrayFileBackend`].
pub type ArrayFileBackendRef = Arc<dyn ArrayFileBackend>;
