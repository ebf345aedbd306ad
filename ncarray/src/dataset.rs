//! Datasets.
//!
//! A [`Dataset`] is a master file holding groups, dimensions and variables.
//! In the `CFA3` and `CFA4` formats the data of each variable, other than coordinate and scalar variables, is split
//! into sub-array files next to the master file, and its partition matrix is recorded in the master file.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use ncarray::{Dataset, StorageContext, VariableOptions};
//! # use ncarray::metadata::{DataType, FileFormat};
//! # use ncarray::storage::{Config, OpenMode};
//! let context = Arc::new(StorageContext::new(Config::default())?);
//! let mut dataset = Dataset::create(&context, "memory://run/tas.nca", FileFormat::Cfa4)?;
//! dataset.create_dimension("", "time", Some(4))?;
//! dataset.create_dimension("", "lat", Some(2))?;
//! dataset.create_variable(
//!     "",
//!     "tas",
//!     DataType::Float32,
//!     &["time", "lat"],
//!     VariableOptions::new().with_subarray_shape(vec![2, 2]),
//! )?;
//! dataset.write::<f32>("tas", &[(0..4).into(), (0..2).into()], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])?;
//! dataset.close()?;
//!
//! let dataset = Dataset::open(&context, "memory://run/tas.nca", OpenMode::Read)?;
//! assert_eq!(dataset.read::<f32>("tas", &[(1..3).into(), (1..2).into()])?, vec![3.0, 5.0]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{collections::HashMap, fmt::Write as _, sync::Arc};

use ncarray_metadata::{
    AttributeValue, Attributes, CfaVersion, DataType, FileFormat, MetadataError, CONVENTIONS,
};
use ncarray_partition::{plan, plan_with_shape, ArraySubset, AxisRole, SplitError};
use ncarray_storage::OpenMode;
use parking_lot::Mutex;

use crate::{
    array_file::{join_path, ArrayFileTraits, DimensionSchema, FileSchema, GroupSchema, VariableSchema},
    cfa::{master_base, Dimension, Group, PartitionMatrix, Variable},
    codec::{codec, detect, is_encoding_attribute},
    context::{map_not_found, StorageContext},
    element::{bytes_to_elements, elements_to_bytes, fill_value_bytes, Element},
    resolver::{request_subset, DimSlice, PartitionResolver},
    CfaError,
};

/// Options for [`Dataset::create_variable`].
#[derive(Clone, Debug, Default)]
pub struct VariableOptions {
    subarray_shape: Option<Vec<u64>>,
    max_object_size: Option<u64>,
    attributes: Attributes,
}

impl VariableOptions {
    /// Create default options.
    ///
    /// A partitioned variable is split under the `max_object_size` of the configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Split into sub-arrays of `subarray_shape`, with shorter sub-arrays at the end of each dimension.
    #[must_use]
    pub fn with_subarray_shape(mut self, subarray_shape: Vec<u64>) -> Self {
        self.subarray_shape = Some(subarray_shape);
        self
    }

    /// Split under a budget of `max_object_size` bytes per sub-array instead of the configured budget.
    #[must_use]
    pub fn with_max_object_size(mut self, max_object_size: u64) -> Self {
        self.max_object_size = Some(max_object_size);
        self
    }

    /// Set the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Split a variable path into its group path and name.
fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn writable(mode: OpenMode, uri: &str) -> Result<(), CfaError> {
    if mode.is_writable() {
        Ok(())
    } else {
        Err(CfaError::ReadOnly(uri.to_string()))
    }
}

fn not_found(kind: &'static str, name: &str) -> CfaError {
    CfaError::NotFound {
        kind,
        name: name.to_string(),
    }
}

/// A dataset.
///
/// Changes are written to the master file by [`Dataset::close`]. Data written to partitioned variables goes to the
/// sub-array files immediately, but a dataset dropped without closing leaves no record of it in the master file.
pub struct Dataset {
    context: Arc<StorageContext>,
    uri: String,
    mode: OpenMode,
    format: FileFormat,
    version: CfaVersion,
    base: String,
    stem: String,
    root: Group,
    /// The data of unpartitioned variables by path, held in write modes.
    data: HashMap<String, Vec<u8>>,
    /// The master file, held in read mode.
    master: Mutex<Option<Box<dyn ArrayFileTraits>>>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("format", &self.format)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Dataset {
    /// Create a dataset at `uri` with the default convention version of `format`.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if no storage backend is available for `uri`.
    pub fn create(
        context: &Arc<StorageContext>,
        uri: &str,
        format: FileFormat,
    ) -> Result<Self, CfaError> {
        Self::create_with_version(context, uri, format, CfaVersion::default_for(format))
    }

    /// Create a dataset at `uri` with convention `version`.
    ///
    /// # Errors
    /// Returns [`CfaError::IncompatibleFormat`] if `version` needs groups and `format` has none,
    /// or a [`CfaError`] if no storage backend is available for `uri`.
    pub fn create_with_version(
        context: &Arc<StorageContext>,
        uri: &str,
        format: FileFormat,
        version: CfaVersion,
    ) -> Result<Self, CfaError> {
        if version == CfaVersion::V0_5 && !format.supports_groups() {
            return Err(CfaError::IncompatibleFormat(format!(
                "the CFA-{version} encoding needs groups, which the {format} format does not have"
            )));
        }
        context.backend(uri)?;
        let (base, stem) = master_base(uri);
        log::debug!("creating {format} dataset {uri}");
        Ok(Self {
            context: context.clone(),
            uri: uri.to_string(),
            mode: OpenMode::Create,
            format,
            version,
            base,
            stem,
            root: Group::default(),
            data: HashMap::new(),
            master: Mutex::new(None),
        })
    }

    /// Open the dataset at `uri` for reading or updating.
    ///
    /// # Errors
    /// Returns
    ///  - [`CfaError::NotFound`] if the master file does not exist,
    ///  - [`CfaError::NotACFAFile`] if a `CFA3` or `CFA4` master file has no `CFA` convention token,
    ///  - [`CfaError::UnsupportedCFAVersion`] if the convention token or a partition matrix encoding is unsupported,
    ///  - another [`CfaError`] if the master file is invalid or cannot be read.
    pub fn open(context: &Arc<StorageContext>, uri: &str, mode: OpenMode) -> Result<Self, CfaError> {
        if mode == OpenMode::Create {
            return Err(CfaError::InvalidArgument(
                "a dataset is opened for reading or updating, use Dataset::create to create one"
                    .to_string(),
            ));
        }
        let handle = context
            .open(uri, OpenMode::Read)
            .map_err(|err| map_not_found(err, || not_found("dataset", uri)))?;
        let mut master = context.array_file_backend().open(handle)?;
        let schema = master.schema().clone();
        let format = schema.format;

        let declared = match schema
            .root
            .attributes
            .get(CONVENTIONS)
            .and_then(AttributeValue::as_str)
        {
            Some(conventions) => CfaVersion::from_conventions(conventions)?,
            None => None,
        };
        if format.is_cfa() && declared.is_none() {
            return Err(CfaError::NotACFAFile(uri.to_string()));
        }
        let root = build_group(&schema, &schema.root, "", declared)?;

        let mut data = HashMap::new();
        let master = if mode == OpenMode::Update {
            for (group, variable) in schema.allocated_variables() {
                let shape = schema.variable_shape(&group, &variable.name)?;
                let bytes =
                    master.read_region(&group, &variable.name, &ArraySubset::new_with_shape(shape))?;
                data.insert(join_path(&group, &variable.name), bytes);
            }
            master.close()?;
            None
        } else {
            Some(master)
        };
        let (base, stem) = master_base(uri);
        log::debug!("opened {format} dataset {uri} for {mode}");
        Ok(Self {
            context: context.clone(),
            uri: uri.to_string(),
            mode,
            format,
            version: declared.unwrap_or_else(|| CfaVersion::default_for(format)),
            base,
            stem,
            root,
            data,
            master: Mutex::new(master),
        })
    }

    /// The URI of the master file.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The mode the dataset was opened with.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The format.
    #[must_use]
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// The convention version.
    #[must_use]
    pub fn version(&self) -> CfaVersion {
        self.version
    }

    /// The storage context.
    #[must_use]
    pub fn context(&self) -> &Arc<StorageContext> {
        &self.context
    }

    /// The root group.
    #[must_use]
    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Return the group at `path`. The root group has the empty path.
    #[must_use]
    pub fn group(&self, path: &str) -> Option<&Group> {
        self.root.group(path)
    }

    /// Return the variable at `path`, e.g. `forecast/tas`.
    #[must_use]
    pub fn variable(&self, path: &str) -> Option<&Variable> {
        let (group, name) = split_path(path);
        self.root.group(group)?.variable(name)
    }

    fn variable_or_err(&self, path: &str) -> Result<&Variable, CfaError> {
        self.variable(path).ok_or_else(|| not_found("variable", path))
    }

    fn group_mut_or_err(&mut self, path: &str) -> Result<&mut Group, CfaError> {
        self.root
            .group_mut(path)
            .ok_or_else(|| not_found("group", path))
    }

    /// Create a group at `path`. The parent group must exist.
    ///
    /// # Errors
    /// Returns [`CfaError::IncompatibleFormat`] if the format has no groups, or a [`CfaError`] if the dataset is
    /// read only, the parent does not exist, or the group exists.
    pub fn create_group(&mut self, path: &str) -> Result<(), CfaError> {
        writable(self.mode, &self.uri)?;
        if !self.format.supports_groups() {
            return Err(CfaError::IncompatibleFormat(format!(
                "the {} format does not support groups",
                self.format
            )));
        }
        let (parent, name) = split_path(path);
        if name.is_empty() {
            return Err(CfaError::InvalidArgument(format!("invalid group path {path}")));
        }
        let parent = self.group_mut_or_err(parent)?;
        if parent.groups.iter().any(|group| group.name == name) {
            return Err(CfaError::AlreadyExists {
                kind: "group",
                name: path.to_string(),
            });
        }
        parent.groups.push(Group::new(name));
        Ok(())
    }

    /// Create a dimension `name` of `length` in the group at `group`. A `length` of [`None`] is unlimited.
    ///
    /// The axis role is inferred from the name, see [`AxisRole::infer`].
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the dataset is read only, the group does not exist, or the dimension exists.
    pub fn create_dimension(
        &mut self,
        group: &str,
        name: &str,
        length: Option<u64>,
    ) -> Result<(), CfaError> {
        writable(self.mode, &self.uri)?;
        let group_model = self.group_mut_or_err(group)?;
        if group_model.dimension(name).is_some() {
            return Err(CfaError::AlreadyExists {
                kind: "dimension",
                name: join_path(group, name),
            });
        }
        group_model.dimensions.push(Dimension {
            name: name.to_string(),
            length,
            axis: AxisRole::infer(name, None),
            data_type: None,
        });
        Ok(())
    }

    /// Set the axis role of the dimension `name` visible from the group at `group`.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the dataset is read only or the dimension does not exist.
    pub fn set_dimension_axis(
        &mut self,
        group: &str,
        name: &str,
        axis: AxisRole,
    ) -> Result<(), CfaError> {
        writable(self.mode, &self.uri)?;
        self.root
            .find_dimension_mut(group, name)
            .ok_or_else(|| not_found("dimension", &join_path(group, name)))?
            .axis = axis;
        Ok(())
    }

    /// Create a variable `name` in the group at `group`.
    ///
    /// In a `CFA3` or `CFA4` dataset the variable is partitioned, unless it is a scalar or a coordinate variable
    /// (named after its only dimension). The partition matrix has the shape given by the options, or is planned
    /// under the byte budget of the options or configuration along the axis roles of the dimensions.
    ///
    /// An `axis` attribute of a coordinate variable sets the axis role of its dimension.
    ///
    /// # Errors
    /// Returns
    ///  - [`CfaError::SplitConstraintUnsatisfiable`] if the variable cannot be split under the budget,
    ///  - [`CfaError::InvalidArgument`] if a dimension is unlimited,
    ///  - another [`CfaError`] if the dataset is read only, the group or a dimension does not exist, or the
    ///    variable exists.
    pub fn create_variable(
        &mut self,
        group: &str,
        name: &str,
        data_type: DataType,
        dimensions: &[&str],
        options: VariableOptions,
    ) -> Result<(), CfaError> {
        writable(self.mode, &self.uri)?;
        let path = join_path(group, name);
        let group_model = self.root.group(group).ok_or_else(|| not_found("group", group))?;
        if group_model.variable(name).is_some() {
            return Err(CfaError::AlreadyExists {
                kind: "variable",
                name: path,
            });
        }
        let mut shape = Vec::with_capacity(dimensions.len());
        let mut roles = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            let dimension = self
                .root
                .find_dimension(group, dimension)
                .ok_or_else(|| not_found("dimension", &join_path(group, dimension)))?;
            let length = dimension.length.ok_or_else(|| {
                CfaError::InvalidArgument(format!(
                    "variable {path} uses the unlimited dimension {}, variables need dimensions of fixed length",
                    dimension.name
                ))
            })?;
            shape.push(length);
            roles.push(dimension.axis);
        }

        let is_coordinate = dimensions.len() == 1 && dimensions[0] == name;
        let partition_matrix = if self.format.is_cfa() && !is_coordinate && !dimensions.is_empty() {
            Some(self.plan_partition_matrix(group, name, data_type, &shape, &roles, dimensions, &options)?)
        } else {
            None
        };

        if is_coordinate {
            let axis = options.attributes.get("axis").and_then(AttributeValue::as_str);
            if let Some(dimension) = self.root.find_dimension_mut(group, name) {
                dimension.data_type = Some(data_type);
                dimension.axis = AxisRole::infer(name, axis);
            }
        }

        let variable = Variable {
            name: name.to_string(),
            data_type,
            dimensions: dimensions.iter().map(ToString::to_string).collect(),
            shape,
            attributes: options.attributes,
            partition_matrix,
        };
        if !variable.is_partitioned() {
            let fill = variable
                .attributes
                .get("_FillValue")
                .and_then(AttributeValue::as_f64)
                .unwrap_or_default();
            #[allow(clippy::cast_possible_truncation)]
            let bytes = fill_value_bytes(data_type, fill).repeat(variable.num_elements() as usize);
            self.data.insert(path.clone(), bytes);
        }
        log::debug!(
            "created variable {path} of shape {:?}{}",
            variable.shape,
            variable
                .partition_matrix
                .as_ref()
                .map(|matrix| format!(" with pmshape {:?}", matrix.pmshape()))
                .unwrap_or_default()
        );
        self.group_mut_or_err(group)?.variables.push(variable);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_partition_matrix(
        &self,
        group: &str,
        name: &str,
        data_type: DataType,
        shape: &[u64],
        roles: &[AxisRole],
        dimensions: &[&str],
        options: &VariableOptions,
    ) -> Result<PartitionMatrix, CfaError> {
        let plan = if let Some(subarray_shape) = &options.subarray_shape {
            plan_with_shape(shape, subarray_shape)?
        } else {
            let max_object_size = options
                .max_object_size
                .unwrap_or(self.context.config().max_object_size.0);
            let max_elements = std::cmp::max(max_object_size / data_type.size() as u64, 1);
            plan(shape, roles, max_elements).map_err(|err| match err {
                SplitError::SplitConstraintUnsatisfiable {
                    shape,
                    max_elements,
                } => CfaError::SplitConstraintUnsatisfiable {
                    variable: join_path(group, name),
                    shape,
                    max_elements,
                },
                err => err.into(),
            })?
        };
        let base = if group.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{group}", self.base)
        };
        Ok(PartitionMatrix::from_plan(
            dimensions.iter().map(ToString::to_string).collect(),
            plan,
            base,
            name,
            self.format.subarray_format(),
        ))
    }

    /// Set an attribute of the group at `group`, or of its variable `variable` if given.
    ///
    /// Use the root group `""` for global attributes.
    ///
    /// # Errors
    /// Returns [`CfaError::InvalidArgument`] if `name` is reserved for the partition matrix encoding, or a
    /// [`CfaError`] if the dataset is read only or the group or variable does not exist.
    pub fn set_attribute(
        &mut self,
        group: &str,
        variable: Option<&str>,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), CfaError> {
        writable(self.mode, &self.uri)?;
        if is_encoding_attribute(name) {
            return Err(CfaError::InvalidArgument(format!(
                "the {name} attribute is reserved for the partition matrix"
            )));
        }
        let group_model = self.group_mut_or_err(group)?;
        let attributes = match variable {
            Some(variable) => {
                &mut group_model
                    .variable_mut(variable)
                    .ok_or_else(|| not_found("variable", &join_path(group, variable)))?
                    .attributes
            }
            None => &mut group_model.attributes,
        };
        attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Return an attribute of the group at `group`, or of its variable `variable` if given.
    #[must_use]
    pub fn attribute(&self, group: &str, variable: Option<&str>, name: &str) -> Option<&AttributeValue> {
        let group = self.root.group(group)?;
        match variable {
            Some(variable) => group.variable(variable)?.attributes.get(name),
            None => group.attributes.get(name),
        }
    }

    /// Read a region of the variable at `path` as little endian bytes in C order.
    ///
    /// # Errors
    /// Returns
    ///  - [`CfaError::StridedSliceUnsupported`] if a step is not 1,
    ///  - [`CfaError::OutOfBounds`] if the request exceeds the shape of the variable,
    ///  - [`CfaError::SubarrayMissing`] if an overlapping partition has never been written,
    ///  - another [`CfaError`] if the variable does not exist or the read fails.
    pub fn read_bytes(&self, path: &str, request: &[DimSlice]) -> Result<Vec<u8>, CfaError> {
        let variable = self.variable_or_err(path)?;
        let subset = request_subset(path, &variable.shape, request)?;
        if variable.is_partitioned() {
            return PartitionResolver::new(&self.context).read(variable, &self.stem, &subset);
        }
        if let Some(data) = self.data.get(path) {
            return extract(data, &variable.shape, &subset, variable.data_type.size());
        }
        let (group, name) = split_path(path);
        let mut master = self.master.lock();
        let master = master
            .as_mut()
            .ok_or_else(|| not_found("variable data", path))?;
        Ok(master.read_region(group, name, &subset)?)
    }

    /// Read a region of the variable at `path`.
    ///
    /// # Errors
    /// Returns [`CfaError::IncompatibleElementType`] if `T` does not match the data type of the variable,
    /// or an error of [`Dataset::read_bytes`].
    pub fn read<T: Element>(&self, path: &str, request: &[DimSlice]) -> Result<Vec<T>, CfaError> {
        self.check_element::<T>(path)?;
        Ok(bytes_to_elements(self.read_bytes(path, request)?))
    }

    /// Write a region of the variable at `path` from little endian bytes in C order.
    ///
    /// # Errors
    /// Returns
    ///  - [`CfaError::StridedSliceUnsupported`] if a step is not 1,
    ///  - [`CfaError::OutOfBounds`] if the request exceeds the shape of the variable,
    ///  - another [`CfaError`] if the dataset is read only, the variable does not exist, `bytes` has the wrong
    ///    length, or the write fails.
    pub fn write_bytes(
        &mut self,
        path: &str,
        request: &[DimSlice],
        bytes: &[u8],
    ) -> Result<(), CfaError> {
        writable(self.mode, &self.uri)?;
        let variable = self.variable_or_err(path)?;
        let subset = request_subset(path, &variable.shape, request)?;
        if variable.is_partitioned() {
            return PartitionResolver::new(&self.context).write(variable, &self.stem, &subset, bytes);
        }
        let shape = variable.shape.clone();
        let element_size = variable.data_type.size();
        let data = self
            .data
            .get_mut(path)
            .ok_or_else(|| not_found("variable data", path))?;
        store(data, &shape, &subset, element_size, bytes)
    }

    /// Write a region of the variable at `path`.
    ///
    /// # Errors
    /// Returns [`CfaError::IncompatibleElementType`] if `T` does not match the data type of the variable,
    /// or an error of [`Dataset::write_bytes`].
    pub fn write<T: Element>(
        &mut self,
        path: &str,
        request: &[DimSlice],
        elements: &[T],
    ) -> Result<(), CfaError> {
        self.check_element::<T>(path)?;
        self.write_bytes(path, request, &elements_to_bytes(elements))
    }

    fn check_element<T: Element>(&self, path: &str) -> Result<(), CfaError> {
        let variable = self.variable_or_err(path)?;
        if variable.data_type == T::DATA_TYPE {
            Ok(())
        } else {
            Err(CfaError::IncompatibleElementType {
                variable: path.to_string(),
                expected: variable.data_type,
                got: T::DATA_TYPE,
            })
        }
    }

    /// Read a region of the variable at `path` into an [`ndarray::ArrayD`].
    ///
    /// # Errors
    /// Returns an error of [`Dataset::read`].
    #[cfg(feature = "ndarray")]
    pub fn read_ndarray<T: Element>(
        &self,
        path: &str,
        request: &[DimSlice],
    ) -> Result<ndarray::ArrayD<T>, CfaError> {
        let elements = self.read::<T>(path, request)?;
        let shape = request
            .iter()
            .map(|slice| usize::try_from(slice.stop - slice.start))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CfaError::InvalidArgument(err.to_string()))?;
        ndarray::ArrayD::from_shape_vec(shape, elements)
            .map_err(|err| CfaError::InvalidArgument(err.to_string()))
    }

    /// A textual summary of the dataset: its groups, dimensions and variables, and the partition matrix of each
    /// partitioned variable.
    #[must_use]
    pub fn info(&self) -> String {
        let mut info = format!(
            "dataset {} ({}, CFA-{})\n",
            self.uri, self.format, self.version
        );
        let mut lines = Vec::new();
        self.root
            .visit("", &mut |path: &str, group: &Group| lines.push(group_info(path, group)));
        info.push_str(&lines.concat());
        info
    }

    /// Close the dataset.
    ///
    /// In write modes the master file is written, with the partition matrix of each partitioned variable encoded
    /// with the convention version of the dataset.
    ///
    /// # Errors
    /// Returns a [`CfaError`] if the master file cannot be written.
    pub fn close(self) -> Result<(), CfaError> {
        if !self.mode.is_writable() {
            if let Some(master) = self.master.into_inner() {
                master.close()?;
            }
            return Ok(());
        }
        let schema = self.master_schema()?;
        let handle = self.context.open(&self.uri, OpenMode::Create)?;
        let mut master = self.context.array_file_backend().create(handle, schema)?;
        for (path, bytes) in &self.data {
            let (group, name) = split_path(path);
            if let Some(variable) = self.variable(path) {
                let subset = ArraySubset::new_with_shape(variable.shape.clone());
                master.write_region(group, name, &subset, bytes)?;
            }
        }
        master.close()?;
        self.context.invalidate(&self.uri)?;
        log::debug!("closed dataset {}", self.uri);
        Ok(())
    }

    fn master_schema(&self) -> Result<FileSchema, CfaError> {
        let mut schema = FileSchema::new(self.format);
        schema.root = self.group_schema(&self.root)?;
        if self.format.is_cfa() {
            let conventions = self
                .version
                .append_to_conventions(schema.root.attributes.get(CONVENTIONS).and_then(AttributeValue::as_str));
            schema
                .root
                .attributes
                .insert(CONVENTIONS.to_string(), conventions.into());
        }
        Ok(schema)
    }

    fn group_schema(&self, group: &Group) -> Result<GroupSchema, CfaError> {
        let mut schema = GroupSchema::new(&group.name);
        schema.attributes = group.attributes.clone();
        schema.dimensions = group
            .dimensions
            .iter()
            .map(|dimension| DimensionSchema {
                name: dimension.name.clone(),
                length: dimension.length,
            })
            .collect();
        for child in &group.groups {
            schema.groups.push(self.group_schema(child)?);
        }
        for variable in &group.variables {
            schema.variables.push(
                VariableSchema::new(&variable.name, variable.data_type, variable.dimensions.clone())
                    .with_attributes(variable.attributes.clone())
                    .with_allocated(!variable.is_partitioned()),
            );
            if variable.is_partitioned() {
                codec(self.version).encode(variable, &mut schema)?;
            }
        }
        Ok(schema)
    }
}

/// Build the group model of `group_schema` at `path`, decoding partition matrices.
fn build_group(
    schema: &FileSchema,
    group_schema: &GroupSchema,
    path: &str,
    declared: Option<CfaVersion>,
) -> Result<Group, CfaError> {
    let mut group = Group::new(&group_schema.name);
    group.attributes = group_schema.attributes.clone();
    let mut companions = Vec::new();

    for variable_schema in &group_schema.variables {
        let variable_path = join_path(path, &variable_schema.name);
        let shape = schema.variable_shape(path, &variable_schema.name)?;
        let partition_matrix = match detect(variable_schema)? {
            Some(version) => {
                if let Some(declared) = declared.filter(|&declared| declared != version) {
                    return Err(CfaError::UnsupportedCFAVersion(format!(
                        "variable {variable_path} is encoded as CFA-{version} in a CFA-{declared} dataset"
                    )));
                }
                if version == CfaVersion::V0_5 {
                    companions.push(
                        ncarray_metadata::v0_5::referenced_group(&variable_schema.attributes)?
                            .to_string(),
                    );
                }
                let matrix = codec(version)
                    .decode(variable_schema, group_schema, &shape)
                    .map_err(|err| match err {
                        CfaError::Metadata(MetadataError::PartitionIndex { index, reason }) => {
                            CfaError::PartitionIndexError {
                                variable: variable_path.clone(),
                                index,
                                reason,
                            }
                        }
                        err => err,
                    })?;
                Some(matrix)
            }
            None => None,
        };
        group.variables.push(Variable {
            name: variable_schema.name.clone(),
            data_type: variable_schema.data_type,
            dimensions: variable_schema.dimensions.clone(),
            shape,
            attributes: variable_schema
                .attributes
                .iter()
                .filter(|(name, _)| !is_encoding_attribute(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            partition_matrix,
        });
    }

    for dimension in &group_schema.dimensions {
        let coordinate = group_schema
            .variable(&dimension.name)
            .filter(|variable| variable.dimensions.len() == 1 && variable.dimensions[0] == dimension.name);
        let axis = coordinate
            .and_then(|variable| variable.attributes.get("axis"))
            .and_then(AttributeValue::as_str);
        group.dimensions.push(Dimension {
            name: dimension.name.clone(),
            length: dimension.length,
            axis: AxisRole::infer(&dimension.name, axis),
            data_type: coordinate.map(|variable| variable.data_type),
        });
    }

    for child in &group_schema.groups {
        if !companions.contains(&child.name) {
            group
                .groups
                .push(build_group(schema, child, &join_path(path, &child.name), declared)?);
        }
    }
    Ok(group)
}

fn group_info(path: &str, group: &Group) -> String {
    let mut info = String::new();
    let _ = writeln!(info, "group /{path}");
    for dimension in &group.dimensions {
        let length = dimension
            .length
            .map_or_else(|| "unlimited".to_string(), |length| length.to_string());
        let _ = writeln!(info, "  dimension {} = {length} ({})", dimension.name, dimension.axis);
    }
    for (name, value) in &group.attributes {
        let _ = writeln!(info, "  :{name} = {value}");
    }
    for variable in &group.variables {
        let _ = writeln!(
            info,
            "  variable {} {}({}) shape {:?}",
            variable.data_type,
            variable.name,
            variable.dimensions.join(", "),
            variable.shape
        );
        for (name, value) in &variable.attributes {
            let _ = writeln!(info, "    {}:{name} = {value}", variable.name);
        }
        if let Some(matrix) = &variable.partition_matrix {
            let _ = writeln!(
                info,
                "    cf_role = {}, pmshape = {:?}, pmdimensions = {:?}",
                variable.cf_role(),
                matrix.pmshape(),
                matrix.pmdimensions()
            );
            for partition in matrix.partitions().iter() {
                let _ = writeln!(
                    info,
                    "    partition {:?}: location {:?}, shape {:?}, file {}, ncvar {}, format {}",
                    partition.index,
                    partition.location,
                    partition.subarray.shape,
                    partition.subarray.file.as_deref().unwrap_or("-"),
                    partition.subarray.ncvar,
                    partition.subarray.format
                );
            }
        }
    }
    info
}

/// Copy `subset` out of the data of an array of `shape`.
fn extract(
    data: &[u8],
    shape: &[u64],
    subset: &ArraySubset,
    element_size: usize,
) -> Result<Vec<u8>, CfaError> {
    let mut bytes = Vec::with_capacity(subset.num_elements_usize() * element_size);
    for range in subset.iter_contiguous_byte_ranges(shape, element_size)? {
        #[allow(clippy::cast_possible_truncation)]
        let range = range.start as usize..range.end as usize;
        bytes.extend_from_slice(&data[range]);
    }
    Ok(bytes)
}

/// Copy `bytes` into `subset` of the data of an array of `shape`.
fn store(
    data: &mut [u8],
    shape: &[u64],
    subset: &ArraySubset,
    element_size: usize,
    bytes: &[u8],
) -> Result<(), CfaError> {
    let expected = subset.num_elements_usize() * element_size;
    if bytes.len() != expected {
        return Err(CfaError::InvalidArgument(format!(
            "expected {expected} bytes to write to {subset}, got {}",
            bytes.len()
        )));
    }
    let mut position = 0;
    for range in subset.iter_contiguous_byte_ranges(shape, element_size)? {
        #[allow(clippy::cast_possible_truncation)]
        let range = range.start as usize..range.end as usize;
        let length = range.len();
        data[range].copy_from_slice(&bytes[position..position + length]);
        position += length;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ncarray_storage::Config;

    use super::*;

    fn context() -> Arc<StorageContext> {
        Arc::new(StorageContext::new(Config::default()).unwrap())
    }

    #[test]
    fn dataset_plain_variables() {
        let context = context();
        let mut dataset = Dataset::create(&context, "memory://plain.nca", FileFormat::Netcdf4).unwrap();
        dataset.create_dimension("", "x", Some(4)).unwrap();
        dataset
            .create_variable(
                "",
                "v",
                DataType::Int32,
                &["x"],
                VariableOptions::new().with_attribute("_FillValue", -1i64),
            )
            .unwrap();
        assert!(!dataset.variable("v").unwrap().is_partitioned());
        assert_eq!(dataset.read::<i32>("v", &[(0..4).into()]).unwrap(), vec![-1; 4]);
        dataset.write::<i32>("v", &[(1..3).into()], &[5, 6]).unwrap();
        assert!(matches!(
            dataset.write::<f32>("v", &[(1..3).into()], &[5.0, 6.0]),
            Err(CfaError::IncompatibleElementType { .. })
        ));
        dataset.close().unwrap();

        let dataset = Dataset::open(&context, "memory://plain.nca", OpenMode::Read).unwrap();
        assert_eq!(
            dataset.read::<i32>("v", &[(0..4).into()]).unwrap(),
            vec![-1, 5, 6, -1]
        );
        assert!(dataset.attribute("", None, CONVENTIONS).is_none());
        dataset.close().unwrap();
    }

    #[test]
    fn dataset_coordinate_variables() {
        let context = context();
        let mut dataset = Dataset::create(&context, "memory://coords.nca", FileFormat::Cfa4).unwrap();
        dataset.create_dimension("", "height", Some(3)).unwrap();
        dataset.create_dimension("", "t", Some(4)).unwrap();
        assert_eq!(dataset.root().dimension("height").unwrap().axis, AxisRole::N);
        dataset
            .create_variable(
                "",
                "height",
                DataType::Float64,
                &["height"],
                VariableOptions::new().with_attribute("axis", "Z"),
            )
            .unwrap();
        dataset
            .create_variable("", "scalar", DataType::Float64, &[], VariableOptions::new())
            .unwrap();
        assert_eq!(dataset.root().dimension("height").unwrap().axis, AxisRole::Z);
        assert!(!dataset.variable("height").unwrap().is_partitioned());
        assert!(!dataset.variable("scalar").unwrap().is_partitioned());
        dataset
            .create_variable(
                "",
                "v",
                DataType::Float64,
                &["t", "height"],
                VariableOptions::new().with_max_object_size(24),
            )
            .unwrap();
        let matrix = dataset.variable("v").unwrap().partition_matrix.clone().unwrap();
        assert_eq!(matrix.pmshape(), &[4, 1]);
        assert_eq!(matrix.base(), "memory://coords");
    }

    #[test]
    fn dataset_errors() {
        let context = context();
        assert!(matches!(
            Dataset::create_with_version(&context, "memory://a.nca", FileFormat::Cfa3, CfaVersion::V0_5),
            Err(CfaError::IncompatibleFormat(_))
        ));
        let mut dataset = Dataset::create(&context, "memory://a.nca", FileFormat::Cfa3).unwrap();
        assert_eq!(dataset.version(), CfaVersion::V0_4);
        assert!(matches!(
            dataset.create_group("forecast"),
            Err(CfaError::IncompatibleFormat(_))
        ));
        dataset.create_dimension("", "time", None).unwrap();
        dataset.create_dimension("", "lat", Some(3)).unwrap();
        dataset.create_dimension("", "t", Some(2)).unwrap();
        dataset.create_dimension("", "level", Some(3)).unwrap();
        assert!(matches!(
            dataset.create_dimension("", "lat", Some(3)),
            Err(CfaError::AlreadyExists { .. })
        ));
        assert!(matches!(
            dataset.create_variable("", "v", DataType::Float32, &["time", "lat"], VariableOptions::new()),
            Err(CfaError::InvalidArgument(_))
        ));
        assert!(matches!(
            dataset.create_variable("", "v", DataType::Float32, &["lon"], VariableOptions::new()),
            Err(CfaError::NotFound { kind: "dimension", .. })
        ));
        assert!(matches!(
            dataset.create_variable(
                "",
                "v",
                DataType::Float32,
                &["t", "level"],
                VariableOptions::new().with_max_object_size(4)
            ),
            Err(CfaError::SplitConstraintUnsatisfiable { .. })
        ));
        assert!(matches!(
            dataset.set_attribute("", None, "cf_role", "cfa_variable"),
            Err(CfaError::InvalidArgument(_))
        ));
        assert!(matches!(
            Dataset::open(&context, "memory://missing.nca", OpenMode::Read),
            Err(CfaError::NotFound { kind: "dataset", .. })
        ));
    }
}
