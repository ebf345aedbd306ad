//! The `NcaFile` array file format.
//!
//! An `NcaFile` is laid out as
//!  - the magic bytes `NCA\x01`,
//!  - the header length as a little endian `u64`,
//!  - a JSON header holding the [`FileSchema`] and the byte extent of each allocated variable,
//!  - the variable data, each variable stored contiguously in C order as little endian elements.
//!
//! The header is written once at creation, so the schema of an existing file cannot change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ncarray_partition::ArraySubset;
use ncarray_storage::StorageHandle;

use super::{
    join_path, ArrayFileBackend, ArrayFileError, ArrayFileTraits, FileSchema, VariableSchema,
};
use crate::element::fill_value_bytes;

const MAGIC: &[u8; 4] = b"NCA\x01";

const PREFIX_SIZE: u64 = 12;

/// Fill writes are issued in blocks of at most this many bytes.
const FILL_BLOCK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug)]
struct Header {
    schema: FileSchema,
    /// `[offset, length]` of each allocated variable, keyed by its path, relative to the start of the data.
    extents: BTreeMap<String, [u64; 2]>,
}

/// The [`NcaFile`] backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NcaFileBackend;

impl NcaFileBackend {
    /// Create a new [`NcaFile`] backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ArrayFileBackend for NcaFileBackend {
    fn create(
        &self,
        handle: StorageHandle,
        schema: FileSchema,
    ) -> Result<Box<dyn ArrayFileTraits>, ArrayFileError> {
        Ok(Box::new(NcaFile::create(handle, schema)?))
    }

    fn open(&self, handle: StorageHandle) -> Result<Box<dyn ArrayFileTraits>, ArrayFileError> {
        Ok(Box::new(NcaFile::open(handle)?))
    }
}

/// An open `NcaFile`.
#[derive(Debug)]
pub struct NcaFile {
    handle: StorageHandle,
    header: Header,
    data_start: u64,
}

fn fill_block(variable: &VariableSchema) -> Vec<u8> {
    let element = fill_value_bytes(variable.data_type, variable.fill_value().unwrap_or_default());
    let repeats = (FILL_BLOCK_SIZE / element.len()).max(1);
    element.repeat(repeats)
}

impl NcaFile {
    /// Create a file with `schema` on `handle`, which must be writable.
    ///
    /// Every allocated variable is initialised to its `_FillValue`, or zero.
    ///
    /// # Errors
    /// Returns an [`ArrayFileError`] if an allocated variable has an unlimited dimension, or there is a storage error.
    pub fn create(mut handle: StorageHandle, schema: FileSchema) -> Result<Self, ArrayFileError> {
        let mut extents = BTreeMap::new();
        let mut offset = 0;
        for (group, variable) in schema.allocated_variables() {
            let shape = schema.variable_shape(&group, &variable.name)?;
            let length = shape.iter().product::<u64>() * variable.data_type.size() as u64;
            extents.insert(join_path(&group, &variable.name), [offset, length]);
            offset += length;
        }
        let header = Header { schema, extents };
        let header_bytes = serde_json::to_vec(&header)?;
        let data_start = PREFIX_SIZE + header_bytes.len() as u64;

        handle.write_at(0, MAGIC)?;
        handle.write_at(4, &(header_bytes.len() as u64).to_le_bytes())?;
        handle.write_at(PREFIX_SIZE, &header_bytes)?;
        for (group, variable) in header.schema.allocated_variables() {
            let [offset, length] = header.extents[&join_path(&group, &variable.name)];
            let block = fill_block(variable);
            let mut written = 0;
            while written < length {
                let n = std::cmp::min(block.len() as u64, length - written);
                #[allow(clippy::cast_possible_truncation)]
                handle.write_at(data_start + offset + written, &block[..n as usize])?;
                written += n;
            }
        }
        log::debug!(
            "created {} with {} variables ({} data bytes)",
            handle.uri(),
            header.extents.len(),
            offset
        );

        Ok(Self {
            handle,
            header,
            data_start,
        })
    }

    /// Open the file on `handle`.
    ///
    /// # Errors
    /// Returns [`ArrayFileError::InvalidHeader`] if the file is not an `NcaFile`, or a storage error.
    pub fn open(mut handle: StorageHandle) -> Result<Self, ArrayFileError> {
        let uri = handle.uri().to_string();
        let invalid = |reason: &str| ArrayFileError::InvalidHeader {
            uri: uri.clone(),
            reason: reason.to_string(),
        };
        if handle.size()? < PREFIX_SIZE {
            return Err(invalid("file is too small"));
        }
        let prefix = handle.read_at(0, PREFIX_SIZE)?;
        if &prefix[..4] != MAGIC {
            return Err(invalid("bad magic bytes"));
        }
        let mut length = [0; 8];
        length.copy_from_slice(&prefix[4..]);
        let length = u64::from_le_bytes(length);
        let header_bytes = handle.read_at(PREFIX_SIZE, length)?;
        let header: Header = serde_json::from_slice(&header_bytes)?;
        Ok(Self {
            handle,
            header,
            data_start: PREFIX_SIZE + length,
        })
    }

    /// Returns the extent, shape and element size of an allocated variable.
    fn locate(
        &self,
        group: &str,
        variable: &str,
    ) -> Result<(u64, Vec<u64>, usize), ArrayFileError> {
        let path = join_path(group, variable);
        let schema = &self.header.schema;
        let variable_schema =
            schema
                .variable(group, variable)
                .ok_or_else(|| ArrayFileError::NotFound {
                    kind: "variable",
                    name: path.clone(),
                })?;
        let [offset, _] = self
            .header
            .extents
            .get(&path)
            .ok_or_else(|| ArrayFileError::NotFound {
                kind: "variable data",
                name: path.clone(),
            })?;
        let shape = schema.variable_shape(group, variable)?;
        Ok((
            self.data_start + offset,
            shape,
            variable_schema.data_type.size(),
        ))
    }
}

impl ArrayFileTraits for NcaFile {
    fn uri(&self) -> &str {
        self.handle.uri()
    }

    fn schema(&self) -> &FileSchema {
        &self.header.schema
    }

    fn read_region(
        &mut self,
        group: &str,
        variable: &str,
        subset: &ArraySubset,
    ) -> Result<Vec<u8>, ArrayFileError> {
        let (offset, shape, element_size) = self.locate(group, variable)?;
        let mut bytes = Vec::with_capacity(subset.num_elements_usize() * element_size);
        for range in subset.iter_contiguous_byte_ranges(&shape, element_size)? {
            bytes.extend_from_slice(&self.handle.read_at(offset + range.start, range.end - range.start)?);
        }
        Ok(bytes)
    }

    fn write_region(
        &mut self,
        group: &str,
        variable: &str,
        subset: &ArraySubset,
        bytes: &[u8],
    ) -> Result<(), ArrayFileError> {
        let (offset, shape, element_size) = self.locate(group, variable)?;
        let expected = subset.num_elements_usize() * element_size;
        if bytes.len() != expected {
            return Err(ArrayFileError::UnexpectedLength {
                variable: join_path(group, variable),
                expected,
                got: bytes.len(),
            });
        }
        let mut position = 0;
        for range in subset.iter_contiguous_byte_ranges(&shape, element_size)? {
            #[allow(clippy::cast_possible_truncation)]
            let length = (range.end - range.start) as usize;
            self.handle
                .write_at(offset + range.start, &bytes[position..position + length])?;
            position += length;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), ArrayFileError> {
        Ok(self.handle.close()?)
    }
}

#[cfg(test)]
mod tests {
    use ncarray_metadata::{AttributeValue, DataType, FileFormat};
    use ncarray_storage::{store::MemoryBackend, OpenMode, StorageBackendTraits};

    use super::*;

    fn schema() -> FileSchema {
        let mut schema = FileSchema::new(FileFormat::Netcdf4);
        schema.create_dimension("", "y", Some(3)).unwrap();
        schema.create_dimension("", "x", Some(4)).unwrap();
        schema
            .create_variable(
                "",
                VariableSchema::new("a", DataType::UInt16, vec!["y".into(), "x".into()]),
            )
            .unwrap();
        let mut b = VariableSchema::new("b", DataType::Float32, vec!["x".into()]);
        b.attributes
            .insert("_FillValue".to_string(), AttributeValue::Float(-1.0));
        schema.create_variable("", b).unwrap();
        schema
            .create_variable(
                "",
                VariableSchema::new("c", DataType::Float64, vec!["y".into(), "x".into()])
                    .with_allocated(false),
            )
            .unwrap();
        schema
    }

    #[test]
    fn nca_file_create_read_write() {
        let backend = MemoryBackend::new();
        let handle = backend.open("memory://test.nca", OpenMode::Create).unwrap();
        let mut file = NcaFile::create(handle, schema()).unwrap();

        // fill values
        assert_eq!(
            file.read_region("", "a", &ArraySubset::new_with_shape(vec![3, 4]))
                .unwrap(),
            vec![0; 24]
        );
        assert_eq!(
            file.read_region("", "b", &ArraySubset::new_with_ranges(&[1..2]))
                .unwrap(),
            (-1.0f32).to_le_bytes()
        );

        let region = ArraySubset::new_with_ranges(&[1..3, 1..3]);
        let values: Vec<u8> = [1u16, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        file.write_region("", "a", &region, &values).unwrap();
        assert!(file.write_region("", "a", &region, &values[..4]).is_err());
        assert!(file
            .read_region("", "a", &ArraySubset::new_with_ranges(&[0..4, 0..1]))
            .is_err());
        assert!(matches!(
            file.read_region("", "c", &ArraySubset::new_with_shape(vec![1, 1])),
            Err(ArrayFileError::NotFound { .. })
        ));
        Box::new(file).close().unwrap();

        let handle = backend.open("memory://test.nca", OpenMode::Read).unwrap();
        let mut file = NcaFile::open(handle).unwrap();
        assert_eq!(file.schema(), &schema());
        let row: Vec<u8> = [0u16, 3, 4, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(
            file.read_region("", "a", &ArraySubset::new_with_ranges(&[2..3, 0..4]))
                .unwrap(),
            row
        );
        assert!(matches!(
            file.write_region("", "a", &region, &values),
            Err(ArrayFileError::Storage(_))
        ));
    }

    #[test]
    fn nca_file_invalid() {
        let backend = MemoryBackend::new();
        let mut handle = backend.open("memory://bad.nca", OpenMode::Create).unwrap();
        handle.write(b"CDF\x01\0\0\0\0\0\0\0\0").unwrap();
        handle.close().unwrap();
        let handle = backend.open("memory://bad.nca", OpenMode::Read).unwrap();
        assert!(matches!(
            NcaFile::open(handle),
            Err(ArrayFileError::InvalidHeader { .. })
        ));
    }
}
