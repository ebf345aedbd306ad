//! Array elements.

use ncarray_metadata::DataType;

/// A fixed size array element with a [`DataType`].
///
/// Elements are stored little endian.
pub trait Element: bytemuck::Pod + Send + Sync {
    /// The data type of the element.
    const DATA_TYPE: DataType;
}

macro_rules! impl_element {
    ($type:ty, $data_type:ident) => {
        impl Element for $type {
            const DATA_TYPE: DataType = DataType::$data_type;
        }
    };
}

impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
impl_element!(u16, UInt16);
impl_element!(u32, UInt32);
impl_element!(u64, UInt64);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

/// Convert elements to little endian bytes.
#[must_use]
pub fn elements_to_bytes<T: Element>(elements: &[T]) -> Vec<u8> {
    let mut bytes = bytemuck::cast_slice::<T, u8>(elements).to_vec();
    if cfg!(target_endian = "big") {
        reverse_endianness(&mut bytes, std::mem::size_of::<T>());
    }
    bytes
}

/// Convert little endian bytes to elements.
///
/// `bytes` must hold a whole number of elements.
#[must_use]
pub fn bytes_to_elements<T: Element>(mut bytes: Vec<u8>) -> Vec<T> {
    if cfg!(target_endian = "big") {
        reverse_endianness(&mut bytes, std::mem::size_of::<T>());
    }
    let mut elements = vec![T::zeroed(); bytes.len() / std::mem::size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut elements).copy_from_slice(&bytes);
    elements
}

fn reverse_endianness(bytes: &mut [u8], size: usize) {
    if size > 1 {
        for element in bytes.chunks_exact_mut(size) {
            element.reverse();
        }
    }
}

/// Convert a fill value to the little endian bytes of one element of `data_type`.
///
/// Values are converted with `as` casts, so out of range values saturate.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fill_value_bytes(data_type: DataType, value: f64) -> Vec<u8> {
    match data_type {
        DataType::Int8 => (value as i8).to_le_bytes().to_vec(),
        DataType::Int16 => (value as i16).to_le_bytes().to_vec(),
        DataType::Int32 => (value as i32).to_le_bytes().to_vec(),
        DataType::Int64 => (value as i64).to_le_bytes().to_vec(),
        DataType::UInt8 => (value as u8).to_le_bytes().to_vec(),
        DataType::UInt16 => (value as u16).to_le_bytes().to_vec(),
        DataType::UInt32 => (value as u32).to_le_bytes().to_vec(),
        DataType::UInt64 => (value as u64).to_le_bytes().to_vec(),
        DataType::Float32 => (value as f32).to_le_bytes().to_vec(),
        DataType::Float64 => value.to_le_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_bytes() {
        let elements = [1.5f32, -2.0, 3.25];
        let bytes = elements_to_bytes(&elements);
        assert_eq!(&bytes[..4], &1.5f32.to_le_bytes());
        assert_eq!(bytes_to_elements::<f32>(bytes), elements);
        assert_eq!(<u16 as Element>::DATA_TYPE, DataType::UInt16);
    }

    #[test]
    fn fill_values() {
        assert_eq!(fill_value_bytes(DataType::Int16, -1.0), vec![0xff, 0xff]);
        assert_eq!(fill_value_bytes(DataType::Float64, 1e20), 1e20f64.to_le_bytes());
        assert_eq!(fill_value_bytes(DataType::UInt8, 7.0), vec![7]);
    }
}
