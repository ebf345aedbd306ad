//! Byte ranges.
//!
//! A [`ByteRange`] is an offset and length within an object, checked against the object size before it is read.
//!
//! [`part_byte_ranges`] splits a range into fixed size parts for multipart transfers, and [`reassemble_parts`]
//! concatenates parts that arrive in any order back into a contiguous buffer by their offsets.

use std::ops::Range;

use thiserror::Error;

/// A byte offset.
pub type ByteOffset = u64;

/// A byte length.
pub type ByteLength = u64;

/// A byte range from the start of an object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ByteRange {
    offset: ByteOffset,
    length: ByteLength,
}

impl ByteRange {
    /// Create a new byte range of `length` bytes at `offset`.
    #[must_use]
    pub const fn new(offset: ByteOffset, length: ByteLength) -> Self {
        Self { offset, length }
    }

    /// The offset of the byte range.
    #[must_use]
    pub const fn offset(&self) -> ByteOffset {
        self.offset
    }

    /// The length of the byte range.
    #[must_use]
    pub const fn length(&self) -> ByteLength {
        self.length
    }

    /// The exclusive end of the byte range.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Convert the byte range to a [`Range<u64>`].
    #[must_use]
    pub const fn to_range(&self) -> Range<u64> {
        self.offset..self.end()
    }

    /// Validate the byte range against an object of `size` bytes.
    ///
    /// # Errors
    /// Returns [`InvalidByteRangeError`] if the byte range extends beyond `size`.
    pub fn validate(self, size: u64) -> Result<Range<u64>, InvalidByteRangeError> {
        if self.end() <= size {
            Ok(self.to_range())
        } else {
            Err(InvalidByteRangeError::new(self, size))
        }
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

/// An invalid byte range error.
#[derive(Copy, Clone, Debug, Error)]
#[error("invalid byte range {0} for bytes of length {1}")]
pub struct InvalidByteRangeError(ByteRange, u64);

impl InvalidByteRangeError {
    /// Create a new [`InvalidByteRangeError`].
    #[must_use]
    pub fn new(byte_range: ByteRange, bytes_len: u64) -> Self {
        Self(byte_range, bytes_len)
    }
}

/// Split `range` into consecutive parts of at most `part_size` bytes.
///
/// The final part holds the remainder. An empty range produces no parts.
///
/// # Panics
/// Panics if `part_size` is zero.
#[must_use]
pub fn part_byte_ranges(range: Range<u64>, part_size: u64) -> Vec<Range<u64>> {
    assert!(part_size > 0, "part size must be non-zero");
    let mut parts = Vec::new();
    let mut start = range.start;
    while start < range.end {
        let end = std::cmp::min(start + part_size, range.end);
        parts.push(start..end);
        start = end;
    }
    parts
}

/// Concatenate `parts` into a buffer of `length` bytes, placing each part at its offset relative to `base`.
///
/// Parts may be supplied in any order, such as the order in which concurrent transfers completed.
///
/// # Errors
/// Returns [`InvalidByteRangeError`] if a part lies outside of the buffer, or if the parts do not cover the buffer exactly.
pub fn reassemble_parts(
    base: u64,
    length: usize,
    parts: impl IntoIterator<Item = (u64, bytes::Bytes)>,
) -> Result<Vec<u8>, InvalidByteRangeError> {
    let mut parts = parts.into_iter().collect::<Vec<_>>();
    parts.sort_by_key(|(offset, _)| *offset);

    // Parts must tile the output exactly
    let mut expected = base;
    for (offset, bytes) in &parts {
        let part_range = ByteRange::new(*offset, bytes.len() as u64);
        if *offset != expected || offset + bytes.len() as u64 > base + length as u64 {
            return Err(InvalidByteRangeError::new(
                part_range,
                base + length as u64,
            ));
        }
        expected += bytes.len() as u64;
    }
    if expected != base + length as u64 {
        return Err(InvalidByteRangeError::new(
            ByteRange::new(base, expected - base),
            base + length as u64,
        ));
    }

    let mut out = Vec::with_capacity(length);
    for (_, bytes) in &parts {
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_ranges() {
        let byte_range = ByteRange::new(1, 5);
        assert_eq!(byte_range.to_range(), 1..6);
        assert_eq!(byte_range.end(), 6);
        assert_eq!(byte_range.to_string(), "1..6");
        assert_eq!(byte_range.validate(6).unwrap(), 1..6);
        assert_eq!(ByteRange::new(6, 0).validate(6).unwrap(), 6..6);
        assert_eq!(
            ByteRange::new(1, 4).validate(3).unwrap_err().to_string(),
            "invalid byte range 1..5 for bytes of length 3"
        );
    }

    #[test]
    fn parts() {
        assert_eq!(part_byte_ranges(0..10, 4), vec![0..4, 4..8, 8..10]);
        assert_eq!(part_byte_ranges(3..7, 10), vec![3..7]);
        assert!(part_byte_ranges(5..5, 4).is_empty());
    }

    #[test]
    fn parts_reassemble_out_of_order() {
        let parts = vec![
            (18, bytes::Bytes::from_static(&[8, 9])),
            (10, bytes::Bytes::from_static(&[0, 1, 2, 3])),
            (14, bytes::Bytes::from_static(&[4, 5, 6, 7])),
        ];
        let out = reassemble_parts(10, 10, parts).unwrap();
        assert_eq!(out, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn parts_reassemble_gap() {
        let parts = vec![
            (0, bytes::Bytes::from_static(&[0, 1])),
            (3, bytes::Bytes::from_static(&[3])),
        ];
        assert!(reassemble_parts(0, 4, parts).is_err());
        let parts = vec![(0, bytes::Bytes::from_static(&[0, 1]))];
        assert!(reassemble_parts(0, 4, parts).is_err());
    }
}
