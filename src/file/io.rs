//! Low-level byte order and safe reading/writing utilities.
//!
//! This module provides endian-aware, bounds-checked primitive access to byte buffers. It is the
//! foundation for the cursor types in [`crate::file::parser`] and [`crate::file::writer`] and for
//! the LEB128 helpers used when re-encoding WebAssembly modules.
//!
//! # Key Components
//!
//! - [`crate::file::io::BinIO`] - Trait defining endian-aware conversions for primitive types
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Little-endian reads
//! - [`crate::file::io::read_be_at`] - Big-endian reads
//! - [`crate::file::io::write_le_at`] / [`crate::file::io::write_be_at`] - Bounds-checked writes
//! - [`crate::file::io::write_uleb128`] / [`crate::file::io::write_sleb128`] - Variable-length
//!   integer encoding onto growable buffers
//!
//! # Examples
//!
//! ```rust
//! use webmodkit::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x0201u16)?;
//! write_le_at(&mut data, &mut offset, 0x0605_0403u32)?;
//!
//! offset = 0;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 0x0201);
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 0x0605_0403);
//! # Ok::<(), webmodkit::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All reading and writing functions return [`crate::Result<T>`] and report
//! [`crate::Error::OutOfBounds`] if there are insufficient bytes in the buffer.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data reading and writing operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait BinIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_bin_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BinIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_bin_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: BinIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: BinIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let bytes = take::<T>(data, offset)?;
    Ok(T::from_le_bytes(bytes))
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: BinIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let bytes = take::<T>(data, offset)?;
    Ok(T::from_be_bytes(bytes))
}

fn take<T: BinIO>(data: &[u8], offset: &mut usize) -> Result<T::Bytes> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(read)
}

/// Safely writes a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small to hold the value.
pub fn write_le_at<T: BinIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    put(data, offset, value.to_le_bytes().as_ref())
}

/// Safely writes a value of type `T` in big-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small to hold the value.
pub fn write_be_at<T: BinIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    put(data, offset, value.to_be_bytes().as_ref())
}

fn put(data: &mut [u8], offset: &mut usize, bytes: &[u8]) -> Result<()> {
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

/// Appends `value` as unsigned LEB128 to `out`.
///
/// # Examples
///
/// ```rust
/// use webmodkit::file::io::write_uleb128;
///
/// let mut out = Vec::new();
/// write_uleb128(&mut out, 624_485);
/// assert_eq!(out, [0xE5, 0x8E, 0x26]);
/// ```
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Appends `value` as signed LEB128 to `out`.
pub fn write_sleb128(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Returns the unsigned LEB128 encoding of a `u32`.
#[must_use]
pub fn uleb128_bytes(value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    write_uleb128(&mut out, u64::from(value));
    out
}
