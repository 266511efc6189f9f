//! Element types the pipeline can stream.
//!
//! An [`Element`] is a fixed-width plain-old-data value with a matching
//! [`DataFormat`]. Arithmetic follows the representation as-is: integers wrap,
//! floats follow IEEE-754. There is no saturation.

use bytemuck::Pod;
use std::fmt::Debug;
use wormflow_chip::format::DataFormat;

/// A fixed-width numeric element.
pub trait Element: Pod + PartialEq + Debug + Send + Sync + 'static {
    /// Device data format for this element type
    const FORMAT: DataFormat;

    /// Size in bytes
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Elementwise addition
    #[must_use]
    fn elt_add(self, rhs: Self) -> Self;

    /// Elementwise subtraction
    #[must_use]
    fn elt_sub(self, rhs: Self) -> Self;

    /// Elementwise multiplication
    #[must_use]
    fn elt_mul(self, rhs: Self) -> Self;

    /// Convert a host index into an element (wrapping for narrow types)
    fn from_usize(value: usize) -> Self;
}

impl Element for f32 {
    const FORMAT: DataFormat = DataFormat::Float32;

    fn elt_add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn elt_sub(self, rhs: Self) -> Self {
        self - rhs
    }

    fn elt_mul(self, rhs: Self) -> Self {
        self * rhs
    }

    #[allow(clippy::cast_precision_loss)]
    fn from_usize(value: usize) -> Self {
        value as f32
    }
}

impl Element for u32 {
    const FORMAT: DataFormat = DataFormat::UInt32;

    fn elt_add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }

    fn elt_sub(self, rhs: Self) -> Self {
        self.wrapping_sub(rhs)
    }

    fn elt_mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_usize(value: usize) -> Self {
        value as u32
    }
}

impl Element for i32 {
    const FORMAT: DataFormat = DataFormat::Int32;

    fn elt_add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }

    fn elt_sub(self, rhs: Self) -> Self {
        self.wrapping_sub(rhs)
    }

    fn elt_mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn from_usize(value: usize) -> Self {
        value as i32
    }
}

/// Decode native-endian element bytes into a vector.
///
/// `bytes.len()` must be a multiple of `E::SIZE`; trailing bytes are ignored.
pub(crate) fn decode<E: Element>(bytes: &[u8]) -> Vec<E> {
    bytes
        .chunks_exact(E::SIZE)
        .map(bytemuck::pod_read_unaligned::<E>)
        .collect()
}

/// View a slice of elements as raw bytes.
pub(crate) fn encode<E: Element>(values: &[E]) -> &[u8] {
    bytemuck::cast_slice(values)
}
