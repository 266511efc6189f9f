//! Element data formats understood by the unpacker and packer.

use std::str::FromStr;

/// Element data format of a buffer or circular buffer page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// IEEE-754 binary32.
    Float32,
    /// 32-bit unsigned integer.
    UInt32,
    /// 32-bit two's complement integer.
    Int32,
}

impl DataFormat {
    /// Every supported format.
    pub const ALL: [Self; 3] = [Self::Float32, Self::UInt32, Self::Int32];

    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::Float32 | Self::UInt32 | Self::Int32 => 4,
        }
    }

    /// Short name (`f32`, `u32`, `i32`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Float32 => "f32",
            Self::UInt32 => "u32",
            Self::Int32 => "i32",
        }
    }

    /// True for floating point formats.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32)
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a format name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat(pub String);

impl std::fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown data format '{}' (expected f32, u32 or i32)", self.0)
    }
}

impl std::error::Error for UnknownFormat {}

impl FromStr for DataFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" | "fp32" => Ok(Self::Float32),
            "u32" | "uint32" => Ok(Self::UInt32),
            "i32" | "int32" => Ok(Self::Int32),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}
