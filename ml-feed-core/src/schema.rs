//! Element types and fixed per-sample field templates

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a dense array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 8-bit unsigned integer
    UInt8,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 32-bit floating point
    Float32,

    /// 64-bit floating point
    Float64,
}

impl DataType {
    /// Get the size of this type in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::UInt8 => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }

    /// Whether this is a floating point type
    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::UInt8 => "u8",
            DataType::Int32 => "i32",
            DataType::Int64 => "i64",
            DataType::Float32 => "f32",
            DataType::Float64 => "f64",
        };
        f.write_str(name)
    }
}

/// Fixed shape and element type of one field of one sample
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldTemplate {
    /// Per-sample shape (no batch dimension)
    pub shape: Vec<usize>,

    /// Element type
    pub dtype: DataType,
}

impl FieldTemplate {
    /// Create a new template
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DataType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    /// Number of elements described by the template
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of bytes needed to hold one sample of this field
    pub fn byte_count(&self) -> usize {
        self.num_elements() * self.dtype.size_bytes()
    }

    /// The template with a leading batch dimension
    pub fn batched(&self, batch_size: usize) -> Self {
        let mut shape = Vec::with_capacity(self.shape.len() + 1);
        shape.push(batch_size);
        shape.extend_from_slice(&self.shape);
        Self {
            shape,
            dtype: self.dtype,
        }
    }
}

impl fmt::Display for FieldTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}
