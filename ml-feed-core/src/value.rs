//! Per-sample values flowing through transform graphs and queues

use std::collections::BTreeMap;
use std::fmt;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, FieldTemplate};

/// Named values of one sample, ordered by name
pub type Record = BTreeMap<String, Value>;

/// Typed contiguous storage of a dense array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    /// u8 elements
    UInt8(Vec<u8>),
    /// i32 elements
    Int32(Vec<i32>),
    /// i64 elements
    Int64(Vec<i64>),
    /// f32 elements
    Float32(Vec<f32>),
    /// f64 elements
    Float64(Vec<f64>),
}

macro_rules! for_each_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::UInt8($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
        }
    };
}

impl ArrayData {
    /// Zero-filled storage of the given type and length
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::UInt8 => ArrayData::UInt8(vec![0; len]),
            DataType::Int32 => ArrayData::Int32(vec![0; len]),
            DataType::Int64 => ArrayData::Int64(vec![0; len]),
            DataType::Float32 => ArrayData::Float32(vec![0.0; len]),
            DataType::Float64 => ArrayData::Float64(vec![0.0; len]),
        }
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::UInt8(_) => DataType::UInt8,
            ArrayData::Int32(_) => DataType::Int32,
            ArrayData::Int64(_) => DataType::Int64,
            ArrayData::Float32(_) => DataType::Float32,
            ArrayData::Float64(_) => DataType::Float64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        for_each_data!(self, v => v.len())
    }

    /// Whether the storage is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View the elements as raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        for_each_data!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// Decode storage of `dtype` from raw bytes.
    ///
    /// The bytes need not be aligned for the element type.
    pub fn from_bytes(dtype: DataType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % dtype.size_bytes() != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }
        Ok(match dtype {
            DataType::UInt8 => ArrayData::UInt8(bytes.to_vec()),
            DataType::Int32 => ArrayData::Int32(collect::<i32>(bytes)),
            DataType::Int64 => ArrayData::Int64(collect::<i64>(bytes)),
            DataType::Float32 => ArrayData::Float32(collect::<f32>(bytes)),
            DataType::Float64 => ArrayData::Float64(collect::<f64>(bytes)),
        })
    }

    /// Elements converted to f32
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            ArrayData::UInt8(v) => v.iter().map(|&x| f32::from(x)).collect(),
            ArrayData::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::Int64(v) => v.iter().map(|&x| x as f32).collect(),
            ArrayData::Float32(v) => v.clone(),
            ArrayData::Float64(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    fn extend_from(&mut self, other: &ArrayData) -> bool {
        match (self, other) {
            (ArrayData::UInt8(a), ArrayData::UInt8(b)) => a.extend_from_slice(b),
            (ArrayData::Int32(a), ArrayData::Int32(b)) => a.extend_from_slice(b),
            (ArrayData::Int64(a), ArrayData::Int64(b)) => a.extend_from_slice(b),
            (ArrayData::Float32(a), ArrayData::Float32(b)) => a.extend_from_slice(b),
            (ArrayData::Float64(a), ArrayData::Float64(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

fn collect<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(bytes)
}

/// A dense, row-major array with a fixed shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    shape: Vec<usize>,
    data: ArrayData,
}

impl ArrayValue {
    /// Create an array, checking that the data fills the shape exactly
    pub fn new(shape: impl Into<Vec<usize>>, data: ArrayData) -> Result<Self> {
        let shape = shape.into();
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "data length {} does not match shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    /// Zero-filled array for a template
    pub fn zeros(template: &FieldTemplate) -> Self {
        Self {
            shape: template.shape.clone(),
            data: ArrayData::zeros(template.dtype, template.num_elements()),
        }
    }

    /// Build an f32 array
    pub fn from_f32(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self> {
        Self::new(shape, ArrayData::Float32(data))
    }

    /// Shape of the array
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Underlying storage
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Consume the array, returning its storage
    pub fn into_data(self) -> ArrayData {
        self.data
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The template this array satisfies
    pub fn template(&self) -> FieldTemplate {
        FieldTemplate::new(self.shape.clone(), self.dtype())
    }

    /// Whether this array exactly matches a template
    pub fn matches(&self, template: &FieldTemplate) -> bool {
        self.dtype() == template.dtype && self.shape == template.shape
    }

    /// Raw bytes of the elements
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Rebuild an array of `template` from raw bytes
    pub fn from_bytes(template: &FieldTemplate, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != template.byte_count() {
            return Err(Error::shape_mismatch(
                "<bytes>",
                format!("{} bytes", template.byte_count()),
                format!("{} bytes", bytes.len()),
            ));
        }
        Ok(Self {
            shape: template.shape.clone(),
            data: ArrayData::from_bytes(template.dtype, bytes)?,
        })
    }

    /// Same elements converted to f32
    pub fn to_f32(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            data: ArrayData::Float32(self.data.to_f32()),
        }
    }

    /// Stack same-shaped arrays along a new leading dimension
    pub fn stack<'a>(field: &str, items: impl IntoIterator<Item = &'a ArrayValue>) -> Result<Self> {
        let mut items = items.into_iter();
        let Some(first) = items.next() else {
            return Err(Error::InvalidArgument(format!("cannot stack zero arrays for '{field}'")));
        };

        let template = first.template();
        let mut data = first.data.clone();
        let mut count = 1;
        for item in items {
            if !item.matches(&template) || !data.extend_from(&item.data) {
                return Err(Error::shape_mismatch(field, &template, item.template()));
            }
            count += 1;
        }

        Ok(Self {
            shape: template.batched(count).shape,
            data,
        })
    }
}

/// A single value of one field of one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Dense array
    Array(ArrayValue),
    /// Integer scalar
    Int(i64),
    /// Float scalar
    Float(f64),
    /// Text (paths, ids, ...)
    Text(String),
    /// Ordered list, used for composite draws and ragged data
    List(Vec<Value>),
}

impl Value {
    /// Borrow the array, if this is one
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Borrow the text, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// View numeric values as a dense array; scalars become 0-d arrays
    pub fn to_array(&self) -> Option<ArrayValue> {
        match self {
            Value::Array(array) => Some(array.clone()),
            Value::Int(v) => Some(ArrayValue {
                shape: Vec::new(),
                data: ArrayData::Int64(vec![*v]),
            }),
            Value::Float(v) => Some(ArrayValue {
                shape: Vec::new(),
                data: ArrayData::Float64(vec![*v]),
            }),
            Value::Text(_) | Value::List(_) => None,
        }
    }

    /// Short kind name, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Array(_) => "array",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
        }
    }
}

impl From<ArrayValue> for Value {
    fn from(array: ArrayValue) -> Self {
        Value::Array(array)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Array(array) => write!(f, "array{}", array.template()),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::List(items) => write!(f, "list[{}]", items.len()),
        }
    }
}
