//! Batch assembly and per-field packing

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sampler::SampleIndex;
use crate::value::{ArrayValue, Record, Value};

/// How one field of a batch is packed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Packer {
    /// Keep the per-sample values as an ordered list
    #[default]
    List,

    /// Stack into a native dense array, keeping the element type
    Array,

    /// Stack into a dense f32 tensor for a training framework.
    ///
    /// A batch containing a tensor field must pack every field as a tensor.
    Tensor,
}

impl Packer {
    /// Whether the packer produces a dense array
    pub fn is_dense(self) -> bool {
        !matches!(self, Packer::List)
    }
}

/// One packed field of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum PackedField {
    /// Ordered per-sample values
    List(Vec<Value>),
    /// Native stacked array, leading dimension is the batch
    Array(ArrayValue),
    /// Stacked f32 tensor, leading dimension is the batch
    Tensor(ArrayValue),
}

impl PackedField {
    /// Number of samples in the field
    pub fn len(&self) -> usize {
        match self {
            PackedField::List(values) => values.len(),
            PackedField::Array(array) | PackedField::Tensor(array) => {
                array.shape().first().copied().unwrap_or(0)
            }
        }
    }

    /// Whether the field holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The dense array, if the field was packed densely
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            PackedField::List(_) => None,
            PackedField::Array(array) | PackedField::Tensor(array) => Some(array),
        }
    }

    /// The per-sample values, if the field was packed as a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            PackedField::List(values) => Some(values),
            _ => None,
        }
    }
}

/// Per-field packer choice, validated against the fields it will see
#[derive(Debug, Clone)]
pub struct PackingPlan {
    packers: BTreeMap<String, Packer>,
    default: Packer,
}

impl PackingPlan {
    /// Validate packers for the given output fields.
    ///
    /// Fails with [`Error::IncompatiblePacking`] when a tensor-packed field
    /// would share a batch with a non-tensor field.
    pub fn new(packers: BTreeMap<String, Packer>, default: Packer, fields: &[String]) -> Result<Self> {
        if let Some(unknown) = packers.keys().find(|name| !fields.contains(name)) {
            return Err(Error::Construction(format!(
                "packer configured for unknown field '{unknown}'"
            )));
        }

        let plan = Self { packers, default };
        let tensor = fields.iter().find(|f| plan.packer(f) == Packer::Tensor);
        let other = fields.iter().find(|f| plan.packer(f) != Packer::Tensor);
        if let (Some(tensor), Some(other)) = (tensor, other) {
            return Err(Error::IncompatiblePacking(format!(
                "'{}' is packed as a tensor but '{}' is packed as {:?}",
                tensor,
                other,
                plan.packer(other)
            )));
        }
        Ok(plan)
    }

    /// Packer for a field
    pub fn packer(&self, field: &str) -> Packer {
        self.packers.get(field).copied().unwrap_or(self.default)
    }

    /// Whether every one of `fields` is packed densely
    pub fn all_dense<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> bool {
        fields.into_iter().all(|field| self.packer(field).is_dense())
    }

    /// Pack the ordered values of one field
    pub fn pack(&self, field: &str, values: Vec<Value>) -> Result<PackedField> {
        let packer = self.packer(field);
        if !packer.is_dense() {
            return Ok(PackedField::List(values));
        }

        let arrays = values
            .iter()
            .map(|value| {
                value
                    .to_array()
                    .ok_or_else(|| Error::shape_mismatch(field, "numeric value", value.kind()))
            })
            .collect::<Result<Vec<_>>>()?;
        let stacked = ArrayValue::stack(field, &arrays)?;

        Ok(match packer {
            Packer::Tensor => PackedField::Tensor(stacked.to_f32()),
            _ => PackedField::Array(stacked),
        })
    }
}

/// A fixed-size, multi-field unit of training data.
///
/// `indices[i]` and row `i` of every field belong to the same sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Originating draws, in row order
    pub indices: Vec<SampleIndex>,

    /// Packed fields by name
    pub fields: BTreeMap<String, PackedField>,

    /// Number of trailing rows that are filler, or missing rows of a partial batch
    pub pad: usize,
}

impl Batch {
    /// Assemble processed samples into a batch
    pub fn assemble(plan: &PackingPlan, samples: Vec<(SampleIndex, Record)>, pad: usize) -> Result<Self> {
        let Some((_, first)) = samples.first() else {
            return Err(Error::InvalidArgument("cannot assemble an empty batch".into()));
        };
        let names: Vec<String> = first.keys().cloned().collect();

        let mut indices = Vec::with_capacity(samples.len());
        let mut columns: BTreeMap<String, Vec<Value>> = names
            .iter()
            .map(|name| (name.clone(), Vec::with_capacity(samples.len())))
            .collect();

        for (index, mut record) in samples {
            if record.len() != names.len() {
                return Err(Error::shape_mismatch(
                    format!("sample {index}"),
                    format!("{} fields", names.len()),
                    format!("{} fields", record.len()),
                ));
            }
            for (name, column) in &mut columns {
                let value = record
                    .remove(name)
                    .ok_or_else(|| Error::shape_mismatch(name.as_str(), "a value", format!("nothing for {index}")))?;
                column.push(value);
            }
            indices.push(index);
        }

        let fields = columns
            .into_iter()
            .map(|(name, values)| {
                let packed = plan.pack(&name, values)?;
                Ok((name, packed))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self { indices, fields, pad })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the batch has no rows
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// A packed field by name
    pub fn field(&self, name: &str) -> Option<&PackedField> {
        self.fields.get(name)
    }
}
