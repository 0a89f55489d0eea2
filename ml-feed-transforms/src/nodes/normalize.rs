//! Affine normalization of numeric arrays

use ml_feed_core::{ArrayData, ArrayValue, NodeInputs, Record, Result, SampleError, TransformNode};

/// `output = input * scale + offset`, as f32.
///
/// Numeric scalars are treated as 0-d arrays.
#[derive(Debug, Clone)]
pub struct Normalize {
    inputs: Vec<String>,
    outputs: Vec<String>,
    scale: f32,
    offset: f32,
}

impl Normalize {
    /// Normalise `input` into `output`
    pub fn new(input: impl Into<String>, output: impl Into<String>, scale: f32, offset: f32) -> Self {
        Self {
            inputs: vec![input.into()],
            outputs: vec![output.into()],
            scale,
            offset,
        }
    }
}

impl TransformNode for Normalize {
    fn consumes(&self) -> &[String] {
        &self.inputs
    }

    fn produces(&self) -> &[String] {
        &self.outputs
    }

    fn run(&self, inputs: &NodeInputs<'_>) -> Result<Record> {
        let value = inputs.get(&self.inputs[0])?;
        let array = value.to_array().ok_or_else(|| {
            SampleError::InvalidValue(format!("cannot normalise a {} value", value.kind()))
        })?;
        let data = array
            .data()
            .to_f32()
            .into_iter()
            .map(|x| x * self.scale + self.offset)
            .collect();

        let mut out = Record::new();
        out.insert(
            self.outputs[0].clone(),
            ArrayValue::new(array.shape(), ArrayData::Float32(data))?.into(),
        );
        Ok(out)
    }
}
