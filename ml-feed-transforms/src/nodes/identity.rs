//! Pass-through copy of inputs to outputs

use ml_feed_core::{ArrayData, ArrayValue, Error, NodeInputs, Record, Result, TransformNode, Value};

use super::names;

/// Copies each input to its paired output.
///
/// Numeric scalars are promoted to one-element arrays so they pack densely;
/// other values pass through unchanged.
#[derive(Debug, Clone)]
pub struct Identity {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl Identity {
    /// Pair `inputs[i]` with `outputs[i]`
    pub fn new<I, O, S, T>(inputs: I, outputs: O) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let inputs = names(inputs);
        let outputs = names(outputs);
        if inputs.len() != outputs.len() {
            return Err(Error::Construction(format!(
                "identity maps {} inputs onto {} outputs",
                inputs.len(),
                outputs.len()
            )));
        }
        Ok(Self { inputs, outputs })
    }
}

fn promote(value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Int(v) => ArrayValue::new([1], ArrayData::Int64(vec![*v]))?.into(),
        Value::Float(v) => ArrayValue::new([1], ArrayData::Float64(vec![*v]))?.into(),
        other => other.clone(),
    })
}

impl TransformNode for Identity {
    fn consumes(&self) -> &[String] {
        &self.inputs
    }

    fn produces(&self) -> &[String] {
        &self.outputs
    }

    fn run(&self, inputs: &NodeInputs<'_>) -> Result<Record> {
        self.inputs
            .iter()
            .zip(&self.outputs)
            .map(|(input, output)| Ok((output.clone(), promote(inputs.get(input)?)?)))
            .collect()
    }
}
