//! Zero-filled arrays of a fixed template

use std::thread;
use std::time::Duration;

use ml_feed_core::{ArrayValue, FieldTemplate, NodeInputs, Record, Result, TransformNode};

use super::names;

/// Synthesises a zero-filled array of a fixed template.
///
/// An optional delay makes it a stand-in for slow readers when measuring
/// how well workers overlap with the consumer.
#[derive(Debug, Clone)]
pub struct ZeroArray {
    inputs: Vec<String>,
    outputs: Vec<String>,
    template: FieldTemplate,
    delay: Option<Duration>,
}

impl ZeroArray {
    /// Produce `output` with the given template
    pub fn new(output: impl Into<String>, template: FieldTemplate) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![output.into()],
            template,
            delay: None,
        }
    }

    /// Sleep this long per sample
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Only run once these names are available
    pub fn after<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = names(inputs);
        self
    }
}

impl TransformNode for ZeroArray {
    fn consumes(&self) -> &[String] {
        &self.inputs
    }

    fn produces(&self) -> &[String] {
        &self.outputs
    }

    fn templates(&self) -> Vec<(String, FieldTemplate)> {
        vec![(self.outputs[0].clone(), self.template.clone())]
    }

    fn run(&self, _inputs: &NodeInputs<'_>) -> Result<Record> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let mut out = Record::new();
        out.insert(self.outputs[0].clone(), ArrayValue::zeros(&self.template).into());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_feed_core::DataType;

    #[test]
    fn test_produces_template_shaped_zeros() {
        let template = FieldTemplate::new([2, 3], DataType::UInt8);
        let node = ZeroArray::new("image", template.clone()).after(["index"]);
        assert_eq!(node.consumes(), &["index".to_owned()]);
        assert_eq!(node.templates(), vec![("image".to_owned(), template.clone())]);

        let state = Record::new();
        let out = node.run(&NodeInputs::new("zeros", &state, &[])).unwrap();
        let image = out["image"].as_array().unwrap();
        assert!(image.matches(&template));
        assert!(image.as_bytes().iter().all(|&b| b == 0));
    }
}
