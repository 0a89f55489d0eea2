//! Nodes wrapping a user closure

use std::fmt;

use ml_feed_core::{FieldTemplate, NodeInputs, Record, Result, TransformNode};

use super::names;

type NodeFn = dyn Fn(&NodeInputs<'_>) -> Result<Record> + Send + Sync;

/// A node backed by a closure, for ad-hoc per-sample logic
pub struct FnNode {
    inputs: Vec<String>,
    outputs: Vec<String>,
    templates: Vec<(String, FieldTemplate)>,
    func: Box<NodeFn>,
}

impl FnNode {
    /// Wrap `func`, which reads `inputs` and must return exactly `outputs`
    pub fn new<I, O, S, T, F>(inputs: I, outputs: O, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
        F: Fn(&NodeInputs<'_>) -> Result<Record> + Send + Sync + 'static,
    {
        Self {
            inputs: names(inputs),
            outputs: names(outputs),
            templates: Vec::new(),
            func: Box::new(func),
        }
    }

    /// Declare the fixed template of one output
    pub fn with_template(mut self, output: impl Into<String>, template: FieldTemplate) -> Self {
        self.templates.push((output.into(), template));
        self
    }
}

impl fmt::Debug for FnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl TransformNode for FnNode {
    fn consumes(&self) -> &[String] {
        &self.inputs
    }

    fn produces(&self) -> &[String] {
        &self.outputs
    }

    fn templates(&self) -> Vec<(String, FieldTemplate)> {
        self.templates.clone()
    }

    fn run(&self, inputs: &NodeInputs<'_>) -> Result<Record> {
        (self.func)(inputs)
    }
}
