//! Transform node trait: one named, pure computation over named fields

use crate::error::{Error, Result, SampleError};
use crate::schema::FieldTemplate;
use crate::value::{ArrayValue, Record, Value};

/// A transform participating in a transform graph.
///
/// Nodes are pure given their inputs and keep no cross-sample state.
/// Failures for the current sample must be reported as [`Error::Sample`];
/// configuration problems as [`Error::Misconfigured`], which is fatal.
pub trait TransformNode: Send {
    /// Names this node reads, in a stable order
    fn consumes(&self) -> &[String];

    /// Names this node writes, in a stable order
    fn produces(&self) -> &[String];

    /// Fixed per-sample templates of outputs, where known ahead of time
    fn templates(&self) -> Vec<(String, FieldTemplate)> {
        Vec::new()
    }

    /// Run the node for one sample
    fn run(&self, inputs: &NodeInputs<'_>) -> Result<Record>;
}

/// Read-only view of the running state, restricted to a node's declared inputs
#[derive(Debug, Clone, Copy)]
pub struct NodeInputs<'a> {
    node: &'a str,
    state: &'a Record,
    allowed: &'a [String],
}

impl<'a> NodeInputs<'a> {
    /// Create a view for `node` over `state`, exposing only `allowed`
    pub fn new(node: &'a str, state: &'a Record, allowed: &'a [String]) -> Self {
        Self {
            node,
            state,
            allowed,
        }
    }

    /// Name of the node being run
    pub fn node(&self) -> &str {
        self.node
    }

    /// A declared input
    pub fn get(&self, name: &str) -> Result<&'a Value> {
        if !self.allowed.iter().any(|allowed| allowed == name) {
            return Err(Error::Misconfigured {
                node: self.node.to_owned(),
                reason: format!("reads undeclared input '{name}'"),
            });
        }
        self.state
            .get(name)
            .ok_or_else(|| SampleError::MissingInput(name.to_owned()).into())
    }

    /// A declared input that must be a dense array
    pub fn array(&self, name: &str) -> Result<&'a ArrayValue> {
        let value = self.get(name)?;
        value.as_array().ok_or_else(|| {
            SampleError::InvalidValue(format!("'{}' is {}, expected array", name, value.kind())).into()
        })
    }

    /// A declared input that must be text
    pub fn text(&self, name: &str) -> Result<&'a str> {
        let value = self.get(name)?;
        value.as_text().ok_or_else(|| {
            SampleError::InvalidValue(format!("'{}' is {}, expected text", name, value.kind())).into()
        })
    }
}
