//! Named-node transform DAG over named fields

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use tracing::debug;

use ml_feed_core::{Error, FieldTemplate, NodeInputs, Record, Result, SampleError, TransformNode};

/// Who produces a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    Root,
    Node(usize),
}

struct GraphNode {
    name: String,
    node: Box<dyn TransformNode>,
}

/// A DAG of transform nodes over declared root fields.
///
/// Nodes are validated as they are added: every consumed name must already
/// be a root or the output of an earlier node, and every name has exactly
/// one producer. Execution follows Kahn's algorithm with a FIFO queue; nodes
/// that become eligible at the same time run in registration order, so the
/// order is fixed for a given graph.
pub struct TransformGraph {
    roots: Vec<String>,
    nodes: Vec<GraphNode>,
    producers: HashMap<String, Producer>,
    outputs: Option<Vec<String>>,
    plan: Vec<usize>,
}

impl TransformGraph {
    /// Create a graph over the given root fields
    pub fn new<I, S>(roots: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut producers = HashMap::new();
        let mut names = Vec::new();
        for root in roots {
            let root = root.into();
            if producers.insert(root.clone(), Producer::Root).is_some() {
                return Err(Error::DuplicateOutput {
                    node: "<root>".into(),
                    name: root,
                });
            }
            names.push(root);
        }
        Ok(Self {
            roots: names,
            nodes: Vec::new(),
            producers,
            outputs: None,
            plan: Vec::new(),
        })
    }

    /// Add a node under a unique name
    pub fn add(&mut self, name: impl Into<String>, node: impl TransformNode + 'static) -> Result<()> {
        self.add_boxed(name, Box::new(node))
    }

    /// Add an already boxed node under a unique name
    pub fn add_boxed(&mut self, name: impl Into<String>, node: Box<dyn TransformNode>) -> Result<()> {
        let name = name.into();
        if self.nodes.iter().any(|existing| existing.name == name) {
            return Err(Error::Construction(format!("node '{name}' is already registered")));
        }
        if let Some(missing) = node
            .consumes()
            .iter()
            .find(|input| !self.producers.contains_key(input.as_str()))
        {
            return Err(Error::UnsatisfiedDependency {
                node: name,
                name: missing.clone(),
            });
        }
        for (i, output) in node.produces().iter().enumerate() {
            if self.producers.contains_key(output) || node.produces()[..i].contains(output) {
                return Err(Error::DuplicateOutput {
                    node: name,
                    name: output.clone(),
                });
            }
        }

        let id = self.nodes.len();
        for output in node.produces() {
            self.producers.insert(output.clone(), Producer::Node(id));
        }
        debug!(
            "added node '{}' ({:?} -> {:?})",
            name,
            node.consumes(),
            node.produces()
        );
        self.nodes.push(GraphNode { name, node });
        self.plan = self.schedule();
        Ok(())
    }

    /// Restrict [`TransformGraph::execute`] to the given names
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let outputs: Vec<String> = outputs.into_iter().map(Into::into).collect();
        if let Some(unknown) = outputs.iter().find(|name| !self.producers.contains_key(name.as_str())) {
            return Err(Error::Construction(format!(
                "output '{unknown}' is not produced by the graph"
            )));
        }
        self.outputs = Some(outputs);
        Ok(self)
    }

    /// Root field names, in declaration order
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Node names in execution order
    pub fn execution_order(&self) -> Vec<&str> {
        self.plan.iter().map(|&id| self.nodes[id].name.as_str()).collect()
    }

    /// Names returned by [`TransformGraph::execute`]
    pub fn declared_outputs(&self) -> Vec<String> {
        match &self.outputs {
            Some(outputs) => outputs.clone(),
            None => {
                let mut names: Vec<String> = self.producers.keys().cloned().collect();
                names.sort();
                names
            }
        }
    }

    /// Per-sample templates of declared outputs whose producers know them
    pub fn templates(&self) -> BTreeMap<String, FieldTemplate> {
        let declared = self.declared_outputs();
        self.nodes
            .iter()
            .flat_map(|entry| entry.node.templates())
            .filter(|(name, _)| declared.contains(name))
            .collect()
    }

    /// Run every node for one sample, given its root values
    pub fn execute(&self, mut state: Record) -> Result<Record> {
        if let Some(missing) = self.roots.iter().find(|root| !state.contains_key(root.as_str())) {
            return Err(SampleError::MissingInput(missing.clone()).into());
        }

        for &id in &self.plan {
            let entry = &self.nodes[id];
            let produced = {
                let inputs = NodeInputs::new(&entry.name, &state, entry.node.consumes());
                entry.node.run(&inputs)?
            };
            if let Some(missing) = entry.node.produces().iter().find(|name| !produced.contains_key(name.as_str())) {
                return Err(Error::Misconfigured {
                    node: entry.name.clone(),
                    reason: format!("did not produce '{missing}'"),
                });
            }
            if let Some(extra) = produced.keys().find(|name| !entry.node.produces().contains(*name)) {
                return Err(Error::Misconfigured {
                    node: entry.name.clone(),
                    reason: format!("produced undeclared '{extra}'"),
                });
            }
            state.extend(produced);
        }

        match &self.outputs {
            Some(outputs) => {
                state.retain(|name, _| outputs.contains(name));
                Ok(state)
            }
            None => Ok(state),
        }
    }

    /// Kahn's algorithm; ties go to registration order
    fn schedule(&self) -> Vec<usize> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .map(|entry| {
                entry
                    .node
                    .consumes()
                    .iter()
                    .filter(|input| matches!(self.producers.get(input.as_str()), Some(Producer::Node(_))))
                    .count()
            })
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (id, entry) in self.nodes.iter().enumerate() {
            for input in entry.node.consumes() {
                if let Some(&Producer::Node(producer)) = self.producers.get(input.as_str()) {
                    dependents[producer].push(id);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&id| pending[id] == 0).collect();
        let mut plan = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            plan.push(id);
            // dependents were pushed in registration order
            for &next in &dependents[id] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        plan
    }
}

impl fmt::Debug for TransformGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformGraph")
            .field("roots", &self.roots)
            .field("order", &self.execution_order())
            .field("outputs", &self.outputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{FnNode, Identity, Normalize};
    use ml_feed_core::Value;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    fn chain() -> TransformGraph {
        let mut graph = TransformGraph::new(["x"]).unwrap();
        graph.add("scale", Normalize::new("x", "scaled", 2.0, 0.0)).unwrap();
        graph.add("shift", Normalize::new("scaled", "shifted", 1.0, 1.0)).unwrap();
        graph.add("copy", Identity::new(["x"], ["raw"]).unwrap()).unwrap();
        graph
    }

    #[test]
    fn test_execute_runs_in_dependency_order() {
        let graph = chain();
        assert_eq!(graph.execution_order(), vec!["scale", "copy", "shift"]);

        let out = graph.execute(record(&[("x", Value::Float(3.0))])).unwrap();
        let shifted = out["shifted"].as_array().unwrap();
        assert_eq!(shifted.data().to_f32(), vec![7.0]);
        assert!(out.contains_key("raw"));
        assert!(out.contains_key("x"));
    }

    #[test]
    fn test_execute_is_deterministic() {
        let graph = chain();
        let input = record(&[("x", Value::Float(0.5))]);
        let a = graph.execute(input.clone()).unwrap();
        let b = graph.execute(input).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
    }

    #[test]
    fn test_declared_outputs_subset() {
        let graph = chain().with_outputs(["shifted"]).unwrap();
        assert_eq!(graph.declared_outputs(), vec!["shifted".to_owned()]);
        let out = graph.execute(record(&[("x", Value::Int(1))])).unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["shifted"]);
    }

    #[test]
    fn test_unsatisfied_dependency() {
        let mut graph = TransformGraph::new(["x"]).unwrap();
        let err = graph.add("n", Normalize::new("y", "z", 1.0, 0.0)).unwrap_err();
        assert!(matches!(err, Error::UnsatisfiedDependency { ref name, .. } if name == "y"));
    }

    #[test]
    fn test_duplicate_output() {
        let mut graph = TransformGraph::new(["x"]).unwrap();
        graph.add("a", Normalize::new("x", "y", 1.0, 0.0)).unwrap();
        let err = graph.add("b", Normalize::new("x", "y", 2.0, 0.0)).unwrap_err();
        assert!(matches!(err, Error::DuplicateOutput { ref name, .. } if name == "y"));

        let err = graph.add("c", Normalize::new("x", "x", 2.0, 0.0)).unwrap_err();
        assert!(matches!(err, Error::DuplicateOutput { .. }));
    }

    #[test]
    fn test_duplicate_node_name() {
        let mut graph = TransformGraph::new(["x"]).unwrap();
        graph.add("a", Normalize::new("x", "y", 1.0, 0.0)).unwrap();
        assert!(matches!(
            graph.add("a", Normalize::new("x", "z", 1.0, 0.0)).unwrap_err(),
            Error::Construction(_)
        ));
    }

    #[test]
    fn test_unknown_output_rejected() {
        assert!(chain().with_outputs(["nope"]).is_err());
    }

    #[test]
    fn test_missing_root_is_per_sample() {
        let err = chain().execute(Record::new()).unwrap_err();
        assert!(err.is_per_sample());
    }

    #[test]
    fn test_node_breaking_its_contract_is_fatal() {
        let mut graph = TransformGraph::new(["x"]).unwrap();
        graph
            .add("liar", FnNode::new(["x"], ["y"], |_inputs| Ok(Record::new())))
            .unwrap();
        let err = graph.execute(record(&[("x", Value::Int(1))])).unwrap_err();
        assert!(matches!(err, Error::Misconfigured { .. }));
    }
}
