//! Transform graphs for ml-feed pipelines
//!
//! A [`TransformGraph`] wires [`ml_feed_core::TransformNode`]s together by
//! the names they consume and produce, and runs them for one sample at a
//! time in a fixed dependency order. The [`nodes`] module has the concrete
//! nodes shipped with ml-feed.

#![warn(missing_docs)]

pub mod graph;
pub mod nodes;

pub use graph::TransformGraph;
pub use nodes::{write_array_file, ArrayFileLoader, BoxCrop, FnNode, Identity, Normalize, ZeroArray};
