//! `tg-graph` - Typed operator graphs for tensor-graph.
//!
//! Nodes are built through the constructors in [`ops`], which check inputs and
//! attributes and annotate every output with an element type and partial
//! shape. A [`Function`] fixes the parameter/result lists and a deterministic
//! topological order; backends compile Functions, never bare nodes.

pub mod cum_sum;
pub mod error;
pub mod function;
pub mod node;
pub mod ops;
pub mod rnn;

pub use cum_sum::{CumSumAttrs, CumSumAxis};
pub use error::{GraphError, Result};
pub use function::{Function, FunctionId};
pub use node::{Node, NodeId, NodeRef, Op, Output, OutputDesc};
pub use rnn::{CellKind, Direction, RnnAttrs, UnitParams};
