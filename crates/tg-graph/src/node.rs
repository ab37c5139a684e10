use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tg_tensor::{DType, PartialShape, Shape};

use crate::cum_sum::CumSumAttrs;
use crate::error::{GraphError, Result};
use crate::rnn::RnnAttrs;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// The operation a node performs, with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// A Function input.
    Parameter { dtype: DType, shape: PartialShape },
    /// Literal data embedded in the graph, row-major native-endian bytes.
    Constant {
        dtype: DType,
        shape: Shape,
        data: Arc<[u8]>,
    },
    /// Element-wise arithmetic with numpy-style broadcasting.
    Add,
    Subtract,
    Multiply,
    CumSum(CumSumAttrs),
    /// Fused multi-timestep recurrent cell.
    Rnn(RnnAttrs),
}

impl Op {
    pub fn type_name(&self) -> &'static str {
        match self {
            Op::Parameter { .. } => "Parameter",
            Op::Constant { .. } => "Constant",
            Op::Add => "Add",
            Op::Subtract => "Subtract",
            Op::Multiply => "Multiply",
            Op::CumSum(_) => "CumSum",
            Op::Rnn(_) => "Rnn",
        }
    }

    /// Element type and shape of every output given those of the inputs.
    ///
    /// Called with partial shapes at graph construction and again with
    /// concrete shapes when a dynamically shaped Function is executed.
    pub fn infer(&self, inputs: &[(DType, PartialShape)]) -> Result<Vec<(DType, PartialShape)>> {
        match self {
            Op::Parameter { dtype, shape } => {
                expect_inputs(self.type_name(), inputs, 0)?;
                Ok(vec![(*dtype, shape.clone())])
            }
            Op::Constant { dtype, shape, .. } => {
                expect_inputs(self.type_name(), inputs, 0)?;
                Ok(vec![(*dtype, PartialShape::from(shape))])
            }
            Op::Add | Op::Subtract | Op::Multiply => infer_binary(self.type_name(), inputs),
            Op::CumSum(attrs) => attrs.infer(inputs),
            Op::Rnn(attrs) => attrs.infer(inputs),
        }
    }
}

fn expect_inputs(op: &'static str, inputs: &[(DType, PartialShape)], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(GraphError::InputCount {
            op,
            expected: n,
            got: inputs.len(),
        });
    }
    Ok(())
}

fn infer_binary(
    op: &'static str,
    inputs: &[(DType, PartialShape)],
) -> Result<Vec<(DType, PartialShape)>> {
    expect_inputs(op, inputs, 2)?;
    let (a_type, a_shape) = &inputs[0];
    let (b_type, b_shape) = &inputs[1];
    if a_type != b_type {
        return Err(GraphError::TypeMismatch {
            op,
            expected: *a_type,
            got: *b_type,
        });
    }
    if !a_type.is_numeric() {
        return Err(GraphError::invalid(
            op,
            format!("arithmetic is not defined for {a_type}"),
        ));
    }
    let shape = a_shape
        .broadcast(b_shape)
        .ok_or_else(|| GraphError::ShapeMismatch {
            op,
            a: a_shape.clone(),
            b: b_shape.clone(),
        })?;
    Ok(vec![(*a_type, shape)])
}

/// Element type and shape of one node output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDesc {
    pub dtype: DType,
    pub shape: PartialShape,
}

/// A typed graph vertex. Nodes are immutable and shared through [`NodeRef`];
/// since inputs must exist before a node is built, graphs are acyclic.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    op: Op,
    inputs: Vec<Output>,
    outputs: Vec<OutputDesc>,
}

pub type NodeRef = Arc<Node>;

impl Node {
    /// Build a node, deriving its outputs from the inputs' annotations.
    pub(crate) fn build(op: Op, inputs: Vec<Output>) -> Result<NodeRef> {
        let descs: Vec<(DType, PartialShape)> = inputs
            .iter()
            .map(|o| (o.dtype(), o.shape().clone()))
            .collect();
        let outputs = op
            .infer(&descs)?
            .into_iter()
            .map(|(dtype, shape)| OutputDesc { dtype, shape })
            .collect();
        Ok(Node::assemble(op, inputs, outputs))
    }

    pub(crate) fn assemble(op: Op, inputs: Vec<Output>, outputs: Vec<OutputDesc>) -> NodeRef {
        let id = NodeId::next();
        Arc::new(Node {
            id,
            name: format!("{}_{}", op.type_name(), id.0),
            op,
            inputs,
            outputs,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Friendly name, `<Type>_<id>`; used in errors and performance data.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn inputs(&self) -> &[Output] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputDesc] {
        &self.outputs
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.op, Op::Parameter { .. })
    }

    /// Reference output `index` of this node.
    ///
    /// # Errors
    /// Returns `NoSuchOutput` if the node has fewer outputs.
    pub fn output(self: &Arc<Self>, index: usize) -> Result<Output> {
        if index >= self.outputs.len() {
            return Err(GraphError::NoSuchOutput {
                node: self.name.clone(),
                index,
            });
        }
        Ok(Output {
            node: Arc::clone(self),
            index,
        })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One output of one node: the unit of dataflow between nodes.
#[derive(Debug, Clone)]
pub struct Output {
    node: NodeRef,
    index: usize,
}

impl Output {
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn desc(&self) -> &OutputDesc {
        // Outputs are only created by `Node::output` (bounds checked) or for
        // index 0, which every node has.
        &self.node.outputs[self.index]
    }

    pub fn dtype(&self) -> DType {
        self.desc().dtype
    }

    pub fn shape(&self) -> &PartialShape {
        &self.desc().shape
    }
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) && self.index == other.index
    }
}

impl Eq for Output {}

impl From<&NodeRef> for Output {
    fn from(node: &NodeRef) -> Self {
        Output {
            node: Arc::clone(node),
            index: 0,
        }
    }
}

impl From<NodeRef> for Output {
    fn from(node: NodeRef) -> Self {
        Output { node, index: 0 }
    }
}

impl From<&Output> for Output {
    fn from(output: &Output) -> Self {
        output.clone()
    }
}
