//! Node constructors. Each validates its inputs and attributes immediately,
//! so a malformed node never reaches compilation.

use std::sync::Arc;

use tg_tensor::{DType, Element, PartialShape, Shape};

use crate::cum_sum::{CumSumAttrs, CumSumAxis};
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeRef, Op, Output, OutputDesc};
use crate::rnn::RnnAttrs;

/// A Function input of the given element type and (possibly partial) shape.
pub fn parameter(dtype: DType, shape: impl Into<PartialShape>) -> NodeRef {
    let shape = shape.into();
    let outputs = vec![OutputDesc {
        dtype,
        shape: shape.clone(),
    }];
    Node::assemble(Op::Parameter { dtype, shape }, Vec::new(), outputs)
}

/// Literal data.
///
/// # Errors
/// Returns `InvalidArgument` if `data` does not hold exactly `shape.numel()`
/// elements.
pub fn constant<T: Element>(shape: impl Into<Shape>, data: &[T]) -> Result<NodeRef> {
    let shape = shape.into();
    if data.len() != shape.numel() {
        return Err(GraphError::invalid(
            "Constant",
            format!("{} values given for shape {shape}", data.len()),
        ));
    }
    let bytes: Vec<u8> = bytemuck::cast_slice(data).to_vec();
    Node::build(
        Op::Constant {
            dtype: T::DTYPE,
            shape,
            data: Arc::from(bytes),
        },
        Vec::new(),
    )
}

pub fn add(a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeRef> {
    Node::build(Op::Add, vec![a.into(), b.into()])
}

pub fn subtract(a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeRef> {
    Node::build(Op::Subtract, vec![a.into(), b.into()])
}

pub fn multiply(a: impl Into<Output>, b: impl Into<Output>) -> Result<NodeRef> {
    Node::build(Op::Multiply, vec![a.into(), b.into()])
}

/// Inclusive forward prefix sum along a fixed axis.
pub fn cum_sum(x: impl Into<Output>, axis: i64) -> Result<NodeRef> {
    cum_sum_with(x, axis, false, false)
}

/// Prefix sum along a fixed axis with the `exclusive` / `reverse` variants.
///
/// # Errors
/// Returns `InvalidArgument` if the input's rank is known and `axis` is
/// outside `[-rank, rank)`.
pub fn cum_sum_with(
    x: impl Into<Output>,
    axis: i64,
    exclusive: bool,
    reverse: bool,
) -> Result<NodeRef> {
    let attrs = CumSumAttrs {
        axis: CumSumAxis::Static(axis),
        exclusive,
        reverse,
    };
    Node::build(Op::CumSum(attrs), vec![x.into()])
}

/// Prefix sum whose axis is the value of another node.
///
/// When `axis` is produced by an integer `Constant` the axis is folded into
/// the node as a static attribute and validated right away; otherwise it is
/// resolved each time the kernel runs.
pub fn cum_sum_dynamic(x: impl Into<Output>, axis: impl Into<Output>) -> Result<NodeRef> {
    let axis = axis.into();
    if let Some(value) = constant_axis(&axis) {
        return cum_sum(x, value);
    }
    let attrs = CumSumAttrs::new(CumSumAxis::Dynamic);
    Node::build(Op::CumSum(attrs), vec![x.into(), axis])
}

fn constant_axis(axis: &Output) -> Option<i64> {
    let Op::Constant { dtype, shape, data } = axis.node().op() else {
        return None;
    };
    if shape.numel() != 1 {
        return None;
    }
    match dtype {
        DType::I64 => data.get(..8)?.try_into().ok().map(i64::from_ne_bytes),
        DType::I32 => data
            .get(..4)?
            .try_into()
            .ok()
            .map(i32::from_ne_bytes)
            .map(i64::from),
        _ => None,
    }
}

/// Fused recurrent cell; see [`crate::rnn`] for the input/output contract.
pub fn rnn(
    src_layer: impl Into<Output>,
    src_iter: impl Into<Output>,
    params: impl Into<Output>,
    state_iter: impl Into<Output>,
    attrs: RnnAttrs,
) -> Result<NodeRef> {
    Node::build(
        Op::Rnn(attrs),
        vec![
            src_layer.into(),
            src_iter.into(),
            params.into(),
            state_iter.into(),
        ],
    )
}
