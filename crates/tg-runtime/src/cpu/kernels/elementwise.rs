use tg_tensor::{AlignedBuffer, Shape};

use super::{dispatch_numeric, Arith, View};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
}

impl BinaryOp {
    fn func<T: Arith>(self) -> fn(T, T) -> T {
        match self {
            BinaryOp::Add => T::plus,
            BinaryOp::Subtract => T::minus,
            BinaryOp::Multiply => T::times,
        }
    }
}

/// `out = a op b`, broadcasting numpy-style. The output shape is derived
/// from the operand shapes on every call.
pub(crate) fn binary(
    node: &str,
    op: BinaryOp,
    a: &View<'_>,
    b: &View<'_>,
    out: &mut AlignedBuffer,
) -> Result<()> {
    if a.dtype != b.dtype {
        return Err(Error::kernel(
            node,
            format!("operand types differ: {} vs {}", a.dtype, b.dtype),
        ));
    }
    let shape = Shape::broadcast(a.shape, b.shape).ok_or_else(|| {
        Error::kernel(
            node,
            format!("shapes {} and {} do not broadcast", a.shape, b.shape),
        )
    })?;
    dispatch_numeric!(a.dtype, node, apply(node, op, a, b, &shape, out))
}

fn apply<T: Arith>(
    node: &str,
    op: BinaryOp,
    a: &View<'_>,
    b: &View<'_>,
    shape: &Shape,
    out: &mut AlignedBuffer,
) -> Result<()> {
    let f = op.func::<T>();
    let xs = a.typed::<T>()?;
    let ys = b.typed::<T>()?;
    let out = out.typed_mut::<T>()?;
    if out.len() != shape.numel() {
        return Err(Error::kernel(
            node,
            format!("output holds {} elements, expected {}", out.len(), shape.numel()),
        ));
    }

    if a.shape == b.shape {
        for ((o, &x), &y) in out.iter_mut().zip(xs).zip(ys) {
            *o = f(x, y);
        }
        return Ok(());
    }

    let dims = shape.dims();
    let sa = broadcast_strides(a.shape, shape);
    let sb = broadcast_strides(b.shape, shape);
    let mut index = vec![0usize; dims.len()];
    let (mut ia, mut ib) = (0usize, 0usize);
    for o in out.iter_mut() {
        *o = f(xs[ia], ys[ib]);
        for d in (0..dims.len()).rev() {
            index[d] += 1;
            ia += sa[d];
            ib += sb[d];
            if index[d] < dims[d] {
                break;
            }
            ia -= sa[d] * dims[d];
            ib -= sb[d] * dims[d];
            index[d] = 0;
        }
    }
    Ok(())
}

/// Element strides of `src` laid against the broadcast shape `out`; a
/// stretched or missing axis gets stride 0.
fn broadcast_strides(src: &Shape, out: &Shape) -> Vec<usize> {
    let offset = out.ndim() - src.ndim();
    let mut strides = vec![0; out.ndim()];
    let mut step = 1;
    for (i, &len) in src.dims().iter().enumerate().rev() {
        if len != 1 {
            strides[offset + i] = step;
        }
        step *= len;
    }
    strides
}
