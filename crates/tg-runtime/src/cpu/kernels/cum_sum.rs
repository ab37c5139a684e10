use tg_graph::cum_sum::resolve_axis;
use tg_graph::{CumSumAttrs, CumSumAxis};
use tg_tensor::{AlignedBuffer, DType};

use super::{dispatch_numeric, Arith, View};
use crate::error::{Error, Result};

pub(crate) fn cum_sum(
    node: &str,
    attrs: &CumSumAttrs,
    x: &View<'_>,
    axis_input: Option<&View<'_>>,
    out: &mut AlignedBuffer,
) -> Result<()> {
    let axis = match attrs.axis {
        CumSumAxis::Static(axis) => axis,
        CumSumAxis::Dynamic => read_axis(node, axis_input)?,
    };
    let axis = resolve_axis(axis, x.shape.ndim())
        .map_err(|e| Error::InvalidArgument(format!("{node}: {e}")))?;
    dispatch_numeric!(
        x.dtype,
        node,
        run(x, out, axis, attrs.exclusive, attrs.reverse)
    )
}

fn read_axis(node: &str, axis: Option<&View<'_>>) -> Result<i64> {
    let axis = axis.ok_or_else(|| Error::kernel(node, "missing axis input"))?;
    if axis.shape.numel() != 1 {
        return Err(Error::InvalidArgument(format!(
            "{node}: axis must hold exactly one value, got shape {}",
            axis.shape
        )));
    }
    let value = match axis.dtype {
        DType::I64 => axis.typed::<i64>()?.first().copied(),
        DType::I32 => axis.typed::<i32>()?.first().map(|&v| i64::from(v)),
        other => {
            return Err(Error::InvalidArgument(format!(
                "{node}: axis must be i32 or i64, got {other}"
            )))
        }
    };
    value.ok_or_else(|| Error::kernel(node, "empty axis buffer"))
}

fn run<T: Arith>(
    x: &View<'_>,
    out: &mut AlignedBuffer,
    axis: usize,
    exclusive: bool,
    reverse: bool,
) -> Result<()> {
    let src = x.typed::<T>()?;
    let dst = out.typed_mut::<T>()?;
    scan(src, dst, x.shape.dims(), axis, exclusive, reverse);
    Ok(())
}

/// Running totals of `src` along `axis`, written to `dst`.
///
/// The tensor is treated as `[outer, len, inner]` around the axis; each of
/// the `outer * inner` lanes is summed strictly in index order (or reverse
/// index order), so the result is deterministic.
pub(crate) fn scan<T: Arith>(
    src: &[T],
    dst: &mut [T],
    dims: &[usize],
    axis: usize,
    exclusive: bool,
    reverse: bool,
) {
    let len = dims[axis];
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();

    for o in 0..outer {
        for i in 0..inner {
            let base = o * len * inner + i;
            let mut acc = T::zero();
            for step in 0..len {
                let k = if reverse { len - 1 - step } else { step };
                let idx = base + k * inner;
                if exclusive {
                    dst[idx] = acc;
                    acc = acc.plus(src[idx]);
                } else {
                    acc = acc.plus(src[idx]);
                    dst[idx] = acc;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::kernels::buffer_of;
    use tg_tensor::Shape;

    fn scanned(data: &[f32], dims: &[usize], axis: usize) -> Vec<f32> {
        let mut out = vec![0.0; data.len()];
        scan(data, &mut out, dims, axis, false, false);
        out
    }

    #[test]
    fn test_default_2d() {
        assert_eq!(
            scanned(&[1.0, 2.0, 3.0, 4.0], &[1, 4], 1),
            vec![1.0, 3.0, 6.0, 10.0]
        );
    }

    #[test]
    fn test_axis_0_2d() {
        let x: Vec<f32> = (0..8).map(|v| v as f32).collect();
        assert_eq!(
            scanned(&x, &[2, 4], 0),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 10.0]
        );
    }

    #[test]
    fn test_3d_axes() {
        let x: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let axis1: Vec<f32> = vec![
            0, 1, 2, 3, 4, 6, 8, 10, 8, 9, 10, 11, 20, 22, 24, 26, 16, 17, 18, 19, 36, 38, 40,
            42,
        ]
        .into_iter()
        .map(|v| v as f32)
        .collect();
        assert_eq!(scanned(&x, &[3, 2, 4], 1), axis1);

        let axis2: Vec<f32> = vec![
            0, 1, 3, 6, 4, 9, 15, 22, 8, 17, 27, 38, 12, 25, 39, 54, 16, 33, 51, 70, 20, 41, 63,
            86,
        ]
        .into_iter()
        .map(|v| v as f32)
        .collect();
        assert_eq!(scanned(&x, &[3, 2, 4], 2), axis2);
    }

    #[test]
    fn test_exclusive_and_reverse() {
        let x = [1i32, 2, 3, 4];
        let mut out = [0i32; 4];
        scan(&x, &mut out, &[4], 0, true, false);
        assert_eq!(out, [0, 1, 3, 6]);
        scan(&x, &mut out, &[4], 0, false, true);
        assert_eq!(out, [10, 9, 7, 4]);
        scan(&x, &mut out, &[4], 0, true, true);
        assert_eq!(out, [9, 7, 4, 0]);
    }

    #[test]
    fn test_dynamic_axis_resolved_at_run() {
        let shape = Shape::from([2, 2]);
        let data = buffer_of(&[1i64, 2, 3, 4]);
        let x = View {
            dtype: DType::I64,
            shape: &shape,
            buffer: &data,
        };
        let scalar = Shape::new(vec![]);
        let attrs = CumSumAttrs::new(CumSumAxis::Dynamic);

        let axis_buf = buffer_of(&[-1i32]);
        let axis = View {
            dtype: DType::I32,
            shape: &scalar,
            buffer: &axis_buf,
        };
        let mut out = AlignedBuffer::zeroed(32, 64).unwrap();
        cum_sum("CumSum_1", &attrs, &x, Some(&axis), &mut out).unwrap();
        assert_eq!(out.typed::<i64>().unwrap(), &[1, 3, 3, 7]);

        let bad_buf = buffer_of(&[2i64]);
        let bad = View {
            dtype: DType::I64,
            shape: &scalar,
            buffer: &bad_buf,
        };
        let err = cum_sum("CumSum_1", &attrs, &x, Some(&bad), &mut out).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
