//! Reference kernels. Each reads typed views of its inputs and fills freshly
//! allocated output buffers; none of them touches caller memory.

pub(crate) mod cum_sum;
pub(crate) mod elementwise;
pub(crate) mod rnn;

use half::f16;
use tg_graph::Op;
use tg_tensor::{AlignedBuffer, DType, Element, Shape};

use crate::error::{Error, Result};
use elementwise::BinaryOp;

/// Read-only view of one kernel input.
#[derive(Debug, Clone, Copy)]
pub(crate) struct View<'a> {
    pub dtype: DType,
    pub shape: &'a Shape,
    pub buffer: &'a AlignedBuffer,
}

impl<'a> View<'a> {
    pub fn typed<T: Element>(&self) -> Result<&'a [T]> {
        Ok(self.buffer.typed::<T>()?)
    }
}

/// Arithmetic used by kernels. Integer types wrap on overflow.
pub(crate) trait Arith: Element {
    fn plus(self, other: Self) -> Self;
    fn minus(self, other: Self) -> Self;
    fn times(self, other: Self) -> Self;
}

macro_rules! wrapping_arith {
    ($($ty:ty),*) => {
        $(impl Arith for $ty {
            fn plus(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            fn minus(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }
            fn times(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
        })*
    };
}

macro_rules! float_arith {
    ($($ty:ty),*) => {
        $(impl Arith for $ty {
            fn plus(self, other: Self) -> Self {
                self + other
            }
            fn minus(self, other: Self) -> Self {
                self - other
            }
            fn times(self, other: Self) -> Self {
                self * other
            }
        })*
    };
}

wrapping_arith!(i8, i32, i64, u8);
float_arith!(f16, f32, f64);

/// Call `$kernel::<T>($args)` with `T` matching a numeric `DType`.
macro_rules! dispatch_numeric {
    ($dtype:expr, $node:expr, $kernel:ident($($args:expr),*)) => {
        match $dtype {
            ::tg_tensor::DType::F16 => $kernel::<::half::f16>($($args),*),
            ::tg_tensor::DType::F32 => $kernel::<f32>($($args),*),
            ::tg_tensor::DType::F64 => $kernel::<f64>($($args),*),
            ::tg_tensor::DType::I8 => $kernel::<i8>($($args),*),
            ::tg_tensor::DType::I32 => $kernel::<i32>($($args),*),
            ::tg_tensor::DType::I64 => $kernel::<i64>($($args),*),
            ::tg_tensor::DType::U8 => $kernel::<u8>($($args),*),
            other => Err($crate::error::Error::kernel(
                $node,
                format!("no kernel for element type {other}"),
            )),
        }
    };
}
pub(crate) use dispatch_numeric;

/// Run the kernel for `op`.
pub(crate) fn execute(
    node: &str,
    op: &Op,
    inputs: &[View<'_>],
    outputs: &mut [AlignedBuffer],
) -> Result<()> {
    match op {
        Op::Add | Op::Subtract | Op::Multiply => {
            let binary = match op {
                Op::Add => BinaryOp::Add,
                Op::Subtract => BinaryOp::Subtract,
                _ => BinaryOp::Multiply,
            };
            let ([a, b], [out]) = (inputs, outputs) else {
                return Err(arity(node, inputs.len()));
            };
            elementwise::binary(node, binary, a, b, out)
        }
        Op::CumSum(attrs) => {
            let ([x, rest @ ..], [out]) = (inputs, outputs) else {
                return Err(arity(node, inputs.len()));
            };
            cum_sum::cum_sum(node, attrs, x, rest.first(), out)
        }
        Op::Rnn(attrs) => rnn::rnn(node, attrs, inputs, outputs),
        Op::Parameter { .. } | Op::Constant { .. } => {
            Err(Error::kernel(node, "bound at call time, not executed"))
        }
    }
}

fn arity(node: &str, inputs: usize) -> Error {
    Error::kernel(node, format!("unexpected argument count ({inputs} inputs)"))
}

#[cfg(test)]
pub(crate) fn buffer_of<T: Element>(data: &[T]) -> AlignedBuffer {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let mut buf = AlignedBuffer::zeroed(bytes.len(), 64).unwrap();
    buf.as_mut_slice().copy_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arith_wraps() {
        assert_eq!(i8::MAX.plus(1), i8::MIN);
        assert_eq!(0u8.minus(1), 255);
        assert_eq!(i32::MAX.times(2), -2);
    }

    #[test]
    fn test_f16_arith() {
        let a = f16::from_f32(1.5);
        let b = f16::from_f32(2.0);
        assert_eq!(a.plus(b), f16::from_f32(3.5));
        assert_eq!(a.times(b), f16::from_f32(3.0));
    }

    /// No `DType` import here: the macro must resolve its own paths.
    mod bare_scope {
        use crate::cpu::kernels::dispatch_numeric;
        use crate::error::Result;

        fn width<T: tg_tensor::Element>(_node: &str) -> Result<usize> {
            Ok(std::mem::size_of::<T>())
        }

        pub(super) fn element_width(dtype: tg_tensor::DType) -> Result<usize> {
            dispatch_numeric!(dtype, "Width_1", width("Width_1"))
        }
    }

    #[test]
    fn test_dispatch_numeric_outside_caller_imports() {
        assert_eq!(bare_scope::element_width(DType::I64).unwrap(), 8);
        assert_eq!(bare_scope::element_width(DType::F16).unwrap(), 2);
        assert!(matches!(
            bare_scope::element_width(DType::Boolean),
            Err(Error::Kernel { .. })
        ));
    }

    #[test]
    fn test_execute_rejects_wrong_arity() {
        let shape = Shape::from([1]);
        let buf = buffer_of(&[1.0f32]);
        let view = View {
            dtype: DType::F32,
            shape: &shape,
            buffer: &buf,
        };
        let mut outs = vec![AlignedBuffer::zeroed(4, 64).unwrap()];
        let err = execute("Add_1", &Op::Add, &[view], &mut outs).unwrap_err();
        assert!(matches!(err, Error::Kernel { .. }));
    }
}
