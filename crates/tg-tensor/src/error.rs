use thiserror::Error;

use crate::dtype::DType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },
    #[error("invalid axis {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: i64, ndim: usize },
    #[error("cannot allocate {bytes} bytes with alignment {alignment}")]
    Allocation { bytes: usize, alignment: usize },
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },
    #[error("null pointer passed for external tensor memory")]
    NullPointer,
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
