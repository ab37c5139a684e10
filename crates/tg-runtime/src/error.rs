use thiserror::Error;

use tg_graph::GraphError;
use tg_tensor::{DType, TensorError};

/// When an error was raised, which tells the caller what to do about it:
/// fix the graph, switch backends, or fix the call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Building graphs, tensors, configurations or backends.
    Construction,
    /// Lowering a Function.
    Compile,
    /// Running an Executable.
    Call,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("no backend registered under {0:?}")]
    NotFound(String),

    #[error("backend {backend} does not support {node}")]
    UnsupportedOperator { backend: String, node: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("shape mismatch for {what}: {reason}")]
    ShapeMismatch { what: String, reason: String },

    #[error("element type mismatch for {what}: expected {expected}, got {got}")]
    TypeMismatch {
        what: String,
        expected: DType,
        got: DType,
    },

    #[error("cannot allocate {bytes} bytes with alignment {alignment}")]
    Allocation {
        bytes: usize,
        alignment: usize,
        phase: Phase,
    },

    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    #[error("kernel {node} failed: {reason}")]
    Kernel { node: String, reason: String },

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("tensor error: {source}")]
    Tensor { source: TensorError, phase: Phase },
}

/// Converts as a construction-time error; compile and call paths reclassify
/// through `Error::at`.
impl From<TensorError> for Error {
    fn from(err: TensorError) -> Self {
        match err {
            TensorError::Allocation { bytes, alignment } => Error::Allocation {
                bytes,
                alignment,
                phase: Phase::Construction,
            },
            TensorError::BufferBounds {
                offset,
                size,
                buffer_size,
            } => Error::BufferBounds {
                offset,
                size,
                buffer_size,
            },
            source => Error::Tensor {
                source,
                phase: Phase::Construction,
            },
        }
    }
}

impl Error {
    pub(crate) fn kernel(node: &str, reason: impl Into<String>) -> Self {
        Error::Kernel {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    /// Re-classify an allocation or tensor error raised while compiling or
    /// calling. Other variants already imply their phase.
    pub(crate) fn at(self, phase: Phase) -> Self {
        match self {
            Error::Allocation {
                bytes, alignment, ..
            } => Error::Allocation {
                bytes,
                alignment,
                phase,
            },
            Error::Tensor { source, .. } => Error::Tensor { source, phase },
            other => other,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Error::Allocation { phase, .. } | Error::Tensor { phase, .. } => *phase,
            Error::NotFound(_) | Error::Config(_) | Error::Graph(_) => Phase::Construction,
            Error::UnsupportedOperator { .. } => Phase::Compile,
            Error::InvalidArgument(_)
            | Error::ShapeMismatch { .. }
            | Error::TypeMismatch { .. }
            | Error::BufferBounds { .. }
            | Error::Kernel { .. } => Phase::Call,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
