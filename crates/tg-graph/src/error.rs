use thiserror::Error;

use tg_tensor::{DType, PartialShape};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("invalid argument for {op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },
    #[error("{op} expects {expected} inputs, got {got}")]
    InputCount {
        op: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{op}: incompatible shapes {a} and {b}")]
    ShapeMismatch {
        op: &'static str,
        a: PartialShape,
        b: PartialShape,
    },
    #[error("{op}: element type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        op: &'static str,
        expected: DType,
        got: DType,
    },
    #[error("node {node} has no output {index}")]
    NoSuchOutput { node: String, index: usize },
    #[error("node {0} is not a Parameter")]
    NotAParameter(String),
    #[error("parameter {0} is listed more than once")]
    DuplicateParameter(String),
    #[error("parameter {0} is used by the graph but missing from the parameter list")]
    UnlistedParameter(String),
    #[error("tensor error: {0}")]
    Tensor(#[from] tg_tensor::TensorError),
}

impl GraphError {
    pub fn invalid(op: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
