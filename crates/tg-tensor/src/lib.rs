//! `tg-tensor` - Typed, shaped host tensors for tensor-graph.
//!
//! This crate provides:
//! - A `Tensor` type over owned (aligned) or caller-supplied memory
//! - Static `Shape`s and `PartialShape`s with unknown dimensions
//! - Element type definitions (`DType`) and the `Element` scalar trait

pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use dtype::{DType, Element};
pub use error::{Result, TensorError};
pub use shape::{normalize_axis, Dimension, PartialShape, Shape};
pub use storage::{AlignedBuffer, Storage};
pub use tensor::Tensor;
