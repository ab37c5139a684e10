//! `tg-runtime` - Compile and run tensor-graph Functions on pluggable backends.
//!
//! This crate provides:
//! - The `Backend` and `Executable` traits
//! - A name-keyed backend registry (`CPU`, `INTERPRETER`)
//! - A compile cache keyed by Function identity
//! - Reference CPU kernels for the elementwise ops, `CumSum` and the fused `Rnn`
//!
//! ```no_run
//! use std::sync::Arc;
//! use tg_graph::{ops, Function, Output};
//! use tg_runtime::create_backend;
//! use tg_tensor::{DType, Shape};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = create_backend("CPU")?;
//! let x = ops::parameter(DType::F32, Shape::from([4]));
//! let scan = ops::cum_sum(&x, 0)?;
//! let f = Function::new(vec![Output::from(&scan)], vec![x])?;
//!
//! let exec = backend.compile(&f, false)?;
//! let input = backend.create_tensor(DType::F32, Shape::from([4]))?;
//! input.copy_from_slice(&[1.0f32, 2.0, 3.0, 4.0])?;
//! let output = backend.create_tensor(DType::F32, Shape::from([4]))?;
//! exec.call(&[Arc::clone(&output)], &[input])?;
//! assert_eq!(output.to_vec::<f32>()?, vec![1.0, 3.0, 6.0, 10.0]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod cpu;
pub mod error;
pub mod registry;

pub use backend::{Backend, Executable, PerformanceCounter};
pub use cache::CompileCache;
pub use config::BackendConfig;
pub use cpu::compiled::CompiledFunction;
pub use cpu::{CpuBackend, CpuExecutable};
pub use error::{Error, Phase, Result};
pub use registry::{
    create_backend, create_backend_with_config, register_backend, registered_backends,
    BackendConstructor,
};
