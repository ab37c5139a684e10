use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use tg_graph::{Function, Node, OutputDesc};
use tg_tensor::{DType, Shape, Tensor};

use crate::config::BackendConfig;
use crate::error::Result;

/// A hardware-specific tensor factory, graph compiler and compile cache.
///
/// Backends are created by name through [`crate::create_backend`] and shared
/// as `Arc<dyn Backend>`; every method takes `&self` and may be called from
/// several threads at once.
pub trait Backend: Send + Sync + Debug {
    /// Registry name, e.g. `"CPU"`.
    fn name(&self) -> &str;

    fn config(&self) -> &BackendConfig;

    /// Allocate a zero-filled tensor owned by this backend.
    ///
    /// # Errors
    /// Returns `Error::Allocation` if the byte size overflows or the
    /// allocator fails.
    fn create_tensor(&self, dtype: DType, shape: Shape) -> Result<Arc<Tensor>>;

    /// Wrap caller memory in a tensor. Nothing is allocated or freed.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of
    /// `shape.numel() * dtype.size_in_bytes()` bytes for as long as the tensor
    /// is used.
    unsafe fn create_tensor_from_ptr(
        &self,
        dtype: DType,
        shape: Shape,
        ptr: *mut u8,
    ) -> Result<Arc<Tensor>>;

    /// Compile `function`, or reuse the cached compilation of it.
    ///
    /// The returned Executable shares the cached compiled artifact and carries
    /// its own `enable_timing` flag.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedOperator` naming the first node this backend
    /// cannot run. A failed compile leaves the cache as it was.
    fn compile(&self, function: &Arc<Function>, enable_timing: bool)
        -> Result<Arc<dyn Executable>>;

    /// [`Backend::compile`] with the configured default timing flag.
    fn compile_default(&self, function: &Arc<Function>) -> Result<Arc<dyn Executable>> {
        self.compile(function, self.config().timing_by_default)
    }

    /// Whether this backend can lower `node`.
    fn is_supported(&self, node: &Node) -> bool;

    /// Drop the cached compilation of `function`. Executables already handed
    /// out keep working. Returns true if a compilation was evicted.
    fn remove_compiled_function(&self, function: &Function) -> bool;

    /// Recover the concrete backend type.
    fn as_any(&self) -> &dyn Any;
}

/// One row of [`Executable::performance_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformanceCounter {
    /// Name of the node the kernel was lowered from.
    pub name: String,
    /// Cumulative wall time over all calls.
    pub total_micros: u64,
    pub call_count: u64,
}

impl PerformanceCounter {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        PerformanceCounter {
            name: name.into(),
            total_micros: 0,
            call_count: 0,
        }
    }
}

/// A compiled Function bound to no particular buffers.
pub trait Executable: Send + Sync + Debug {
    /// Run the compiled Function, reading `inputs` and writing `outputs`.
    ///
    /// Counts, element types and shapes are checked before any kernel runs.
    /// Outputs are written only once every kernel has succeeded, so a failed
    /// call leaves them untouched. Calls on one Executable are serialised.
    ///
    /// # Errors
    /// `InvalidArgument` for a wrong tensor count, `TypeMismatch` and
    /// `ShapeMismatch` for incompatible tensors, `Kernel` (or
    /// `InvalidArgument` for a runtime-supplied attribute) when a kernel fails.
    fn call(&self, outputs: &[Arc<Tensor>], inputs: &[Arc<Tensor>]) -> Result<()>;

    /// Per-kernel timings in execution order; empty unless the Executable
    /// was compiled with timing enabled.
    fn performance_data(&self) -> Vec<PerformanceCounter>;

    /// Declared element type and partial shape of each input.
    fn parameters(&self) -> &[OutputDesc];

    /// Declared element type and partial shape of each output.
    fn results(&self) -> &[OutputDesc];

    fn as_any(&self) -> &dyn Any;
}
