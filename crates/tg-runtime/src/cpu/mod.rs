//! Host backends: `CPU`, with the fused recurrent-cell kernel, and
//! `INTERPRETER`, a reference backend that runs only the elementary ops.

pub mod compiled;
pub(crate) mod kernels;

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use tg_graph::{Function, Node, Op, OutputDesc};
use tg_tensor::{DType, Shape, Tensor};
use tracing::{debug, debug_span, info, warn};

use crate::backend::{Backend, Executable, PerformanceCounter};
use crate::cache::CompileCache;
use crate::config::BackendConfig;
use crate::error::{Error, Phase, Result};
use compiled::{CompiledFunction, RuntimeContext};

pub const CPU: &str = "CPU";
pub const INTERPRETER: &str = "INTERPRETER";

#[derive(Debug)]
pub struct CpuBackend {
    name: &'static str,
    config: BackendConfig,
    fused_rnn: bool,
    cache: CompileCache<CompiledFunction>,
}

impl CpuBackend {
    /// The `CPU` backend.
    ///
    /// # Errors
    /// Returns `Error::Config` if `config` does not validate.
    pub fn new(config: BackendConfig) -> Result<Self> {
        Self::build(CPU, config, true)
    }

    /// The `INTERPRETER` backend: same kernels, no fused `Rnn`.
    pub fn interpreter(config: BackendConfig) -> Result<Self> {
        Self::build(INTERPRETER, config, false)
    }

    fn build(name: &'static str, config: BackendConfig, fused_rnn: bool) -> Result<Self> {
        config.validate()?;
        debug!(backend = name, alignment = config.alignment, "backend created");
        Ok(CpuBackend {
            name,
            config,
            fused_rnn,
            cache: CompileCache::new(),
        })
    }

    /// Number of Functions lowered so far. Cache hits do not count.
    pub fn compilations(&self) -> u64 {
        self.cache.compilations()
    }

    /// Number of Functions with a cached compilation.
    pub fn cached_functions(&self) -> usize {
        self.cache.len()
    }

    fn tensor_alignment(&self, dtype: DType) -> usize {
        self.config.alignment.max(dtype.size_in_bytes())
    }

    fn lower(&self, function: &Function) -> Result<CompiledFunction> {
        if let Some(node) = function.ordered_ops().iter().find(|n| !self.is_supported(n)) {
            warn!(
                backend = self.name,
                function = function.name(),
                node = node.name(),
                "unsupported operator"
            );
            return Err(Error::UnsupportedOperator {
                backend: self.name.to_string(),
                node: node.name().to_string(),
            });
        }
        let compiled = CompiledFunction::lower(function, self.config.alignment).map_err(|e| {
            warn!(backend = self.name, function = function.name(), error = %e, "compilation failed");
            e.at(Phase::Compile)
        })?;
        info!(
            backend = self.name,
            function = function.name(),
            nodes = function.ordered_ops().len(),
            kernels = compiled.kernel_count(),
            dynamic = compiled.is_dynamic(),
            "compiled function"
        );
        Ok(compiled)
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn create_tensor(&self, dtype: DType, shape: Shape) -> Result<Arc<Tensor>> {
        let tensor = Tensor::zeros(dtype, shape, self.tensor_alignment(dtype))?;
        Ok(Arc::new(tensor))
    }

    unsafe fn create_tensor_from_ptr(
        &self,
        dtype: DType,
        shape: Shape,
        ptr: *mut u8,
    ) -> Result<Arc<Tensor>> {
        // SAFETY: forwarded from the caller's contract.
        let tensor = unsafe { Tensor::from_raw(dtype, shape, ptr)? };
        Ok(Arc::new(tensor))
    }

    fn compile(
        &self,
        function: &Arc<Function>,
        enable_timing: bool,
    ) -> Result<Arc<dyn Executable>> {
        let compiled = self
            .cache
            .get_or_compile(function, || self.lower(function))?;
        Ok(Arc::new(CpuExecutable::new(compiled, enable_timing)))
    }

    fn is_supported(&self, node: &Node) -> bool {
        let dtype = node.outputs().first().map(|o| o.dtype);
        match node.op() {
            Op::Parameter { .. } | Op::Constant { .. } => true,
            Op::Add | Op::Subtract | Op::Multiply | Op::CumSum(_) => {
                dtype.is_some_and(|d| d.is_numeric())
            }
            Op::Rnn(_) => self.fused_rnn && dtype == Some(DType::F32),
        }
    }

    fn remove_compiled_function(&self, function: &Function) -> bool {
        let removed = self.cache.remove(function.id());
        debug!(backend = self.name, function = function.name(), removed, "evicted");
        removed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Executable over a shared [`CompiledFunction`].
#[derive(Debug)]
pub struct CpuExecutable {
    compiled: Arc<CompiledFunction>,
    timing: bool,
    /// Held for the whole call; also serialises calls.
    counters: Mutex<Vec<PerformanceCounter>>,
}

impl CpuExecutable {
    fn new(compiled: Arc<CompiledFunction>, timing: bool) -> Self {
        let counters = if timing {
            compiled.counters()
        } else {
            Vec::new()
        };
        CpuExecutable {
            compiled,
            timing,
            counters: Mutex::new(counters),
        }
    }

    pub fn compiled(&self) -> &Arc<CompiledFunction> {
        &self.compiled
    }

    pub fn timing_enabled(&self) -> bool {
        self.timing
    }
}

impl Executable for CpuExecutable {
    fn call(&self, outputs: &[Arc<Tensor>], inputs: &[Arc<Tensor>]) -> Result<()> {
        let span = debug_span!("call", function = self.compiled.name());
        let _enter = span.enter();

        let shapes = self
            .compiled
            .bind(outputs, inputs)
            .map_err(|e| e.at(Phase::Call))?;
        let args: Vec<*mut u8> = inputs.iter().chain(outputs).map(|t| t.as_ptr()).collect();
        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            "marshalled arguments"
        );

        let mut counters = self.counters.lock();
        let mut ctx = RuntimeContext {
            shapes: &shapes,
            counters: self.timing.then_some(counters.as_mut_slice()),
        };
        self.compiled
            .run(&args, &mut ctx)
            .map_err(|e| e.at(Phase::Call))
    }

    fn performance_data(&self) -> Vec<PerformanceCounter> {
        if !self.timing {
            return Vec::new();
        }
        self.counters.lock().clone()
    }

    fn parameters(&self) -> &[OutputDesc] {
        self.compiled.parameters()
    }

    fn results(&self) -> &[OutputDesc] {
        self.compiled.results()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_graph::{ops, Output, RnnAttrs};

    fn backend() -> CpuBackend {
        CpuBackend::new(BackendConfig::default()).unwrap()
    }

    fn rnn_function() -> Arc<Function> {
        let attrs = RnnAttrs::new(2, 1, 2, 3, 4, 1, 1).unwrap();
        let x = ops::parameter(DType::F32, Shape::from([4, 3]));
        let hx = ops::parameter(DType::F32, Shape::from([2, 4]));
        let p = ops::parameter(DType::F32, Shape::from([attrs.param_count()]));
        let cx = ops::parameter(DType::F32, Shape::from([2, 4]));
        let node = ops::rnn(&x, &hx, &p, &cx, attrs).unwrap();
        Function::new(
            vec![node.output(0).unwrap(), node.output(1).unwrap()],
            vec![x, hx, p, cx],
        )
        .unwrap()
    }

    #[test]
    fn test_create_tensor_alignment() {
        let b = CpuBackend::new(BackendConfig::default().with_alignment(128)).unwrap();
        let t = b.create_tensor(DType::F32, Shape::from([3])).unwrap();
        assert_eq!(t.as_ptr() as usize % 128, 0);
        assert!(t.is_owned());
        assert_eq!(t.to_vec::<f32>().unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            CpuBackend::new(BackendConfig::default().with_alignment(3)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rnn_support_differs_by_backend() {
        let f = rnn_function();
        let rnn = f.ordered_ops().last().unwrap();
        assert!(backend().is_supported(rnn));

        let interp = CpuBackend::interpreter(BackendConfig::default()).unwrap();
        assert!(!interp.is_supported(rnn));
        let err = interp.compile(&f, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperator { ref node, .. } if node == rnn.name()));
        assert_eq!(interp.compilations(), 0);
        assert_eq!(interp.cached_functions(), 0);
    }

    #[test]
    fn test_compile_reuses_artifact() {
        let b = backend();
        let x = ops::parameter(DType::F32, Shape::from([2]));
        let sum = ops::add(&x, &x).unwrap();
        let f = Function::new(vec![Output::from(&sum)], vec![x]).unwrap();

        let e1 = b.compile(&f, false).unwrap();
        let e2 = b.compile(&f, true).unwrap();
        let c1 = e1.as_any().downcast_ref::<CpuExecutable>().unwrap();
        let c2 = e2.as_any().downcast_ref::<CpuExecutable>().unwrap();
        assert!(Arc::ptr_eq(c1.compiled(), c2.compiled()));
        assert!(!c1.timing_enabled());
        assert!(c2.timing_enabled());
        assert_eq!(b.compilations(), 1);

        assert!(b.remove_compiled_function(&f));
        assert!(!b.remove_compiled_function(&f));
        let e3 = b.compile(&f, false).unwrap();
        let c3 = e3.as_any().downcast_ref::<CpuExecutable>().unwrap();
        assert!(!Arc::ptr_eq(c1.compiled(), c3.compiled()));
        assert_eq!(b.compilations(), 2);
    }

    /// Skips `validate` so scratch allocation itself fails.
    fn misaligned_backend() -> CpuBackend {
        CpuBackend {
            name: CPU,
            config: BackendConfig {
                alignment: 3,
                timing_by_default: false,
            },
            fused_rnn: true,
            cache: CompileCache::new(),
        }
    }

    #[test]
    fn test_allocation_errors_carry_phase() {
        let b = misaligned_backend();

        let x = ops::parameter(DType::U8, Shape::from([2]));
        let c = ops::constant(Shape::from([2]), &[1u8, 2]).unwrap();
        let sum = ops::add(&x, &c).unwrap();
        let with_constant = Function::new(vec![Output::from(&sum)], vec![x]).unwrap();
        let err = b.compile(&with_constant, false).unwrap_err();
        assert!(matches!(err, Error::Allocation { alignment: 3, .. }));
        assert_eq!(err.phase(), Phase::Compile);

        let y = ops::parameter(DType::U8, Shape::from([2]));
        let twice = ops::add(&y, &y).unwrap();
        let f = Function::new(vec![Output::from(&twice)], vec![y]).unwrap();
        let exec = b.compile(&f, false).unwrap();
        let input = Arc::new(Tensor::from_slice(&[1u8, 2], Shape::from([2]), 64).unwrap());
        let output = Arc::new(Tensor::from_slice(&[7u8, 7], Shape::from([2]), 64).unwrap());
        let err = exec.call(&[output.clone()], &[input]).unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }));
        assert_eq!(err.phase(), Phase::Call);
        assert_eq!(output.to_vec::<u8>().unwrap(), vec![7, 7]);
    }

    #[test]
    fn test_performance_data() {
        let b = backend();
        let x = ops::parameter(DType::I32, Shape::from([2]));
        let sq = ops::multiply(&x, &x).unwrap();
        let out = ops::add(&sq, &x).unwrap();
        let f = Function::new(vec![Output::from(&out)], vec![x]).unwrap();

        let input = Arc::new(Tensor::from_slice(&[2i32, 3], Shape::from([2]), 64).unwrap());
        let output = b.create_tensor(DType::I32, Shape::from([2])).unwrap();

        let quiet = b.compile(&f, false).unwrap();
        quiet.call(&[output.clone()], &[input.clone()]).unwrap();
        assert!(quiet.performance_data().is_empty());

        let timed = b.compile(&f, true).unwrap();
        timed.call(&[output.clone()], &[input.clone()]).unwrap();
        timed.call(&[output.clone()], &[input]).unwrap();
        let data = timed.performance_data();
        let names: Vec<&str> = data.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![sq.name(), out.name()]);
        assert!(data.iter().all(|c| c.call_count == 2));
        assert_eq!(output.to_vec::<i32>().unwrap(), vec![6, 12]);
    }
}
