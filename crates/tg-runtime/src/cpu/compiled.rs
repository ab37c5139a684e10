//! Lowered form of a Function: a flat list of kernel steps over numbered
//! value slots, plus the entry point that runs them.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ptr;
use std::sync::Arc;
use std::time::Instant;

use tg_graph::{Function, FunctionId, NodeId, Op, Output, OutputDesc};
use tg_tensor::{AlignedBuffer, DType, PartialShape, Shape, Tensor};

use super::kernels::{self, View};
use crate::backend::PerformanceCounter;
use crate::error::{Error, Result};

/// Per-call state handed to [`CompiledFunction::run`].
pub(crate) struct RuntimeContext<'a> {
    /// Concrete shape of every value slot, from [`CompiledFunction::bind`].
    pub shapes: &'a [Shape],
    /// One counter per step when timing is enabled.
    pub counters: Option<&'a mut [PerformanceCounter]>,
}

#[derive(Debug)]
struct Step {
    name: String,
    op: Op,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

#[derive(Debug)]
struct ConstantValue {
    slot: usize,
    shape: Shape,
    data: AlignedBuffer,
}

enum Value<'c> {
    Owned(AlignedBuffer),
    Constant(&'c AlignedBuffer),
}

impl Value<'_> {
    fn buffer(&self) -> &AlignedBuffer {
        match self {
            Value::Owned(buf) => buf,
            Value::Constant(buf) => buf,
        }
    }
}

/// Backend artifact for one Function. Shared by every Executable compiled
/// from that Function.
#[derive(Debug)]
pub struct CompiledFunction {
    name: String,
    function_id: FunctionId,
    parameters: Vec<OutputDesc>,
    results: Vec<OutputDesc>,
    slot_types: Vec<DType>,
    parameter_slots: Vec<usize>,
    result_slots: Vec<usize>,
    constants: Vec<ConstantValue>,
    steps: Vec<Step>,
    /// Slot shapes when every parameter shape is static.
    static_plan: Option<Vec<Shape>>,
    alignment: usize,
}

fn slot_of(ids: &HashMap<(NodeId, usize), usize>, output: &Output) -> Result<usize> {
    ids.get(&(output.node().id(), output.index()))
        .copied()
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "{} is read before it is produced",
                output.node().name()
            ))
        })
}

impl CompiledFunction {
    /// Lower `function` in its topological order.
    ///
    /// Constants are materialised into aligned buffers once, here.
    pub(crate) fn lower(function: &Function, alignment: usize) -> Result<Self> {
        let mut ids: HashMap<(NodeId, usize), usize> = HashMap::new();
        let mut slot_types = Vec::new();
        let mut constants = Vec::new();
        let mut steps = Vec::new();

        for node in function.ordered_ops() {
            let mut outputs = Vec::with_capacity(node.outputs().len());
            for (index, desc) in node.outputs().iter().enumerate() {
                let slot = slot_types.len();
                slot_types.push(desc.dtype);
                ids.insert((node.id(), index), slot);
                outputs.push(slot);
            }

            match node.op() {
                Op::Parameter { .. } => {}
                Op::Constant { dtype, shape, data } => {
                    let mut buf =
                        AlignedBuffer::zeroed(data.len(), alignment.max(dtype.size_in_bytes()))?;
                    buf.as_mut_slice().copy_from_slice(data);
                    constants.push(ConstantValue {
                        slot: outputs[0],
                        shape: shape.clone(),
                        data: buf,
                    });
                }
                op => {
                    let inputs = node
                        .inputs()
                        .iter()
                        .map(|input| slot_of(&ids, input))
                        .collect::<Result<Vec<_>>>()?;
                    steps.push(Step {
                        name: node.name().to_string(),
                        op: op.clone(),
                        inputs,
                        outputs,
                    });
                }
            }
        }

        let parameter_slots = function
            .parameters()
            .iter()
            .map(|p| slot_of(&ids, &Output::from(p)))
            .collect::<Result<Vec<_>>>()?;
        let result_slots = function
            .results()
            .iter()
            .map(|r| slot_of(&ids, r))
            .collect::<Result<Vec<_>>>()?;

        let mut compiled = CompiledFunction {
            name: function.name().to_string(),
            function_id: function.id(),
            parameters: function.parameter_descs(),
            results: function.result_descs(),
            slot_types,
            parameter_slots,
            result_slots,
            constants,
            steps,
            static_plan: None,
            alignment,
        };

        let static_inputs: Option<Vec<Shape>> = compiled
            .parameters
            .iter()
            .map(|p| p.shape.to_shape())
            .collect();
        if let Some(shapes) = static_inputs {
            compiled.static_plan = Some(compiled.plan(&shapes)?);
        }
        Ok(compiled)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_id(&self) -> FunctionId {
        self.function_id
    }

    pub fn parameters(&self) -> &[OutputDesc] {
        &self.parameters
    }

    pub fn results(&self) -> &[OutputDesc] {
        &self.results
    }

    /// Names of the kernel steps in execution order.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn kernel_count(&self) -> usize {
        self.steps.len()
    }

    /// True if shapes are re-derived on every call.
    pub fn is_dynamic(&self) -> bool {
        self.static_plan.is_none()
    }

    fn slot_alignment(&self, slot: usize) -> usize {
        self.alignment.max(self.slot_types[slot].size_in_bytes())
    }

    /// Derive the concrete shape of every slot from the input shapes.
    fn plan(&self, input_shapes: &[Shape]) -> Result<Vec<Shape>> {
        let mut shapes: Vec<Option<Shape>> = vec![None; self.slot_types.len()];
        for (&slot, shape) in self.parameter_slots.iter().zip(input_shapes) {
            shapes[slot] = Some(shape.clone());
        }
        for constant in &self.constants {
            shapes[constant.slot] = Some(constant.shape.clone());
        }

        for step in &self.steps {
            let inputs = step
                .inputs
                .iter()
                .map(|&slot| {
                    let shape = shapes[slot].as_ref().ok_or_else(|| {
                        Error::InvalidArgument(format!("{}: input has no shape", step.name))
                    })?;
                    Ok((self.slot_types[slot], PartialShape::from(shape)))
                })
                .collect::<Result<Vec<_>>>()?;
            let derived = step.op.infer(&inputs).map_err(|e| Error::ShapeMismatch {
                what: step.name.clone(),
                reason: e.to_string(),
            })?;
            for (&slot, (_, shape)) in step.outputs.iter().zip(derived) {
                let concrete = shape.to_shape().ok_or_else(|| Error::ShapeMismatch {
                    what: step.name.clone(),
                    reason: format!("output shape {shape} is not fully determined"),
                })?;
                shapes[slot] = Some(concrete);
            }
        }

        shapes
            .into_iter()
            .enumerate()
            .map(|(slot, shape)| {
                shape.ok_or_else(|| {
                    Error::InvalidArgument(format!("{}: slot {slot} has no shape", self.name))
                })
            })
            .collect()
    }

    /// Check a call's tensors against the signature and derive every slot
    /// shape. Nothing is read or written.
    pub(crate) fn bind(
        &self,
        outputs: &[Arc<Tensor>],
        inputs: &[Arc<Tensor>],
    ) -> Result<Cow<'_, [Shape]>> {
        if inputs.len() != self.parameters.len() || outputs.len() != self.results.len() {
            return Err(Error::ShapeMismatch {
                what: format!("{} arguments", self.name),
                reason: format!(
                    "takes {} inputs and {} outputs, got {} and {}",
                    self.parameters.len(),
                    self.results.len(),
                    inputs.len(),
                    outputs.len()
                ),
            });
        }
        for (i, (tensor, desc)) in inputs.iter().zip(&self.parameters).enumerate() {
            if tensor.dtype() != desc.dtype {
                return Err(Error::TypeMismatch {
                    what: format!("input {i}"),
                    expected: desc.dtype,
                    got: tensor.dtype(),
                });
            }
            if !desc.shape.compatible(tensor.shape()) {
                return Err(Error::ShapeMismatch {
                    what: format!("input {i}"),
                    reason: format!("expected {}, got {}", desc.shape, tensor.shape()),
                });
            }
        }

        let plan = match &self.static_plan {
            Some(plan) => Cow::Borrowed(plan.as_slice()),
            None => {
                let shapes: Vec<Shape> = inputs.iter().map(|t| t.shape().clone()).collect();
                Cow::Owned(self.plan(&shapes)?)
            }
        };

        for (i, ((tensor, desc), &slot)) in outputs
            .iter()
            .zip(&self.results)
            .zip(&self.result_slots)
            .enumerate()
        {
            if tensor.dtype() != desc.dtype {
                return Err(Error::TypeMismatch {
                    what: format!("output {i}"),
                    expected: desc.dtype,
                    got: tensor.dtype(),
                });
            }
            if tensor.shape() != &plan[slot] {
                return Err(Error::ShapeMismatch {
                    what: format!("output {i}"),
                    reason: format!("expected {}, got {}", plan[slot], tensor.shape()),
                });
            }
        }
        Ok(plan)
    }

    /// Entry point. `args` holds the raw buffers of the inputs followed by
    /// the outputs, already validated by [`CompiledFunction::bind`].
    ///
    /// Inputs are staged into aligned scratch before the first kernel and
    /// outputs are written after the last one, so inputs and outputs may
    /// share memory and a failed call writes nothing.
    pub(crate) fn run(&self, args: &[*mut u8], ctx: &mut RuntimeContext<'_>) -> Result<()> {
        let n_inputs = self.parameter_slots.len();
        if args.len() != n_inputs + self.result_slots.len() {
            return Err(Error::ShapeMismatch {
                what: format!("{} arguments", self.name),
                reason: format!(
                    "expected {} buffers, got {}",
                    n_inputs + self.result_slots.len(),
                    args.len()
                ),
            });
        }

        let shapes = ctx.shapes;
        let mut values: Vec<Option<Value<'_>>> = (0..self.slot_types.len()).map(|_| None).collect();
        for (&slot, &arg) in self.parameter_slots.iter().zip(args) {
            let bytes = self.slot_bytes(shapes, slot);
            let mut buf = AlignedBuffer::zeroed(bytes, self.slot_alignment(slot))?;
            // SAFETY: `arg` is the buffer of a live input tensor whose shape
            // and element type were checked against this slot, so it holds
            // exactly `bytes` bytes.
            unsafe {
                ptr::copy_nonoverlapping(arg, buf.as_mut_slice().as_mut_ptr(), bytes);
            }
            values[slot] = Some(Value::Owned(buf));
        }
        for constant in &self.constants {
            values[constant.slot] = Some(Value::Constant(&constant.data));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let mut outputs = step
                .outputs
                .iter()
                .map(|&slot| {
                    AlignedBuffer::zeroed(self.slot_bytes(shapes, slot), self.slot_alignment(slot))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let started = ctx.counters.is_some().then(Instant::now);
            {
                let views = step
                    .inputs
                    .iter()
                    .map(|&slot| {
                        let value = values[slot].as_ref().ok_or_else(|| {
                            Error::kernel(&step.name, format!("slot {slot} is unset"))
                        })?;
                        Ok(View {
                            dtype: self.slot_types[slot],
                            shape: &shapes[slot],
                            buffer: value.buffer(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                kernels::execute(&step.name, &step.op, &views, &mut outputs)?;
            }
            if let (Some(started), Some(counters)) = (started, ctx.counters.as_deref_mut()) {
                if let Some(counter) = counters.get_mut(index) {
                    counter.total_micros += started.elapsed().as_micros() as u64;
                    counter.call_count += 1;
                }
            }

            for (&slot, buf) in step.outputs.iter().zip(outputs) {
                values[slot] = Some(Value::Owned(buf));
            }
        }

        for (&slot, &arg) in self.result_slots.iter().zip(&args[n_inputs..]) {
            let value = values[slot].as_ref().ok_or_else(|| {
                Error::InvalidArgument(format!("{}: result slot {slot} is unset", self.name))
            })?;
            let src = value.buffer().as_slice();
            // SAFETY: `arg` is the buffer of a live output tensor whose shape
            // and element type equal this slot's, so it holds `src.len()`
            // bytes. `copy` allows the output to alias an input.
            unsafe {
                ptr::copy(src.as_ptr(), arg, src.len());
            }
        }
        Ok(())
    }

    fn slot_bytes(&self, shapes: &[Shape], slot: usize) -> usize {
        shapes[slot].numel() * self.slot_types[slot].size_in_bytes()
    }

    /// Fresh per-step counters for an Executable with timing enabled.
    pub(crate) fn counters(&self) -> Vec<PerformanceCounter> {
        self.steps
            .iter()
            .map(|s| PerformanceCounter::new(s.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_graph::ops;

    #[test]
    fn test_lowering_skips_parameters_and_constants() {
        let a = ops::parameter(DType::F32, Shape::from([2]));
        let c = ops::constant(Shape::from([2]), &[1.0f32, 2.0]).unwrap();
        let sum = ops::add(&a, &c).unwrap();
        let f = Function::new(vec![Output::from(&sum)], vec![a]).unwrap();
        let compiled = CompiledFunction::lower(&f, 64).unwrap();
        assert_eq!(compiled.kernel_count(), 1);
        assert_eq!(compiled.kernel_names(), vec![sum.name()]);
        assert!(!compiled.is_dynamic());
        assert_eq!(compiled.function_id(), f.id());
    }

    #[test]
    fn test_static_plan() {
        let x = ops::parameter(DType::I32, Shape::from([3, 2, 4]));
        let scan = ops::cum_sum(&x, 1).unwrap();
        let f = Function::new(vec![Output::from(&scan)], vec![x]).unwrap();
        let compiled = CompiledFunction::lower(&f, 64).unwrap();
        let plan = compiled.static_plan.as_ref().unwrap();
        assert!(plan.iter().all(|s| s == &Shape::from([3, 2, 4])));
    }
}
