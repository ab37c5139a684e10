//! Attributes and shape rules of the fused recurrent-cell node.
//!
//! One `Rnn` node stands for `num_fused_layers` stacked recurrent layers, each
//! unrolled over `num_timesteps` steps. Inputs, in order:
//!
//! 0. `src_layer`: TNC layer input, shape `(num_timesteps * batch, src_layer_feature_size)`
//! 1. `src_iter`: initial hidden state, shape `(num_fused_layers * batch, src_iter_feature_size)`
//! 2. `params`: flat weights and biases, see [`RnnAttrs::param_layout`]
//! 3. `state_iter`: initial cell state, same shape as `src_iter`; ignored unless LSTM
//!
//! Outputs: the sequence-wise hidden states of the top layer
//! `(src_sequence_length * batch, H)`, the final hidden state of every layer
//! `(num_fused_layers * batch, H)` and, for LSTM only, the final cell state
//! with the shape of `state_iter`.

use std::ops::Range;

use tg_tensor::{DType, Dimension, PartialShape};

use crate::error::{GraphError, Result};

const OP: &str = "Rnn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Unidirectional,
    Bidirectional,
}

impl Direction {
    /// Decode the direction count used by graph producers: 1 or 2.
    ///
    /// # Errors
    /// Any other value is rejected with `InvalidArgument`.
    pub fn from_count(count: i64) -> Result<Self> {
        match count {
            1 => Ok(Direction::Unidirectional),
            2 => Ok(Direction::Bidirectional),
            other => Err(GraphError::invalid(
                OP,
                format!("direction must be 1 (uni) or 2 (bi), got {other}"),
            )),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Direction::Unidirectional => 1,
            Direction::Bidirectional => 2,
        }
    }
}

/// The elementary cell, selected by the number of gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// One tanh gate.
    Vanilla,
    /// Gates `[r, z, n]`.
    Gru,
    /// Gates `[i, f, g, o]` with a separate cell-state carry.
    Lstm,
}

impl CellKind {
    pub fn from_gates(gates: usize) -> Option<Self> {
        match gates {
            1 => Some(CellKind::Vanilla),
            3 => Some(CellKind::Gru),
            4 => Some(CellKind::Lstm),
            _ => None,
        }
    }

    pub fn gates(&self) -> usize {
        match self {
            CellKind::Vanilla => 1,
            CellKind::Gru => 3,
            CellKind::Lstm => 4,
        }
    }

    pub fn has_cell_state(&self) -> bool {
        matches!(self, CellKind::Lstm)
    }
}

/// Where one (layer, direction) unit finds its weights in the flat parameter
/// tensor. Ranges are in elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitParams {
    pub layer: usize,
    /// 0 for the forward pass, 1 for the backward pass.
    pub direction: usize,
    pub input_size: usize,
    /// Row-major `(gates * H_d, input_size)`.
    pub weights_x: Range<usize>,
    /// Row-major `(gates * H_d, H_d)`.
    pub weights_h: Range<usize>,
    pub bias_x: Range<usize>,
    pub bias_h: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RnnAttrs {
    num_timesteps: usize,
    cell: CellKind,
    src_sequence_length: usize,
    src_layer_feature_size: usize,
    src_iter_feature_size: usize,
    direction: Direction,
    num_fused_layers: usize,
}

impl RnnAttrs {
    /// Validate and build the attribute set.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a gate count other than 1, 3 or 4, a
    /// direction other than 1 or 2, zero sizes, a sequence length that differs
    /// from the timestep count, or an odd hidden size for a bidirectional cell.
    pub fn new(
        num_timesteps: usize,
        num_gates_per_cell: usize,
        src_sequence_length: usize,
        src_layer_feature_size: usize,
        src_iter_feature_size: usize,
        direction: i64,
        num_fused_layers: usize,
    ) -> Result<Self> {
        let cell = CellKind::from_gates(num_gates_per_cell).ok_or_else(|| {
            GraphError::invalid(
                OP,
                format!("num_gates_per_cell must be 1, 3 or 4, got {num_gates_per_cell}"),
            )
        })?;
        let direction = Direction::from_count(direction)?;
        if num_timesteps == 0 || num_fused_layers == 0 {
            return Err(GraphError::invalid(
                OP,
                "num_timesteps and num_fused_layers must be positive",
            ));
        }
        if src_layer_feature_size == 0 || src_iter_feature_size == 0 {
            return Err(GraphError::invalid(OP, "feature sizes must be positive"));
        }
        if src_sequence_length != num_timesteps {
            return Err(GraphError::invalid(
                OP,
                format!(
                    "src_sequence_length ({src_sequence_length}) must equal num_timesteps ({num_timesteps})"
                ),
            ));
        }
        if direction == Direction::Bidirectional && src_iter_feature_size % 2 != 0 {
            return Err(GraphError::invalid(
                OP,
                format!(
                    "bidirectional cells split the hidden size in two, got odd size {src_iter_feature_size}"
                ),
            ));
        }
        let attrs = RnnAttrs {
            num_timesteps,
            cell,
            src_sequence_length,
            src_layer_feature_size,
            src_iter_feature_size,
            direction,
            num_fused_layers,
        };
        if attrs.checked_param_count().is_none() {
            return Err(GraphError::invalid(
                OP,
                "parameter tensor size overflows usize",
            ));
        }
        Ok(attrs)
    }

    /// Size of the parameter tensor, or `None` on overflow. Every offset in
    /// [`RnnAttrs::param_layout`] is bounded by this total.
    fn checked_param_count(&self) -> Option<usize> {
        let gates = self.cell.gates();
        let hd = self.direction_hidden_size();
        let block = gates.checked_mul(hd)?;
        let mut total = 0usize;
        for layer in 0..self.num_fused_layers {
            let width = self.layer_input_size(layer).checked_add(hd)?.checked_add(2)?;
            let unit = block.checked_mul(width)?;
            total = total.checked_add(unit.checked_mul(self.direction.count())?)?;
        }
        Some(total)
    }

    pub fn num_timesteps(&self) -> usize {
        self.num_timesteps
    }

    pub fn cell(&self) -> CellKind {
        self.cell
    }

    pub fn gates_per_cell(&self) -> usize {
        self.cell.gates()
    }

    pub fn src_sequence_length(&self) -> usize {
        self.src_sequence_length
    }

    pub fn src_layer_feature_size(&self) -> usize {
        self.src_layer_feature_size
    }

    pub fn src_iter_feature_size(&self) -> usize {
        self.src_iter_feature_size
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn num_fused_layers(&self) -> usize {
        self.num_fused_layers
    }

    /// Hidden size of one direction: `H` or `H / 2`.
    pub fn direction_hidden_size(&self) -> usize {
        self.src_iter_feature_size / self.direction.count()
    }

    pub fn layer_input_size(&self, layer: usize) -> usize {
        if layer == 0 {
            self.src_layer_feature_size
        } else {
            self.src_iter_feature_size
        }
    }

    /// 3 for LSTM (hidden sequence, final hidden, final cell), else 2.
    pub fn output_count(&self) -> usize {
        if self.cell.has_cell_state() {
            3
        } else {
            2
        }
    }

    /// Offsets of every (layer, direction) unit in the flat parameter tensor.
    ///
    /// Layout: for each unit in order `l0-fwd, l0-bwd, l1-fwd, ...` the input
    /// weights then the hidden weights; then the input biases of all units;
    /// then the hidden biases of all units.
    pub fn param_layout(&self) -> Vec<UnitParams> {
        let gates = self.cell.gates();
        let hd = self.direction_hidden_size();
        let mut offset = 0;
        let mut take = |len: usize| {
            let r = offset..offset + len;
            offset += len;
            r
        };

        let mut units = Vec::with_capacity(self.num_fused_layers * self.direction.count());
        for layer in 0..self.num_fused_layers {
            let input_size = self.layer_input_size(layer);
            for direction in 0..self.direction.count() {
                let weights_x = take(gates * hd * input_size);
                let weights_h = take(gates * hd * hd);
                units.push(UnitParams {
                    layer,
                    direction,
                    input_size,
                    weights_x,
                    weights_h,
                    bias_x: 0..0,
                    bias_h: 0..0,
                });
            }
        }
        for unit in units.iter_mut() {
            unit.bias_x = take(gates * hd);
        }
        for unit in units.iter_mut() {
            unit.bias_h = take(gates * hd);
        }
        units
    }

    /// Total number of elements the parameter tensor must hold.
    pub fn param_count(&self) -> usize {
        self.param_layout()
            .last()
            .map(|u| u.bias_h.end)
            .unwrap_or(0)
    }

    pub(crate) fn infer(
        &self,
        inputs: &[(DType, PartialShape)],
    ) -> Result<Vec<(DType, PartialShape)>> {
        let [x, hx, params, cx] = inputs else {
            return Err(GraphError::InputCount {
                op: OP,
                expected: 4,
                got: inputs.len(),
            });
        };
        let dtype = x.0;
        if !dtype.is_real() {
            return Err(GraphError::invalid(
                OP,
                format!("element type must be floating point, got {dtype}"),
            ));
        }
        let mut typed = vec![hx, params];
        if self.cell.has_cell_state() {
            typed.push(cx);
        }
        for input in typed {
            if input.0 != dtype {
                return Err(GraphError::TypeMismatch {
                    op: OP,
                    expected: dtype,
                    got: input.0,
                });
            }
        }

        let h = self.src_iter_feature_size;
        let layers = self.num_fused_layers;

        let (x_rows, x_cols) = matrix("src_layer", &x.1)?;
        if !x_cols.compatible(self.src_layer_feature_size) {
            return Err(GraphError::invalid(
                OP,
                format!(
                    "src_layer has {x_cols} features, expected {}",
                    self.src_layer_feature_size
                ),
            ));
        }
        let mut batch = match x_rows {
            Dimension::Static(rows) => {
                Dimension::Static(exact_div(rows, self.num_timesteps, "src_layer rows")?)
            }
            Dimension::Dynamic => Dimension::Dynamic,
        };

        let (h_rows, h_cols) = matrix("src_iter", &hx.1)?;
        if !h_cols.compatible(h) {
            return Err(GraphError::invalid(
                OP,
                format!("src_iter has {h_cols} features, expected {h}"),
            ));
        }
        if let Dimension::Static(rows) = h_rows {
            let from_state = Dimension::Static(exact_div(rows, layers, "src_iter rows")?);
            batch = batch.merge(from_state).ok_or_else(|| {
                GraphError::invalid(
                    OP,
                    format!("src_layer implies batch {batch}, src_iter implies {from_state}"),
                )
            })?;
        }

        if let Some(dims) = params.1.dims() {
            let expected = self.param_count();
            match dims {
                [n] if n.compatible(expected) => {}
                _ => {
                    return Err(GraphError::invalid(
                        OP,
                        format!("params must have shape [{expected}], got {}", params.1),
                    ))
                }
            }
        }

        let scaled = |k: usize| {
            batch.checked_scale(k).ok_or_else(|| {
                GraphError::invalid(OP, format!("batch {batch} times {k} overflows usize"))
            })
        };
        let state_shape = PartialShape::new(vec![scaled(layers)?, Dimension::Static(h)]);
        let mut outputs = vec![
            (
                dtype,
                PartialShape::new(vec![
                    scaled(self.src_sequence_length)?,
                    Dimension::Static(h),
                ]),
            ),
            (dtype, state_shape.clone()),
        ];
        if self.cell.has_cell_state() {
            let cell_shape =
                state_shape
                    .merge(&cx.1)
                    .ok_or_else(|| GraphError::ShapeMismatch {
                        op: OP,
                        a: state_shape.clone(),
                        b: cx.1.clone(),
                    })?;
            outputs.push((dtype, cell_shape));
        }
        Ok(outputs)
    }
}

fn matrix(what: &str, shape: &PartialShape) -> Result<(Dimension, Dimension)> {
    match shape.dims() {
        None => Ok((Dimension::Dynamic, Dimension::Dynamic)),
        Some([rows, cols]) => Ok((*rows, *cols)),
        Some(_) => Err(GraphError::invalid(
            OP,
            format!("{what} must be rank 2, got {shape}"),
        )),
    }
}

fn exact_div(n: usize, d: usize, what: &str) -> Result<usize> {
    if n % d != 0 {
        return Err(GraphError::invalid(
            OP,
            format!("{what} ({n}) is not a multiple of {d}"),
        ));
    }
    Ok(n / d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_tensor::Shape;

    fn lstm(layers: usize, direction: i64) -> RnnAttrs {
        RnnAttrs::new(3, 4, 3, 5, 4, direction, layers).unwrap()
    }

    #[test]
    fn test_rejects_bad_attributes() {
        assert!(RnnAttrs::new(3, 2, 3, 5, 4, 1, 1).is_err());
        assert!(RnnAttrs::new(3, 4, 3, 5, 4, 0, 1).is_err());
        assert!(RnnAttrs::new(3, 4, 3, 5, 4, 3, 1).is_err());
        assert!(RnnAttrs::new(3, 4, 2, 5, 4, 1, 1).is_err());
        assert!(RnnAttrs::new(0, 4, 0, 5, 4, 1, 1).is_err());
        assert!(RnnAttrs::new(3, 4, 3, 5, 5, 2, 1).is_err());
        assert!(matches!(
            RnnAttrs::new(3, 4, 3, 5, 4, -1, 1),
            Err(GraphError::InvalidArgument { op: "Rnn", .. })
        ));
    }

    #[test]
    fn test_rejects_overflowing_sizes() {
        let huge = usize::MAX / 2;
        assert!(matches!(
            RnnAttrs::new(1, 4, 1, huge, 4, 1, 1),
            Err(GraphError::InvalidArgument { op: "Rnn", .. })
        ));
        assert!(RnnAttrs::new(1, 4, 1, 8, huge & !1, 2, 3).is_err());
        assert!(RnnAttrs::new(1, 1, 1, 1 << 20, 1 << 20, 1, 1).is_ok());
    }

    #[test]
    fn test_infer_rejects_overflowing_batch() {
        let attrs = RnnAttrs::new(2, 1, 2, 3, 4, 1, 4).unwrap();
        let p = attrs.param_count();
        let rows = usize::MAX - 1;
        let inputs = vec![
            (DType::F32, PartialShape::from(Shape::from([rows, 3]))),
            (DType::F32, PartialShape::dynamic()),
            (DType::F32, PartialShape::from(Shape::from([p]))),
            (DType::F32, PartialShape::dynamic()),
        ];
        assert!(matches!(
            attrs.infer(&inputs),
            Err(GraphError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_param_layout_unidirectional() {
        let attrs = lstm(2, 1);
        let units = attrs.param_layout();
        assert_eq!(units.len(), 2);
        // layer 0: Wx 16x5, Wh 16x4
        assert_eq!(units[0].weights_x, 0..80);
        assert_eq!(units[0].weights_h, 80..144);
        // layer 1 input is the hidden size
        assert_eq!(units[1].input_size, 4);
        assert_eq!(units[1].weights_x, 144..208);
        assert_eq!(units[1].weights_h, 208..272);
        // all input biases, then all hidden biases
        assert_eq!(units[0].bias_x, 272..288);
        assert_eq!(units[1].bias_x, 288..304);
        assert_eq!(units[0].bias_h, 304..320);
        assert_eq!(units[1].bias_h, 320..336);
        assert_eq!(attrs.param_count(), 336);
    }

    #[test]
    fn test_param_layout_bidirectional() {
        let attrs = RnnAttrs::new(2, 1, 2, 3, 4, 2, 1).unwrap();
        let units = attrs.param_layout();
        assert_eq!(attrs.direction_hidden_size(), 2);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].direction, 1);
        assert_eq!(units[0].weights_x, 0..6);
        assert_eq!(units[0].weights_h, 6..10);
        assert_eq!(units[1].weights_x, 10..16);
        assert_eq!(units[1].weights_h, 16..20);
        assert_eq!(units[0].bias_x, 20..22);
        assert_eq!(units[1].bias_h, 26..28);
        assert_eq!(attrs.param_count(), 28);
    }

    #[test]
    fn test_infer_shapes() {
        let attrs = lstm(2, 1);
        let p = attrs.param_count();
        let inputs = vec![
            (DType::F32, PartialShape::from(Shape::from([6, 5]))),
            (DType::F32, PartialShape::from(Shape::from([4, 4]))),
            (DType::F32, PartialShape::from(Shape::from([p]))),
            (DType::F32, PartialShape::from(Shape::from([4, 4]))),
        ];
        let out = attrs.infer(&inputs).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].1.to_shape(), Some(Shape::from([6, 4])));
        assert_eq!(out[1].1.to_shape(), Some(Shape::from([4, 4])));
        assert_eq!(out[2].1.to_shape(), Some(Shape::from([4, 4])));
    }

    #[test]
    fn test_infer_dynamic_batch() {
        let attrs = RnnAttrs::new(3, 3, 3, 5, 4, 1, 2).unwrap();
        let p = attrs.param_count();
        let dynamic_rows = PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(5)]);
        let inputs = vec![
            (DType::F32, dynamic_rows),
            (DType::F32, PartialShape::dynamic()),
            (DType::F32, PartialShape::from(Shape::from([p]))),
            (DType::F32, PartialShape::dynamic()),
        ];
        let out = attrs.infer(&inputs).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].1.is_dynamic());
        assert_eq!(out[0].1.rank(), Some(2));
    }

    #[test]
    fn test_infer_rejects_inconsistent_batch() {
        let attrs = lstm(1, 1);
        let p = attrs.param_count();
        let inputs = vec![
            (DType::F32, PartialShape::from(Shape::from([6, 5]))),
            (DType::F32, PartialShape::from(Shape::from([3, 4]))),
            (DType::F32, PartialShape::from(Shape::from([p]))),
            (DType::F32, PartialShape::from(Shape::from([3, 4]))),
        ];
        assert!(attrs.infer(&inputs).is_err());
    }

    #[test]
    fn test_infer_rejects_wrong_param_count() {
        let attrs = lstm(1, 1);
        let inputs = vec![
            (DType::F32, PartialShape::from(Shape::from([6, 5]))),
            (DType::F32, PartialShape::from(Shape::from([2, 4]))),
            (DType::F32, PartialShape::from(Shape::from([7]))),
            (DType::F32, PartialShape::from(Shape::from([2, 4]))),
        ];
        assert!(attrs.infer(&inputs).is_err());
    }
}
