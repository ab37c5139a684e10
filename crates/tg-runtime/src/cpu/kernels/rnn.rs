//! Fused multi-layer recurrent cell, `f32` only.

use tg_graph::{CellKind, RnnAttrs};
use tg_tensor::{AlignedBuffer, DType};

use super::View;
use crate::error::{Error, Result};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// `out[r] = b[r] + sum_k w[r, k] * v[k]` with `w` row-major `(out.len(), v.len())`.
fn affine(w: &[f32], v: &[f32], b: &[f32], out: &mut [f32]) {
    let cols = v.len();
    for (r, o) in out.iter_mut().enumerate() {
        let row = &w[r * cols..(r + 1) * cols];
        let mut sum = b[r];
        for (wk, vk) in row.iter().zip(v) {
            sum += wk * vk;
        }
        *o = sum;
    }
}

/// Weights of one (layer, direction) unit.
struct Cell<'a> {
    kind: CellKind,
    hidden: usize,
    wx: &'a [f32],
    wh: &'a [f32],
    bx: &'a [f32],
    bh: &'a [f32],
}

impl Cell<'_> {
    /// Advance one batch row by one timestep, updating `h` (and `c` for
    /// LSTM) in place. `gx` and `gh` are scratch of `gates * hidden`.
    fn step(&self, x: &[f32], h: &mut [f32], c: &mut [f32], gx: &mut [f32], gh: &mut [f32]) {
        affine(self.wx, x, self.bx, gx);
        affine(self.wh, h, self.bh, gh);
        let hd = self.hidden;
        match self.kind {
            CellKind::Vanilla => {
                for j in 0..hd {
                    h[j] = (gx[j] + gh[j]).tanh();
                }
            }
            CellKind::Gru => {
                for j in 0..hd {
                    let r = sigmoid(gx[j] + gh[j]);
                    let z = sigmoid(gx[hd + j] + gh[hd + j]);
                    let n = (gx[2 * hd + j] + r * gh[2 * hd + j]).tanh();
                    h[j] = (1.0 - z) * n + z * h[j];
                }
            }
            CellKind::Lstm => {
                for j in 0..hd {
                    let i = sigmoid(gx[j] + gh[j]);
                    let f = sigmoid(gx[hd + j] + gh[hd + j]);
                    let g = (gx[2 * hd + j] + gh[2 * hd + j]).tanh();
                    let o = sigmoid(gx[3 * hd + j] + gh[3 * hd + j]);
                    c[j] = f * c[j] + i * g;
                    h[j] = o * c[j].tanh();
                }
            }
        }
    }
}

/// Copy columns `[col, col + width)` of rows `layer * batch ..` out of a
/// `(layers * batch, stride)` state matrix.
fn gather(state: &[f32], layer: usize, batch: usize, stride: usize, col: usize, width: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(batch * width);
    for n in 0..batch {
        let row = (layer * batch + n) * stride + col;
        out.extend_from_slice(&state[row..row + width]);
    }
    out
}

fn scatter(
    state: &mut [f32],
    values: &[f32],
    layer: usize,
    batch: usize,
    stride: usize,
    col: usize,
    width: usize,
) {
    for n in 0..batch {
        let row = (layer * batch + n) * stride + col;
        state[row..row + width].copy_from_slice(&values[n * width..(n + 1) * width]);
    }
}

pub(crate) fn rnn(
    node: &str,
    attrs: &RnnAttrs,
    inputs: &[View<'_>],
    outputs: &mut [AlignedBuffer],
) -> Result<()> {
    let [x, hx, params, cx] = inputs else {
        return Err(Error::kernel(node, format!("expected 4 inputs, got {}", inputs.len())));
    };
    if x.dtype != DType::F32 {
        return Err(Error::kernel(node, format!("no kernel for element type {}", x.dtype)));
    }
    let kind = attrs.cell();
    if outputs.len() != attrs.output_count() {
        return Err(Error::kernel(
            node,
            format!("expected {} outputs, got {}", attrs.output_count(), outputs.len()),
        ));
    }

    let steps = attrs.num_timesteps();
    let hidden = attrs.src_iter_feature_size();
    let hd = attrs.direction_hidden_size();
    let dirs = attrs.direction().count();
    let layers = attrs.num_fused_layers();
    let gates = attrs.gates_per_cell();
    let batch = x.shape.dims().first().copied().unwrap_or(0) / steps;

    let xs = x.typed::<f32>()?;
    let h0 = hx.typed::<f32>()?;
    let ps = params.typed::<f32>()?;
    let c0 = if kind.has_cell_state() {
        Some(cx.typed::<f32>()?)
    } else {
        None
    };
    if xs.len() != steps * batch * attrs.src_layer_feature_size()
        || h0.len() != layers * batch * hidden
        || ps.len() != attrs.param_count()
        || c0.is_some_and(|c| c.len() != h0.len())
    {
        return Err(Error::kernel(node, "input sizes do not match the cell attributes"));
    }

    let units = attrs.param_layout();
    let mut layer_in: Vec<f32> = xs.to_vec();
    let mut hy = vec![0.0f32; layers * batch * hidden];
    let mut cy = vec![0.0f32; if c0.is_some() { hy.len() } else { 0 }];
    let mut gx = vec![0.0f32; gates * hd];
    let mut gh = vec![0.0f32; gates * hd];

    for layer in 0..layers {
        let in_size = attrs.layer_input_size(layer);
        let mut seq = vec![0.0f32; steps * batch * hidden];
        for dir in 0..dirs {
            let unit = &units[layer * dirs + dir];
            let cell = Cell {
                kind,
                hidden: hd,
                wx: &ps[unit.weights_x.clone()],
                wh: &ps[unit.weights_h.clone()],
                bx: &ps[unit.bias_x.clone()],
                bh: &ps[unit.bias_h.clone()],
            };
            let col = dir * hd;
            let mut h = gather(h0, layer, batch, hidden, col, hd);
            let mut c = match c0 {
                Some(c0) => gather(c0, layer, batch, hidden, col, hd),
                None => vec![0.0f32; batch * hd],
            };

            for step in 0..steps {
                let t = if dir == 0 { step } else { steps - 1 - step };
                for n in 0..batch {
                    let row = t * batch + n;
                    let input = &layer_in[row * in_size..(row + 1) * in_size];
                    let state = n * hd..(n + 1) * hd;
                    cell.step(
                        input,
                        &mut h[state.clone()],
                        &mut c[state.clone()],
                        &mut gx,
                        &mut gh,
                    );
                    let dst = row * hidden + col;
                    seq[dst..dst + hd].copy_from_slice(&h[state]);
                }
            }

            scatter(&mut hy, &h, layer, batch, hidden, col, hd);
            if c0.is_some() {
                scatter(&mut cy, &c, layer, batch, hidden, col, hd);
            }
        }
        layer_in = seq;
    }

    let mut results = vec![layer_in, hy];
    if c0.is_some() {
        results.push(cy);
    }
    for (buffer, values) in outputs.iter_mut().zip(&results) {
        let dst = buffer.typed_mut::<f32>()?;
        if dst.len() != values.len() {
            return Err(Error::kernel(node, "output buffer has the wrong size"));
        }
        dst.copy_from_slice(values);
    }
    Ok(())
}
