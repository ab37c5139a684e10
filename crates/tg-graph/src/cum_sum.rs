//! Prefix-scan (cumulative sum) node attributes.

use tg_tensor::{normalize_axis, DType, PartialShape};

use crate::error::{GraphError, Result};

const OP: &str = "CumSum";

/// Where the scan axis comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CumSumAxis {
    /// Fixed when the graph is built.
    Static(i64),
    /// Read from the node's second input (an `i32`/`i64` scalar or one-element
    /// tensor) every time the kernel runs.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CumSumAttrs {
    pub axis: CumSumAxis,
    /// Sum only the elements strictly before each position.
    pub exclusive: bool,
    /// Scan from the last index towards the first.
    pub reverse: bool,
}

impl CumSumAttrs {
    pub fn new(axis: CumSumAxis) -> Self {
        CumSumAttrs {
            axis,
            exclusive: false,
            reverse: false,
        }
    }

    pub fn input_count(&self) -> usize {
        match self.axis {
            CumSumAxis::Static(_) => 1,
            CumSumAxis::Dynamic => 2,
        }
    }

    pub(crate) fn infer(
        &self,
        inputs: &[(DType, PartialShape)],
    ) -> Result<Vec<(DType, PartialShape)>> {
        if inputs.len() != self.input_count() {
            return Err(GraphError::InputCount {
                op: OP,
                expected: self.input_count(),
                got: inputs.len(),
            });
        }
        let (dtype, shape) = &inputs[0];
        if !dtype.is_numeric() {
            return Err(GraphError::invalid(
                OP,
                format!("cannot sum elements of type {dtype}"),
            ));
        }
        match self.axis {
            CumSumAxis::Static(axis) => {
                if let Some(rank) = shape.rank() {
                    resolve_axis(axis, rank)?;
                }
            }
            CumSumAxis::Dynamic => {
                let (axis_dtype, axis_shape) = &inputs[1];
                if !matches!(axis_dtype, DType::I32 | DType::I64) {
                    return Err(GraphError::invalid(
                        OP,
                        format!("axis must be i32 or i64, got {axis_dtype}"),
                    ));
                }
                let scalar_like = match axis_shape.dims() {
                    None | Some([]) => true,
                    Some([d]) => d.compatible(1),
                    Some(_) => false,
                };
                if !scalar_like {
                    return Err(GraphError::invalid(
                        OP,
                        format!("axis must be a scalar or hold one element, got {axis_shape}"),
                    ));
                }
            }
        }
        Ok(vec![(*dtype, shape.clone())])
    }
}

/// Resolve a scan axis against a tensor rank, accepting `[-rank, rank)`.
///
/// # Errors
/// Out-of-range axes are reported as `InvalidArgument`.
pub fn resolve_axis(axis: i64, rank: usize) -> Result<usize> {
    normalize_axis(axis, rank).map_err(|_| {
        GraphError::invalid(
            OP,
            format!("axis {axis} is out of range for rank {rank}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_tensor::{Dimension, Shape};

    fn axis_shape() -> PartialShape {
        PartialShape::new(vec![Dimension::Static(1)])
    }

    fn f32_input(dims: [usize; 3]) -> (DType, PartialShape) {
        (DType::F32, PartialShape::from(Shape::from(dims)))
    }

    #[test]
    fn test_static_axis_output_matches_input() {
        let attrs = CumSumAttrs::new(CumSumAxis::Static(-1));
        let out = attrs.infer(&[f32_input([3, 2, 4])]).unwrap();
        assert_eq!(out, vec![f32_input([3, 2, 4])]);
    }

    #[test]
    fn test_static_axis_out_of_range() {
        let attrs = CumSumAttrs::new(CumSumAxis::Static(3));
        assert!(matches!(
            attrs.infer(&[f32_input([3, 2, 4])]),
            Err(GraphError::InvalidArgument { op: "CumSum", .. })
        ));
        let attrs = CumSumAttrs::new(CumSumAxis::Static(-4));
        assert!(attrs.infer(&[f32_input([3, 2, 4])]).is_err());
    }

    #[test]
    fn test_static_axis_unknown_rank_defers() {
        let attrs = CumSumAttrs::new(CumSumAxis::Static(7));
        assert!(attrs
            .infer(&[(DType::I64, PartialShape::dynamic())])
            .is_ok());
    }

    #[test]
    fn test_dynamic_axis_inputs() {
        let attrs = CumSumAttrs::new(CumSumAxis::Dynamic);
        assert!(attrs
            .infer(&[f32_input([3, 2, 4]), (DType::I64, axis_shape())])
            .is_ok());
        assert!(attrs
            .infer(&[f32_input([3, 2, 4]), (DType::I32, PartialShape::new(vec![]))])
            .is_ok());
        assert!(attrs
            .infer(&[f32_input([3, 2, 4]), (DType::F32, axis_shape())])
            .is_err());
        assert!(attrs
            .infer(&[
                f32_input([3, 2, 4]),
                (DType::I64, PartialShape::from(Shape::from([2])))
            ])
            .is_err());
        assert!(matches!(
            attrs.infer(&[f32_input([3, 2, 4])]),
            Err(GraphError::InputCount { .. })
        ));
    }

    #[test]
    fn test_boolean_rejected() {
        let attrs = CumSumAttrs::new(CumSumAxis::Static(0));
        let input = (DType::Boolean, PartialShape::from(Shape::from([4])));
        assert!(attrs.infer(&[input]).is_err());
    }
}
