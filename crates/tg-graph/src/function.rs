use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::node::{NodeId, NodeRef, Output, OutputDesc};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a [`Function`], used as the compile-cache key.
///
/// Ids are assigned from a process-wide counter and never reused, so a new
/// Function can never be mistaken for a dropped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable computation graph with ordered parameters and results.
#[derive(Debug)]
pub struct Function {
    id: FunctionId,
    name: String,
    parameters: Vec<NodeRef>,
    results: Vec<Output>,
    ordered: Vec<NodeRef>,
}

impl Function {
    /// Build a Function from the outputs it returns and the parameters it
    /// takes.
    ///
    /// # Errors
    /// Fails if a listed parameter is not a `Parameter` node or is listed
    /// twice, or if the graph reads a parameter that is not listed.
    pub fn new(results: Vec<Output>, parameters: Vec<NodeRef>) -> Result<Arc<Function>> {
        let id = FunctionId(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed));
        Self::with_name(format!("Function_{}", id.0), id, results, parameters)
    }

    /// Same as [`Function::new`] with a caller-chosen name.
    pub fn named(
        name: impl Into<String>,
        results: Vec<Output>,
        parameters: Vec<NodeRef>,
    ) -> Result<Arc<Function>> {
        let id = FunctionId(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed));
        Self::with_name(name.into(), id, results, parameters)
    }

    fn with_name(
        name: String,
        id: FunctionId,
        results: Vec<Output>,
        parameters: Vec<NodeRef>,
    ) -> Result<Arc<Function>> {
        let mut visited: HashSet<NodeId> = HashSet::new();
        for p in &parameters {
            if !p.is_parameter() {
                return Err(GraphError::NotAParameter(p.name().to_string()));
            }
            if !visited.insert(p.id()) {
                return Err(GraphError::DuplicateParameter(p.name().to_string()));
            }
        }

        let mut ordered: Vec<NodeRef> = parameters.clone();
        for result in &results {
            let root = result.node();
            if !visited.insert(root.id()) {
                continue;
            }
            if root.is_parameter() {
                return Err(GraphError::UnlistedParameter(root.name().to_string()));
            }
            // Post-order walk: a node is emitted after all of its producers.
            let mut stack: Vec<(NodeRef, usize)> = vec![(Arc::clone(root), 0)];
            while let Some((node, next)) = stack.last_mut() {
                if let Some(input) = node.inputs().get(*next) {
                    *next += 1;
                    let child = Arc::clone(input.node());
                    if visited.insert(child.id()) {
                        if child.is_parameter() {
                            return Err(GraphError::UnlistedParameter(child.name().to_string()));
                        }
                        stack.push((child, 0));
                    }
                } else if let Some((done, _)) = stack.pop() {
                    ordered.push(done);
                }
            }
        }

        Ok(Arc::new(Function {
            id,
            name,
            parameters,
            results,
            ordered,
        }))
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[NodeRef] {
        &self.parameters
    }

    pub fn results(&self) -> &[Output] {
        &self.results
    }

    /// Every node in a deterministic topological order: parameters first,
    /// then each node after all of its inputs.
    pub fn ordered_ops(&self) -> &[NodeRef] {
        &self.ordered
    }

    pub fn parameter_descs(&self) -> Vec<OutputDesc> {
        self.parameters
            .iter()
            .map(|p| p.outputs()[0].clone())
            .collect()
    }

    pub fn result_descs(&self) -> Vec<OutputDesc> {
        self.results.iter().map(|r| r.desc().clone()).collect()
    }

    /// True if any parameter or result has an unknown dimension.
    pub fn is_dynamic(&self) -> bool {
        self.parameter_descs()
            .iter()
            .chain(self.result_descs().iter())
            .any(|d| d.shape.is_dynamic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops;
    use tg_tensor::{DType, Dimension, PartialShape, Shape};

    #[test]
    fn test_topological_order() {
        let a = ops::parameter(DType::F32, Shape::from([2]));
        let b = ops::parameter(DType::F32, Shape::from([2]));
        let sum = ops::add(&a, &b).unwrap();
        let prod = ops::multiply(&sum, &a).unwrap();
        let f = Function::new(vec![Output::from(&prod)], vec![a.clone(), b.clone()]).unwrap();

        let names: Vec<&str> = f.ordered_ops().iter().map(|n| n.name()).collect();
        assert_eq!(
            names,
            vec![a.name(), b.name(), sum.name(), prod.name()]
        );
    }

    #[test]
    fn test_shared_subexpression_visited_once() {
        let a = ops::parameter(DType::I64, Shape::from([3]));
        let sq = ops::multiply(&a, &a).unwrap();
        let twice = ops::add(&sq, &sq).unwrap();
        let f = Function::new(
            vec![Output::from(&twice), Output::from(&sq)],
            vec![a],
        )
        .unwrap();
        assert_eq!(f.ordered_ops().len(), 3);
        assert_eq!(f.results().len(), 2);
    }

    #[test]
    fn test_unlisted_parameter() {
        let a = ops::parameter(DType::F32, Shape::from([2]));
        let b = ops::parameter(DType::F32, Shape::from([2]));
        let sum = ops::add(&a, &b).unwrap();
        assert!(matches!(
            Function::new(vec![Output::from(&sum)], vec![a.clone()]),
            Err(GraphError::UnlistedParameter(_))
        ));
        assert!(matches!(
            Function::new(vec![Output::from(&b)], vec![a]),
            Err(GraphError::UnlistedParameter(_))
        ));
    }

    #[test]
    fn test_parameter_list_validated() {
        let a = ops::parameter(DType::F32, Shape::from([2]));
        let neg = ops::subtract(&a, &a).unwrap();
        assert!(matches!(
            Function::new(vec![Output::from(&neg)], vec![a.clone(), a.clone()]),
            Err(GraphError::DuplicateParameter(_))
        ));
        assert!(matches!(
            Function::new(vec![Output::from(&neg)], vec![neg.clone()]),
            Err(GraphError::NotAParameter(_))
        ));
    }

    #[test]
    fn test_identity_is_unique_and_dynamic_flag() {
        let a = ops::parameter(
            DType::F32,
            PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(2)]),
        );
        let f1 = Function::new(vec![Output::from(&a)], vec![a.clone()]).unwrap();
        let f2 = Function::named("identity", vec![Output::from(&a)], vec![a.clone()]).unwrap();
        assert_ne!(f1.id(), f2.id());
        assert_eq!(f2.name(), "identity");
        assert!(f1.is_dynamic());
        assert_eq!(f1.parameter_descs()[0].dtype, DType::F32);
    }
}
