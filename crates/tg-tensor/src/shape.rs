use std::fmt;

use crate::error::{Result, TensorError};

/// Concrete, row-major dimension sizes. The empty shape is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count; 1 for a scalar.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Element count, or `None` if the product overflows `usize`.
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Length of axis `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Numpy-style broadcast of two concrete shapes, aligned on the trailing
    /// axis. A length of 1 stretches to match the other operand.
    pub fn broadcast(a: &Shape, b: &Shape) -> Option<Shape> {
        let rank = a.ndim().max(b.ndim());
        let mut out = vec![0; rank];
        for (k, slot) in out.iter_mut().rev().enumerate() {
            let x = trailing(&a.dims, k).unwrap_or(1);
            let y = trailing(&b.dims, k).unwrap_or(1);
            *slot = match (x, y) {
                _ if x == y => x,
                (1, _) => y,
                (_, 1) => x,
                _ => return None,
            };
        }
        Some(Shape::new(out))
    }
}

/// The `k`-th axis counted from the end, if the rank reaches that far.
fn trailing<T: Copy>(dims: &[T], k: usize) -> Option<T> {
    dims.len().checked_sub(k + 1).map(|i| dims[i])
}

/// Resolve `axis` against `rank`, accepting `[-rank, rank)`. Negative values
/// count from the innermost axis.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i {
        return Err(TensorError::InvalidAxis { axis, ndim: rank });
    }
    Ok(resolved as usize)
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

/// One dimension of a [`PartialShape`]: either a known length or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

impl Dimension {
    pub fn is_static(&self) -> bool {
        matches!(self, Dimension::Static(_))
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Dimension::Static(n) => Some(*n),
            Dimension::Dynamic => None,
        }
    }

    /// True if a concrete length `n` may stand in for this dimension.
    pub fn compatible(&self, n: usize) -> bool {
        match self {
            Dimension::Static(d) => *d == n,
            Dimension::Dynamic => true,
        }
    }

    /// The most specific dimension consistent with both, or `None` on conflict.
    pub fn merge(self, other: Dimension) -> Option<Dimension> {
        match (self, other) {
            (Dimension::Dynamic, d) | (d, Dimension::Dynamic) => Some(d),
            (Dimension::Static(a), Dimension::Static(b)) if a == b => Some(self),
            _ => None,
        }
    }

    /// Multiply a static length by `k`; dynamic stays dynamic. `None` on
    /// overflow.
    pub fn checked_scale(self, k: usize) -> Option<Dimension> {
        match self {
            Dimension::Static(n) => n.checked_mul(k).map(Dimension::Static),
            Dimension::Dynamic => Some(Dimension::Dynamic),
        }
    }

    /// Broadcast two dimensions. A dynamic length may turn out to be 1, so
    /// it yields to a static length other than 1.
    pub fn broadcast(self, other: Dimension) -> Option<Dimension> {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => match (a, b) {
                _ if a == b => Some(self),
                (1, _) => Some(other),
                (_, 1) => Some(self),
                _ => None,
            },
            (Dimension::Dynamic, Dimension::Static(1)) | (Dimension::Static(1), Dimension::Dynamic) => {
                Some(Dimension::Dynamic)
            }
            (Dimension::Dynamic, d) | (d, Dimension::Dynamic) => Some(d),
        }
    }
}

impl From<usize> for Dimension {
    fn from(n: usize) -> Self {
        Dimension::Static(n)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(n) => write!(f, "{n}"),
            Dimension::Dynamic => write!(f, "?"),
        }
    }
}

/// A shape whose rank and/or individual dimensions may be unknown until
/// concrete tensors are bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialShape {
    dims: Option<Vec<Dimension>>,
}

impl PartialShape {
    pub fn new(dims: Vec<Dimension>) -> Self {
        PartialShape { dims: Some(dims) }
    }

    /// A shape of unknown rank.
    pub fn dynamic() -> Self {
        PartialShape { dims: None }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    pub fn dims(&self) -> Option<&[Dimension]> {
        self.dims.as_deref()
    }

    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(Dimension::is_static))
    }

    pub fn is_dynamic(&self) -> bool {
        !self.is_static()
    }

    /// The concrete shape, if every dimension is known.
    pub fn to_shape(&self) -> Option<Shape> {
        let dims = self.dims.as_ref()?;
        dims.iter()
            .map(Dimension::len)
            .collect::<Option<Vec<_>>>()
            .map(Shape::new)
    }

    /// True if `shape` is one of the concrete shapes this partial shape admits.
    pub fn compatible(&self, shape: &Shape) -> bool {
        match &self.dims {
            None => true,
            Some(dims) => {
                dims.len() == shape.ndim()
                    && dims.iter().zip(shape.dims()).all(|(d, &n)| d.compatible(n))
            }
        }
    }

    /// Numpy-style broadcast; unknown rank on either side gives unknown rank.
    pub fn broadcast(&self, other: &PartialShape) -> Option<PartialShape> {
        let (Some(a), Some(b)) = (&self.dims, &other.dims) else {
            return Some(PartialShape::dynamic());
        };
        let rank = a.len().max(b.len());
        let mut out = vec![Dimension::Dynamic; rank];
        for (k, slot) in out.iter_mut().rev().enumerate() {
            let x = trailing(a, k).unwrap_or(Dimension::Static(1));
            let y = trailing(b, k).unwrap_or(Dimension::Static(1));
            *slot = x.broadcast(y)?;
        }
        Some(PartialShape::new(out))
    }

    /// Refine two partial shapes into one, or `None` if they conflict.
    pub fn merge(&self, other: &PartialShape) -> Option<PartialShape> {
        match (&self.dims, &other.dims) {
            (None, _) => Some(other.clone()),
            (_, None) => Some(self.clone()),
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                a.iter()
                    .zip(b)
                    .map(|(x, y)| x.merge(*y))
                    .collect::<Option<Vec<_>>>()
                    .map(PartialShape::new)
            }
        }
    }
}

impl From<Shape> for PartialShape {
    fn from(shape: Shape) -> Self {
        PartialShape::new(shape.dims.into_iter().map(Dimension::Static).collect())
    }
}

impl From<&Shape> for PartialShape {
    fn from(shape: &Shape) -> Self {
        PartialShape::from(shape.clone())
    }
}

impl From<Vec<Dimension>> for PartialShape {
    fn from(dims: Vec<Dimension>) -> Self {
        PartialShape::new(dims)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => write!(f, "[...]"),
            Some(dims) => {
                write!(f, "[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.dim(0), 2);
        assert_eq!(s.dim(1), 3);
        assert_eq!(s.dim(2), 4);
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::new(vec![]);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.to_string(), "[]");
    }

    #[test]
    fn test_broadcast_concrete() {
        fn b(x: &[usize], y: &[usize]) -> Option<Shape> {
            Shape::broadcast(&Shape::from(x), &Shape::from(y))
        }
        assert_eq!(b(&[3, 2], &[]), Some(Shape::from([3, 2])));
        assert_eq!(b(&[2, 1], &[1, 3]), Some(Shape::from([2, 3])));
        assert_eq!(b(&[4], &[5, 1, 4]), Some(Shape::from([5, 1, 4])));
        assert_eq!(b(&[2, 3], &[3, 2]), None);
    }

    #[test]
    fn test_broadcast_partial() {
        let dyn2 = PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(2)]);
        let scalar = PartialShape::from(Shape::new(vec![]));
        assert_eq!(dyn2.broadcast(&scalar), Some(dyn2.clone()));

        let row = PartialShape::from(Shape::from([1, 2]));
        assert_eq!(dyn2.broadcast(&row), Some(dyn2.clone()));

        let wide = PartialShape::from(Shape::from([3, 2]));
        assert_eq!(
            dyn2.broadcast(&wide).and_then(|s| s.to_shape()),
            Some(Shape::from([3, 2]))
        );
        assert!(dyn2.broadcast(&PartialShape::from(Shape::from([3]))).is_none());
        assert_eq!(
            PartialShape::dynamic().broadcast(&scalar),
            Some(PartialShape::dynamic())
        );
    }

    #[test]
    fn test_checked_scale() {
        assert_eq!(Dimension::Static(3).checked_scale(4), Some(Dimension::Static(12)));
        assert_eq!(Dimension::Dynamic.checked_scale(4), Some(Dimension::Dynamic));
        assert_eq!(Dimension::Static(usize::MAX).checked_scale(2), None);
    }

    #[test]
    fn test_checked_numel_overflow() {
        let s = Shape::new(vec![usize::MAX, 2]);
        assert!(s.checked_numel().is_none());
        assert_eq!(Shape::from([3, 4]).checked_numel(), Some(12));
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(0, 3).unwrap(), 0);
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(-3, 3).unwrap(), 0);
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
        assert!(normalize_axis(0, 0).is_err());
    }

    #[test]
    fn test_partial_shape_compatible() {
        let ps = PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(2)]);
        assert!(ps.is_dynamic());
        assert_eq!(ps.rank(), Some(2));
        assert!(ps.compatible(&Shape::from([5, 2])));
        assert!(!ps.compatible(&Shape::from([5, 3])));
        assert!(!ps.compatible(&Shape::from([2])));
        assert!(PartialShape::dynamic().compatible(&Shape::from([1, 2, 3])));
    }

    #[test]
    fn test_partial_shape_merge() {
        let a = PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(2)]);
        let b = PartialShape::new(vec![Dimension::Static(4), Dimension::Dynamic]);
        let m = a.merge(&b).unwrap();
        assert_eq!(m.to_shape(), Some(Shape::from([4, 2])));

        let c = PartialShape::from(Shape::from([4, 3]));
        assert!(a.merge(&c).is_none());
        assert_eq!(PartialShape::dynamic().merge(&a), Some(a.clone()));
    }

    #[test]
    fn test_partial_shape_display() {
        let ps = PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(2)]);
        assert_eq!(ps.to_string(), "[?, 2]");
        assert_eq!(PartialShape::dynamic().to_string(), "[...]");
    }
}
