use std::{
    fmt,
    ops::{Add, Div, Mul, Neg, Sub},
};

use ndarray::{Array1, ArrayView1};

use super::{BatchTarget, Leaf, LeafKind};
use crate::{ActivationGrads, ActivationMap, DependencyGraph, LayerName, Result, VisErr};

/// An element-wise operator combining two objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn symbol(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
        }
    }
}

/// A differentiable scalar function of a model's activations.
///
/// Every objective reduces an `ActivationMap` to one loss per batch slot. The scalar the
/// render loop minimizes is the sum of those slots, so a target on slot `i` never moves
/// the gradient of slot `j`.
#[derive(Debug, Clone, PartialEq)]
pub enum Objective {
    Leaf(Leaf),
    Constant(f32),
    Binary {
        op: BinOp,
        lhs: Box<Objective>,
        rhs: Box<Objective>,
    },
    Sum(Vec<Objective>),
}

/// Maximizes the mean of `channel` in `layer`.
pub fn channel(layer: impl Into<LayerName>, channel: usize) -> Objective {
    Objective::Leaf(Leaf::new(layer.into(), LeafKind::Channel(channel)))
}

/// Maximizes one unit of `channel` in `layer`, at the spatial center unless moved with
/// `Objective::at`.
pub fn neuron(layer: impl Into<LayerName>, channel: usize) -> Objective {
    Objective::Leaf(Leaf::new(
        layer.into(),
        LeafKind::Neuron {
            channel,
            position: None,
        },
    ))
}

/// Maximizes the unit of `channel` in `layer` at `(x, y)`.
pub fn neuron_at(layer: impl Into<LayerName>, channel: usize, x: usize, y: usize) -> Objective {
    neuron(layer, channel).at(x, y)
}

/// Maximizes the cosine similarity between `layer`'s channel vectors and `direction`.
pub fn direction(layer: impl Into<LayerName>, direction: impl Into<Array1<f32>>) -> Objective {
    Objective::Leaf(Leaf::new(
        layer.into(),
        LeafKind::Direction(direction.into()),
    ))
}

/// Maximizes the mean of the whole activation of `layer`.
pub fn layer_mean(layer: impl Into<LayerName>) -> Objective {
    Objective::Leaf(Leaf::new(layer.into(), LeafKind::LayerMean))
}

impl Objective {
    /// Builds a single flat sum over `objectives`.
    pub fn sum<I>(objectives: I) -> Self
    where
        I: IntoIterator<Item = Objective>,
    {
        Objective::Sum(objectives.into_iter().collect())
    }

    fn binary(op: BinOp, lhs: Objective, rhs: Objective) -> Self {
        Objective::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(self, rhs: Objective) -> Self {
        Self::binary(BinOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Objective) -> Self {
        Self::binary(BinOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Objective) -> Self {
        Self::binary(BinOp::Mul, self, rhs)
    }

    pub fn div(self, rhs: Objective) -> Self {
        Self::binary(BinOp::Div, self, rhs)
    }

    /// Moves every neuron leaf of this objective to `(x, y)`.
    pub fn at(mut self, x: usize, y: usize) -> Self {
        self.for_each_leaf_mut(&mut |leaf| {
            if let LeafKind::Neuron { position, .. } = &mut leaf.kind {
                *position = Some((x, y));
            }
        });
        self
    }

    /// Restricts every leaf of this objective to batch slot `index`.
    pub fn with_batch(mut self, index: usize) -> Self {
        self.for_each_leaf_mut(&mut |leaf| leaf.batch = BatchTarget::Index(index));
        self
    }

    /// Restricts every leaf of this objective to the batch slots in `indices`.
    ///
    /// Only a single slot or the whole batch are valid once the batch size is known.
    pub fn with_batch_subset<I>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let indices: Vec<_> = indices.into_iter().collect();
        self.for_each_leaf_mut(&mut |leaf| leaf.batch = BatchTarget::Subset(indices.clone()));
        self
    }

    fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut Leaf)) {
        match self {
            Objective::Leaf(leaf) => f(leaf),
            Objective::Constant(_) => {}
            Objective::Binary { lhs, rhs, .. } => {
                lhs.for_each_leaf_mut(f);
                rhs.for_each_leaf_mut(f);
            }
            Objective::Sum(terms) => terms.iter_mut().for_each(|t| t.for_each_leaf_mut(f)),
        }
    }

    /// Every leaf of this objective, left to right.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Leaf>) {
        match self {
            Objective::Leaf(leaf) => leaves.push(leaf),
            Objective::Constant(_) => {}
            Objective::Binary { lhs, rhs, .. } => {
                lhs.collect_leaves(leaves);
                rhs.collect_leaves(leaves);
            }
            Objective::Sum(terms) => terms.iter().for_each(|t| t.collect_leaves(leaves)),
        }
    }

    /// The smallest batch that covers every slot this objective names.
    pub fn required_batch_size(&self) -> usize {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| leaf.batch.max_index())
            .max()
            .map_or(1, |i| i + 1)
    }

    /// Checks this objective against a model's graph and a batch size before anything runs.
    ///
    /// # Errors
    /// `LayerNotFound` for a layer the graph doesn't have, `BatchOutOfRange` or
    /// `PartialBatch` for batch targets the batch can't satisfy.
    pub fn validate(&self, graph: &DependencyGraph, batch_size: usize) -> Result<()> {
        for leaf in self.leaves() {
            if !graph.contains(leaf.layer.as_str()) {
                return Err(VisErr::LayerNotFound {
                    layer: leaf.layer.to_string(),
                });
            }

            leaf.batch.resolve(batch_size)?;
        }

        Ok(())
    }

    /// Computes the loss of each batch slot.
    pub fn evaluate(&self, acts: &ActivationMap, batch_size: usize) -> Result<Array1<f32>> {
        match self {
            Objective::Leaf(leaf) => leaf.evaluate(acts, batch_size),
            Objective::Constant(c) => Ok(Array1::from_elem(batch_size, *c)),
            Objective::Binary { op, lhs, rhs } => {
                let l = lhs.evaluate(acts, batch_size)?;
                let r = rhs.evaluate(acts, batch_size)?;

                Ok(match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => l / r,
                })
            }
            Objective::Sum(terms) => {
                let mut total = Array1::zeros(batch_size);
                for term in terms {
                    total += &term.evaluate(acts, batch_size)?;
                }
                Ok(total)
            }
        }
    }

    /// Accumulates `seed[b] * d(loss[b]) / d(activation)` into `grads`.
    pub fn backward(
        &self,
        acts: &ActivationMap,
        batch_size: usize,
        seed: ArrayView1<f32>,
        grads: &mut ActivationGrads,
    ) -> Result<()> {
        match self {
            Objective::Leaf(leaf) => leaf.backward(acts, batch_size, seed, grads),
            Objective::Constant(_) => Ok(()),
            Objective::Binary { op, lhs, rhs } => match op {
                BinOp::Add => {
                    lhs.backward(acts, batch_size, seed, grads)?;
                    rhs.backward(acts, batch_size, seed, grads)
                }
                BinOp::Sub => {
                    lhs.backward(acts, batch_size, seed, grads)?;
                    let neg = seed.mapv(|s| -s);
                    rhs.backward(acts, batch_size, neg.view(), grads)
                }
                BinOp::Mul => {
                    let l = lhs.evaluate(acts, batch_size)?;
                    let r = rhs.evaluate(acts, batch_size)?;

                    lhs.backward(acts, batch_size, (&seed * &r).view(), grads)?;
                    rhs.backward(acts, batch_size, (&seed * &l).view(), grads)
                }
                BinOp::Div => {
                    let l = lhs.evaluate(acts, batch_size)?;
                    let r = rhs.evaluate(acts, batch_size)?;

                    let dl = &seed / &r;
                    let dr = -(&seed * &l) / (&r * &r);
                    lhs.backward(acts, batch_size, dl.view(), grads)?;
                    rhs.backward(acts, batch_size, dr.view(), grads)
                }
            },
            Objective::Sum(terms) => terms
                .iter()
                .try_for_each(|t| t.backward(acts, batch_size, seed, grads)),
        }
    }

    /// Evaluates the scalar loss and fills `grads` with its gradient.
    ///
    /// # Returns
    /// The per slot losses; the scalar loss is their sum.
    pub fn loss_and_grads(
        &self,
        acts: &ActivationMap,
        batch_size: usize,
        grads: &mut ActivationGrads,
    ) -> Result<Array1<f32>> {
        let losses = self.evaluate(acts, batch_size)?;
        grads.clear();
        self.backward(acts, batch_size, Array1::ones(batch_size).view(), grads)?;
        Ok(losses)
    }
}

impl From<Leaf> for Objective {
    fn from(leaf: Leaf) -> Self {
        Objective::Leaf(leaf)
    }
}

impl From<f32> for Objective {
    fn from(value: f32) -> Self {
        Objective::Constant(value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for Objective {
            type Output = Objective;

            fn $method(self, rhs: Objective) -> Objective {
                Objective::binary($op, self, rhs)
            }
        }

        impl $trait<f32> for Objective {
            type Output = Objective;

            fn $method(self, rhs: f32) -> Objective {
                Objective::binary($op, self, Objective::Constant(rhs))
            }
        }

        impl $trait<Objective> for f32 {
            type Output = Objective;

            fn $method(self, rhs: Objective) -> Objective {
                Objective::binary($op, Objective::Constant(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinOp::Add);
impl_binary_op!(Sub, sub, BinOp::Sub);
impl_binary_op!(Mul, mul, BinOp::Mul);
impl_binary_op!(Div, div, BinOp::Div);

impl Neg for Objective {
    type Output = Objective;

    fn neg(self) -> Objective {
        Objective::binary(BinOp::Mul, Objective::Constant(-1.0), self)
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::Leaf(leaf) => write!(f, "{leaf}"),
            Objective::Constant(c) => write!(f, "{c}"),
            Objective::Binary { op, lhs, rhs } => {
                write!(f, "({lhs} {} {rhs})", op.symbol())
            }
            Objective::Sum(terms) => {
                write!(f, "sum(")?;
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{term}")?;
                }
                write!(f, ")")
            }
        }
    }
}
