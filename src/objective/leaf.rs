use std::fmt;

use ndarray::{
    Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, ArrayViewMut2, ArrayViewMutD, Axis, Ix2,
};

use crate::{ActivationGrads, ActivationMap, LayerName, Result, VisErr};

const COSINE_EPS: f32 = 1e-8;

/// Which batch slots an objective applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BatchTarget {
    #[default]
    All,
    Index(usize),
    /// Only valid when it names a single slot or every slot of the batch.
    Subset(Vec<usize>),
}

/// A `BatchTarget` resolved against a concrete batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slots {
    All(usize),
    One(usize),
}

impl Slots {
    pub fn iter(self) -> impl Iterator<Item = usize> {
        match self {
            Slots::All(n) => 0..n,
            Slots::One(i) => i..i + 1,
        }
    }
}

impl BatchTarget {
    /// Resolves the target for a batch of `batch_size` images.
    ///
    /// # Returns
    /// The slots to compute, or a specification error if the target is out of range or
    /// covers some but not all of the batch.
    pub fn resolve(&self, batch_size: usize) -> Result<Slots> {
        match self {
            BatchTarget::All => Ok(Slots::All(batch_size)),
            BatchTarget::Index(i) => {
                if *i >= batch_size {
                    return Err(VisErr::BatchOutOfRange {
                        index: *i,
                        batch_size,
                    });
                }
                Ok(Slots::One(*i))
            }
            BatchTarget::Subset(indices) => {
                let mut unique = indices.clone();
                unique.sort_unstable();
                unique.dedup();

                if let Some(&index) = unique.iter().find(|&&i| i >= batch_size) {
                    return Err(VisErr::BatchOutOfRange { index, batch_size });
                }

                match unique.len() {
                    1 => Ok(Slots::One(unique[0])),
                    n if n == batch_size => Ok(Slots::All(batch_size)),
                    _ => Err(VisErr::PartialBatch {
                        requested: unique,
                        batch_size,
                    }),
                }
            }
        }
    }

    /// The highest slot this target names, if it names any.
    pub fn max_index(&self) -> Option<usize> {
        match self {
            BatchTarget::All => None,
            BatchTarget::Index(i) => Some(*i),
            BatchTarget::Subset(indices) => indices.iter().copied().max(),
        }
    }
}

/// What a leaf objective measures on its layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafKind {
    /// Mean of the whole activation.
    LayerMean,
    /// Mean of one channel over every spatial position.
    Channel(usize),
    /// A single unit of a channel, at `(x, y)` or at the spatial center.
    Neuron {
        channel: usize,
        position: Option<(usize, usize)>,
    },
    /// Mean cosine similarity between each position's channel vector and a direction.
    Direction(Array1<f32>),
}

/// An objective bound to one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub layer: LayerName,
    pub kind: LeafKind,
    pub batch: BatchTarget,
}

impl Leaf {
    pub fn new(layer: LayerName, kind: LeafKind) -> Self {
        Self {
            layer,
            kind,
            batch: BatchTarget::All,
        }
    }

    fn activation<'a>(
        &self,
        acts: &'a ActivationMap,
        batch_size: usize,
    ) -> Result<ArrayViewD<'a, f32>> {
        let t = acts
            .get(self.layer.as_str())
            .ok_or_else(|| VisErr::MissingActivation {
                layer: self.layer.to_string(),
            })?;

        if t.ndim() < 2 || t.shape()[0] != batch_size {
            return Err(VisErr::SizeMismatch {
                what: "activation batch",
                got: t.shape().first().copied().unwrap_or_default(),
                expected: batch_size,
            });
        }

        Ok(t)
    }

    /// Computes the loss of each batch slot: the negated measure on targeted slots and 0
    /// everywhere else.
    pub fn evaluate(&self, acts: &ActivationMap, batch_size: usize) -> Result<Array1<f32>> {
        let t = self.activation(acts, batch_size)?;
        let mut values = Array1::zeros(batch_size);

        for b in self.batch.resolve(batch_size)?.iter() {
            values[b] = -self.measure(t.index_axis(Axis(0), b))?;
        }

        Ok(values)
    }

    /// Accumulates `seed[b] * d(loss[b]) / d(activation)` into `grads` for every targeted slot.
    pub fn backward(
        &self,
        acts: &ActivationMap,
        batch_size: usize,
        seed: ArrayView1<f32>,
        grads: &mut ActivationGrads,
    ) -> Result<()> {
        let t = self.activation(acts, batch_size)?;
        let slots = self.batch.resolve(batch_size)?;
        let grad = grads.entry(&self.layer, t.shape());

        for b in slots.iter() {
            let scale = -seed[b];
            if scale == 0.0 {
                continue;
            }

            let sample = t.index_axis(Axis(0), b);
            let grad = grad.index_axis_mut(Axis(0), b);
            self.accumulate(sample, grad, scale)?;
        }

        Ok(())
    }

    fn measure(&self, sample: ArrayViewD<f32>) -> Result<f32> {
        match &self.kind {
            LeafKind::LayerMean => Ok(sample.mean().unwrap_or_default()),
            LeafKind::Channel(c) => {
                let plane = self.channel(sample, *c)?;
                Ok(plane.mean().unwrap_or_default())
            }
            LeafKind::Neuron { channel, position } => {
                let plane = self.channel(sample, *channel)?;
                match plane.ndim() {
                    0 => Ok(plane.sum()),
                    _ => {
                        let plane = self.plane(plane)?;
                        let (x, y) = self.position(plane.dim(), *position)?;
                        Ok(plane[[y, x]])
                    }
                }
            }
            LeafKind::Direction(direction) => {
                let vectors = self.vectors(sample, direction)?;
                let dir_norm = norm(direction.view());
                let npos = vectors.ncols().max(1) as f32;

                let total: f32 = vectors
                    .columns()
                    .into_iter()
                    .map(|x| cosine(x, direction.view(), dir_norm))
                    .sum();
                Ok(total / npos)
            }
        }
    }

    fn accumulate(
        &self,
        sample: ArrayViewD<f32>,
        mut grad: ArrayViewMutD<f32>,
        scale: f32,
    ) -> Result<()> {
        match &self.kind {
            LeafKind::LayerMean => {
                let n = grad.len().max(1) as f32;
                grad.mapv_inplace(|g| g + scale / n);
            }
            LeafKind::Channel(c) => {
                self.channel(sample, *c)?;
                let mut plane = grad.index_axis_mut(Axis(0), *c);
                let n = plane.len().max(1) as f32;
                plane.mapv_inplace(|g| g + scale / n);
            }
            LeafKind::Neuron { channel, position } => {
                let plane = self.channel(sample, *channel)?;
                let mut gplane = grad.index_axis_mut(Axis(0), *channel);

                if plane.ndim() == 0 {
                    gplane.mapv_inplace(|g| g + scale);
                    return Ok(());
                }

                let (x, y) = self.position(self.plane(plane)?.dim(), *position)?;
                let mut gplane = self.plane_mut(gplane.view_mut())?;
                gplane[[y, x]] += scale;
            }
            LeafKind::Direction(direction) => {
                let vectors = self.vectors(sample, direction)?;
                let dir_norm = norm(direction.view());
                let npos = vectors.ncols().max(1) as f32;
                let channels = vectors.nrows();

                let shape = grad.shape().to_vec();
                let mut gvectors = grad
                    .view_mut()
                    .into_shape_with_order((channels, vectors.ncols()))
                    .map_err(|_| VisErr::SizeMismatch {
                        what: "direction gradient",
                        got: shape.iter().product(),
                        expected: vectors.len(),
                    })?;

                for (x, mut g) in vectors.columns().into_iter().zip(gvectors.columns_mut()) {
                    let x_norm = norm(x);
                    let denom = x_norm * dir_norm;
                    if denom < COSINE_EPS {
                        continue;
                    }

                    let cos = x.dot(direction) / denom;
                    let w = scale / npos;
                    for ((g, &xi), &di) in g.iter_mut().zip(x).zip(direction) {
                        *g += w * (di / denom - cos * xi / (x_norm * x_norm));
                    }
                }
            }
        }

        Ok(())
    }

    fn channel<'a>(&self, sample: ArrayViewD<'a, f32>, c: usize) -> Result<ArrayViewD<'a, f32>> {
        let channels = sample.shape()[0];
        if c >= channels {
            return Err(VisErr::ChannelOutOfRange {
                layer: self.layer.to_string(),
                channel: c,
                channels,
            });
        }

        Ok(sample.index_axis_move(Axis(0), c))
    }

    fn plane<'a>(&self, plane: ArrayViewD<'a, f32>) -> Result<ArrayView2<'a, f32>> {
        let ndim = plane.ndim();
        plane
            .into_dimensionality::<Ix2>()
            .map_err(|_| VisErr::SizeMismatch {
                what: "neuron activation dimensions",
                got: ndim,
                expected: 2,
            })
    }

    fn plane_mut<'a>(&self, plane: ArrayViewMutD<'a, f32>) -> Result<ArrayViewMut2<'a, f32>> {
        let ndim = plane.ndim();
        plane
            .into_dimensionality::<Ix2>()
            .map_err(|_| VisErr::SizeMismatch {
                what: "neuron activation dimensions",
                got: ndim,
                expected: 2,
            })
    }

    fn position(
        &self,
        (h, w): (usize, usize),
        position: Option<(usize, usize)>,
    ) -> Result<(usize, usize)> {
        let (x, y) = position.unwrap_or((w / 2, h / 2));
        if x >= w || y >= h {
            return Err(VisErr::PositionOutOfRange {
                layer: self.layer.to_string(),
                position: (x, y),
                size: (w, h),
            });
        }

        Ok((x, y))
    }

    /// Views a `[C, ...spatial]` sample as a `[C, positions]` matrix.
    fn vectors(&self, sample: ArrayViewD<f32>, direction: &Array1<f32>) -> Result<Array2<f32>> {
        let channels = sample.shape()[0];
        if direction.len() != channels {
            return Err(VisErr::DirectionLength {
                layer: self.layer.to_string(),
                got: direction.len(),
                expected: channels,
            });
        }

        let positions = sample.len() / channels.max(1);
        sample
            .to_shape((channels, positions))
            .map(|v| v.into_owned())
            .map_err(|_| VisErr::SizeMismatch {
                what: "direction activation",
                got: sample.len(),
                expected: channels * positions,
            })
    }
}

fn norm(x: ArrayView1<f32>) -> f32 {
    x.dot(&x).sqrt()
}

fn cosine(x: ArrayView1<f32>, d: ArrayView1<f32>, d_norm: f32) -> f32 {
    let denom = norm(x) * d_norm;
    if denom < COSINE_EPS {
        return 0.0;
    }

    x.dot(&d) / denom
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layer = &self.layer;
        match &self.kind {
            LeafKind::LayerMean => write!(f, "layer_mean({layer})")?,
            LeafKind::Channel(c) => write!(f, "channel({layer}:{c})")?,
            LeafKind::Neuron {
                channel,
                position: Some((x, y)),
            } => write!(f, "neuron({layer}:{channel} @ ({x}, {y}))")?,
            LeafKind::Neuron { channel, .. } => write!(f, "neuron({layer}:{channel})")?,
            LeafKind::Direction(_) => write!(f, "direction({layer})")?,
        }

        match &self.batch {
            BatchTarget::All => Ok(()),
            BatchTarget::Index(i) => write!(f, "[batch {i}]"),
            BatchTarget::Subset(indices) => write!(f, "[batch {indices:?}]"),
        }
    }
}
