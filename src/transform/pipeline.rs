use log::trace;
use ndarray::Array4;
use rand::Rng;

use super::{Op, SamplingMode, Shape, Transform};
use crate::{Result, VisErr};

/// An ordered list of transforms applied to the decoded image batch on every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    transforms: Vec<Transform>,
    sampling: SamplingMode,
}

/// One applied op and the shapes around it.
#[derive(Debug, Clone)]
struct TraceStep {
    name: String,
    op: Op,
    input: Shape,
    output: Shape,
}

/// What a pipeline did to one batch, kept so its gradient can be pulled back.
#[derive(Debug, Clone, Default)]
pub struct TransformTrace {
    steps: Vec<TraceStep>,
}

impl Pipeline {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self {
            transforms,
            sampling: SamplingMode::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn push(&mut self, transform: Transform) {
        self.transforms.push(transform);
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn sampling(&self) -> SamplingMode {
        self.sampling
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Samples every transform once and applies them in order.
    ///
    /// # Arguments
    /// * `x` - An NCHW batch.
    /// * `rng` - The source of every random choice of this step.
    ///
    /// # Returns
    /// The transformed batch and the trace that pulls gradients back through it.
    pub fn apply<R: Rng>(
        &self,
        x: Array4<f32>,
        rng: &mut R,
    ) -> Result<(Array4<f32>, TransformTrace)> {
        let mut trace = TransformTrace::default();
        let mut x = x;

        for transform in &self.transforms {
            let input = x.dim();
            let op = transform.sample(input, rng, self.sampling)?;

            x = op.forward(&x)?;
            let output = x.dim();
            trace!(transform:% = transform, output:? = output; "applied transform");

            trace.steps.push(TraceStep {
                name: transform.to_string(),
                op,
                input,
                output,
            });
        }

        Ok((x, trace))
    }
}

impl TransformTrace {
    /// Pulls the gradient with respect to the pipeline's output back to its input, running
    /// the ops in reverse order.
    pub fn backward(&self, grad: Array4<f32>) -> Result<Array4<f32>> {
        let mut grad = grad;

        for step in self.steps.iter().rev() {
            if grad.dim() != step.output {
                return Err(VisErr::ShapeMismatch {
                    stage: format!("gradient of {}", step.name),
                    got: grad.shape().to_vec(),
                    expected: shape_vec(step.output),
                });
            }

            grad = step.op.backward(&grad, step.input)?;
        }

        Ok(grad)
    }

    /// The transform that produced the pipeline's output, if any ran.
    pub fn last_stage(&self) -> Option<&str> {
        self.steps.last().map(|step| step.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn shape_vec((b, c, h, w): Shape) -> Vec<usize> {
    vec![b, c, h, w]
}

#[cfg(test)]
mod tests {
    use ndarray_rand::{RandomExt, rand_distr::Uniform};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::transform::{
        PadMode, affine, default_transforms, imagenet_normalize, jitter, pad, random_rotate,
        random_scale, resize,
    };

    fn batch(shape: Shape, seed: u64) -> Array4<f32> {
        let uniform = Uniform::new(-0.5, 0.5).unwrap();
        Array4::random_using(shape, uniform, &mut StdRng::seed_from_u64(seed))
    }

    fn dot(a: &Array4<f32>, b: &Array4<f32>) -> f32 {
        (a * b).sum()
    }

    /// `<A x, y> == <x, A^T y>` for the linear part of the pipeline.
    fn assert_adjoint(pipeline: &Pipeline, shape: Shape) {
        let x = batch(shape, 1);

        let (y, trace) = pipeline.apply(x.clone(), &mut StdRng::seed_from_u64(9)).unwrap();
        let (y0, _) = pipeline
            .apply(Array4::zeros(shape), &mut StdRng::seed_from_u64(9))
            .unwrap();

        let g = batch(y.dim(), 2);
        let gx = trace.backward(g.clone()).unwrap();
        assert_eq!(gx.dim(), shape);

        let lhs = dot(&(&y - &y0), &g);
        let rhs = dot(&x, &gx);
        assert!(
            (lhs - rhs).abs() < 1e-3 * lhs.abs().max(1.),
            "{:?}: {lhs} vs {rhs}",
            pipeline.transforms()
        );
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let pipeline = Pipeline::default();
        let x = batch((2, 3, 5, 4), 3);

        let (y, trace) = pipeline.apply(x.clone(), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(y, x);
        assert!(trace.is_empty());
        assert_eq!(trace.backward(x.clone()).unwrap(), x);
    }

    #[test]
    fn every_transform_is_adjoint() {
        let shape = (2, 3, 9, 11);
        let cases = [
            vec![pad(3, PadMode::Constant(0.5))],
            vec![pad(4, PadMode::Reflect)],
            vec![jitter(2)],
            vec![random_scale([0.8, 1.3])],
            vec![random_rotate([-7., 12.])],
            vec![resize(6, 13)],
            vec![imagenet_normalize()],
            vec![affine(255., -117.)],
            default_transforms(),
        ];

        for transforms in cases {
            for sampling in [SamplingMode::Shared, SamplingMode::PerSample] {
                assert_adjoint(&Pipeline::new(transforms.clone()).with_sampling(sampling), shape);
            }
        }
    }

    #[test]
    fn same_seed_same_output() {
        let pipeline = Pipeline::new(default_transforms());
        let x = batch((1, 3, 16, 16), 4);

        let (a, _) = pipeline.apply(x.clone(), &mut StdRng::seed_from_u64(21)).unwrap();
        let (b, _) = pipeline.apply(x, &mut StdRng::seed_from_u64(21)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn trace_records_every_stage() {
        let pipeline = Pipeline::new(vec![pad(2, PadMode::Reflect), resize(7, 7)]);
        let (y, trace) = pipeline
            .apply(Array4::zeros((1, 3, 4, 4)), &mut StdRng::seed_from_u64(0))
            .unwrap();

        assert_eq!(y.dim(), (1, 3, 7, 7));
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.last_stage(), Some("resize(7x7)"));

        let g = trace.backward(Array4::ones((1, 3, 7, 7))).unwrap();
        assert_eq!(g.dim(), (1, 3, 4, 4));
    }

    #[test]
    fn backward_rejects_foreign_gradients() {
        let pipeline = Pipeline::new(vec![pad(1, PadMode::Constant(0.))]);
        let (_, trace) = pipeline
            .apply(Array4::zeros((1, 3, 4, 4)), &mut StdRng::seed_from_u64(0))
            .unwrap();

        assert!(matches!(
            trace.backward(Array4::zeros((1, 3, 4, 4))),
            Err(VisErr::ShapeMismatch { .. })
        ));
    }
}
