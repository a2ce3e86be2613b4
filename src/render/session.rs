use std::collections::BTreeSet;

use log::{debug, info, warn};
use ndarray::Array4;
use rand::{SeedableRng, rngs::StdRng};

use super::{CancelToken, RenderOptions};
use crate::{
    ActivationCapture, ActivationGrads, HostModel, Result, VisErr,
    objective::{IntoObjective, Objective},
    optimization::Optimizer,
    param::ImageParam,
    transform::{Pipeline, TransformTrace, default_transforms, resize},
};

/// Where a render session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Initializing,
    Stepping,
    Finalizing,
    Done,
}

/// One optimization of an image batch against an objective over a host network.
pub struct RenderSession<'m, M: HostModel + ?Sized> {
    model: &'m mut M,
    capture: ActivationCapture,
    objective: Objective,
    param: ImageParam,
    pipeline: Pipeline,
    optimizer: Box<dyn Optimizer>,
    grads: ActivationGrads,
    rng: StdRng,
    input_shape: Option<[usize; 3]>,
    steps: usize,
    thresholds: BTreeSet<usize>,
    verbose: bool,
    cancel: CancelToken,
    completed: usize,
    images: Vec<Array4<f32>>,
    state: RenderState,
}

impl<'m, M: HostModel + ?Sized> RenderSession<'m, M> {
    /// Creates a new `RenderSession`, checking everything that can be checked without
    /// running the model.
    ///
    /// # Arguments
    /// * `model` - The host network. Only its activations are read, never its weights.
    /// * `objective` - An `Objective` or a `"layer:channel"` shorthand.
    /// * `options` - The configuration of the render.
    ///
    /// # Returns
    /// A session ready to `run`, or a specification error if the objective does not fit
    /// the model or the batch.
    pub fn new<O>(model: &'m mut M, objective: O, options: RenderOptions) -> Result<Self>
    where
        O: IntoObjective,
    {
        let objective = objective.into_objective()?;
        let capture = ActivationCapture::new(&*model);
        let steps = options.resolved_steps();

        let RenderOptions {
            mut param,
            batch_size,
            param_f,
            transforms,
            preprocess,
            optimizer,
            thresholds,
            seed,
            sampling,
            fixed_image_size,
            verbose,
            cancel,
            ..
        } = options;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let custom = param_f.map(|f| f()).transpose()?;
        let batch = match &custom {
            Some(custom) => custom.batch_size(),
            None => batch_size.unwrap_or_else(|| objective.required_batch_size()),
        };

        objective.validate(capture.graph(), batch)?;

        let param = match custom {
            Some(custom) => custom,
            None => {
                param.batch = batch;
                ImageParam::new(&param, &mut rng)?
            }
        };

        let input_shape = model.input_shape();
        let mut pipeline = Pipeline::new(transforms.unwrap_or_else(default_transforms))
            .with_sampling(sampling);
        if let Some(preprocess) = preprocess {
            pipeline.push(preprocess);
        }
        let final_size = fixed_image_size.or(input_shape.map(|[_, h, w]| (h, w)));
        if let Some((height, width)) = final_size {
            pipeline.push(resize(height, width));
        }

        let thresholds: BTreeSet<usize> = thresholds
            .into_iter()
            .filter(|&t| {
                let kept = (1..=steps).contains(&t);
                if !kept {
                    warn!("ignoring threshold {t}: outside of the render's {steps} steps");
                }
                kept
            })
            .collect();

        let optimizer = optimizer.build(param.len());

        info!(
            "render session initialized: objective={objective} batch={batch} params={} \
             steps={steps} transforms={} checkpoints={}",
            param.len(),
            pipeline.len(),
            thresholds.len()
        );

        Ok(Self {
            model,
            capture,
            objective,
            param,
            pipeline,
            optimizer,
            grads: ActivationGrads::new(),
            rng,
            input_shape,
            steps,
            thresholds,
            verbose,
            cancel: cancel.unwrap_or_default(),
            completed: 0,
            images: Vec::new(),
            state: RenderState::Initializing,
        })
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// The number of steps this session runs if not cancelled.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn param(&self) -> &ImageParam {
        &self.param
    }

    /// Runs every step and returns the checkpointed NHWC batches in order.
    ///
    /// Any error aborts the session. A cancelled session stops at the next step boundary
    /// and returns the checkpoints so far followed by the current image.
    pub fn run(mut self) -> Result<Vec<Array4<f32>>> {
        self.state = RenderState::Stepping;

        while self.completed < self.steps {
            if self.cancel.is_cancelled() {
                info!(
                    "render cancelled after {} steps, {} checkpoints kept",
                    self.completed,
                    self.images.len()
                );
                self.images.push(self.param.snapshot()?);
                self.state = RenderState::Done;
                return Ok(self.images);
            }

            let loss = self.step()?;
            let step = self.completed;
            debug!("{}", loss_report(step, loss));

            if self.verbose && step == 1 {
                info!("initial loss: {loss}");
            }

            if self.thresholds.contains(&step) {
                if self.verbose {
                    info!("{}", loss_report(step, loss));
                }
                self.images.push(self.param.snapshot()?);
            }
        }

        self.state = RenderState::Finalizing;
        if self.thresholds.is_empty() && self.steps > 0 {
            self.images.push(self.param.snapshot()?);
        }

        self.state = RenderState::Done;
        info!(
            "render finished: steps={} images={}",
            self.completed,
            self.images.len()
        );
        Ok(self.images)
    }

    /// Runs one optimization step.
    ///
    /// # Returns
    /// The loss of the objective before the update.
    fn step(&mut self) -> Result<f32> {
        let step = self.completed + 1;

        let x = self.param.decode()?;
        let (x, trace) = self.pipeline.apply(x, &mut self.rng)?;
        self.check_input(&x, &trace)?;

        let batch = self.param.batch_size();
        let acts = self.capture.forward(&mut *self.model, x.view())?;
        let losses = self
            .objective
            .loss_and_grads(acts, batch, &mut self.grads)?;

        let loss = losses.sum();
        if !loss.is_finite() {
            return Err(VisErr::NonFinite { step, what: "loss" });
        }

        let input_grad = self.capture.backward(&mut *self.model, &self.grads)?;
        if input_grad.iter().any(|g| !g.is_finite()) {
            return Err(VisErr::NonFinite {
                step,
                what: "input gradient",
            });
        }

        let image_grad = trace.backward(input_grad)?;
        let grad = self.param.backward(image_grad.view())?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(VisErr::NonFinite {
                step,
                what: "parameter gradient",
            });
        }

        self.optimizer
            .update_params(&grad, self.param.params_mut())?;

        self.completed = step;
        Ok(loss)
    }

    fn check_input(&self, x: &Array4<f32>, trace: &TransformTrace) -> Result<()> {
        let Some([c, h, w]) = self.input_shape else {
            return Ok(());
        };

        let (b, xc, xh, xw) = x.dim();
        if (xc, xh, xw) != (c, h, w) {
            return Err(VisErr::ShapeMismatch {
                stage: trace
                    .last_stage()
                    .unwrap_or("image parameterization")
                    .to_string(),
                got: vec![b, xc, xh, xw],
                expected: vec![b, c, h, w],
            });
        }

        Ok(())
    }
}

fn loss_report(step: usize, loss: f32) -> String {
    format!("step {step}: loss={loss:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::MiniInception,
        channel,
        param::ParamConfig,
        transform::{Transform, imagenet_normalize},
    };

    fn small() -> RenderOptions {
        RenderOptions {
            param: ParamConfig {
                width: 8,
                height: 8,
                ..Default::default()
            },
            ..Default::default()
        }
        .with_seed(3)
    }

    fn model() -> MiniInception {
        MiniInception::new(&mut StdRng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn pipeline_is_assembled_in_order() {
        let mut model = model().with_input_size(6, 6);
        let session = RenderSession::new(&mut model, "conv1:0", small()).unwrap();

        let transforms = session.pipeline().transforms();
        let n = transforms.len();
        assert_eq!(n, default_transforms().len() + 2);
        assert_eq!(transforms[n - 2], imagenet_normalize());
        assert_eq!(
            transforms[n - 1],
            Transform::Resize {
                height: 6,
                width: 6
            }
        );
        assert_eq!(session.state(), RenderState::Initializing);
    }

    #[test]
    fn fixed_image_size_overrides_the_model_size() {
        let mut model = model();
        let options = RenderOptions {
            fixed_image_size: Some((10, 12)),
            preprocess: None,
            ..small()
        }
        .with_transforms(Vec::new());

        let session = RenderSession::new(&mut model, "conv1:0", options).unwrap();
        assert_eq!(session.pipeline().transforms(), &[resize(10, 12)]);
    }

    #[test]
    fn steps_default_to_the_largest_threshold() {
        let mut model = model();
        let options = small().with_thresholds([3, 9, 5]);
        let session = RenderSession::new(&mut model, "conv1:0", options).unwrap();

        assert_eq!(session.steps(), 9);
        assert_eq!(session.thresholds.iter().copied().collect::<Vec<_>>(), [3, 5, 9]);
    }

    #[test]
    fn out_of_range_thresholds_are_dropped() {
        let mut model = model();
        let options = small().with_steps(4).with_thresholds([0, 2, 10]);
        let session = RenderSession::new(&mut model, "conv1:0", options).unwrap();

        assert_eq!(session.thresholds.iter().copied().collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn batch_is_inferred_from_the_objective() {
        let mut model = model();
        let objective = channel("conv1", 0).with_batch(0) + channel("conv1", 1).with_batch(2);
        let session = RenderSession::new(&mut model, objective, small()).unwrap();

        assert_eq!(session.param().batch_size(), 3);
    }

    #[test]
    fn loss_report_names_the_step_and_the_loss() {
        assert_eq!(loss_report(7, -1.25), "step 7: loss=-1.250000");
        assert_eq!(loss_report(1, 0.5), "step 1: loss=0.500000");
    }

    #[test]
    fn verbose_render_reports_and_completes() {
        let mut model = model();
        let options = RenderOptions {
            verbose: true,
            ..small()
        }
        .with_thresholds([1, 2]);
        let images = RenderSession::new(&mut model, "conv1:0", options)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(images.len(), 2);
    }

    #[test]
    fn step_moves_the_parameters() {
        let mut model = model();
        let options = small().with_steps(1).with_thresholds(Vec::new());
        let mut session = RenderSession::new(&mut model, "conv1:0", options).unwrap();
        let before = session.param().params().to_vec();

        let loss = session.step().unwrap();
        assert!(loss.is_finite());
        assert_eq!(session.completed, 1);
        assert_ne!(session.param().params(), &before[..]);
    }
}
