use std::fmt;

use serde::{Deserialize, Serialize};

use super::CancelToken;
use crate::{
    Result, VisErr,
    optimization::{
        Adam, DEFAULT_LEARNING_RATE, GradientDescent, GradientDescentWithMomentum, Optimizer,
    },
    param::{ImageParam, ParamConfig},
    transform::{
        PadMode, SamplingMode, Transform, imagenet_normalize, inceptionv1_preprocess,
    },
};

/// The checkpoints a render keeps when none are given.
pub const DEFAULT_THRESHOLDS: [usize; 1] = [512];

/// A producer of a custom image parameterization.
pub type ParamFn = dyn FnOnce() -> Result<ImageParam>;

/// Everything a render needs besides the model and the objective.
pub struct RenderOptions {
    /// Shape and decode of the image. Its `batch` is replaced by `batch_size` or, when
    /// that is unset, by the batch size the objective requires.
    pub param: ParamConfig,
    pub batch_size: Option<usize>,
    /// Overrides `param` and `batch_size` with a ready-made parameterization.
    pub param_f: Option<Box<ParamFn>>,
    /// `None` uses `default_transforms()`. An empty list applies no transform at all.
    pub transforms: Option<Vec<Transform>>,
    /// Applied after the transforms, right before the final resize.
    pub preprocess: Option<Transform>,
    pub optimizer: OptimizerSpec,
    /// `None` runs up to the largest threshold.
    pub steps: Option<usize>,
    /// 1-based steps after which a snapshot is kept.
    pub thresholds: Vec<usize>,
    pub seed: Option<u64>,
    pub sampling: SamplingMode,
    /// `(height, width)` every transformed batch is resized to before the forward pass.
    pub fixed_image_size: Option<(usize, usize)>,
    pub verbose: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            param: ParamConfig::default(),
            batch_size: None,
            param_f: None,
            transforms: None,
            preprocess: Some(imagenet_normalize()),
            optimizer: OptimizerSpec::default(),
            steps: None,
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            seed: None,
            sampling: SamplingMode::default(),
            fixed_image_size: None,
            verbose: false,
            cancel: None,
        }
    }
}

impl fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderOptions")
            .field("param", &self.param)
            .field("batch_size", &self.batch_size)
            .field("param_f", &self.param_f.as_ref().map(|_| ".."))
            .field("transforms", &self.transforms)
            .field("preprocess", &self.preprocess)
            .field("optimizer", &self.optimizer)
            .field("steps", &self.steps)
            .field("thresholds", &self.thresholds)
            .field("seed", &self.seed)
            .field("sampling", &self.sampling)
            .field("fixed_image_size", &self.fixed_image_size)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl RenderOptions {
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_thresholds(mut self, thresholds: impl Into<Vec<usize>>) -> Self {
        self.thresholds = thresholds.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.transforms = Some(transforms);
        self
    }

    pub fn with_param(mut self, param: ParamConfig) -> Self {
        self.param = param;
        self
    }

    pub fn with_param_f<F>(mut self, param_f: F) -> Self
    where
        F: FnOnce() -> Result<ImageParam> + 'static,
    {
        self.param_f = Some(Box::new(param_f));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The number of steps to run: `steps`, or the largest threshold.
    pub fn resolved_steps(&self) -> usize {
        self.steps
            .unwrap_or_else(|| self.thresholds.iter().copied().max().unwrap_or(0))
    }
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        Self::Adam {
            learning_rate: DEFAULT_LEARNING_RATE,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl OptimizerSpec {
    /// Builds the optimizer for `len` free parameters.
    pub fn build(&self, len: usize) -> Box<dyn Optimizer> {
        match *self {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, learning_rate, (beta1, beta2), epsilon)),
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
        }
    }
}

/// The specification for the preprocessing applied before the forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessSpec {
    None,
    /// ImageNet mean and standard deviation.
    #[default]
    ImagenetNormalize,
    /// `x * 255 - 117`, for networks trained on unnormalized pixels.
    Inceptionv1,
}

impl PreprocessSpec {
    pub fn build(self) -> Option<Transform> {
        match self {
            PreprocessSpec::None => None,
            PreprocessSpec::ImagenetNormalize => Some(imagenet_normalize()),
            PreprocessSpec::Inceptionv1 => Some(inceptionv1_preprocess()),
        }
    }
}

/// The specification for a pad's border fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadModeSpec {
    Constant { value: f32 },
    Reflect,
}

/// The specification for the `Transform` enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformSpec {
    Pad { size: usize, mode: PadModeSpec },
    Jitter { radius: usize },
    RandomScale { factors: Vec<f32> },
    RandomRotate { angles: Vec<f32> },
    Resize { height: usize, width: usize },
    Normalize { mean: Vec<f32>, std: Vec<f32> },
    Affine { scale: f32, offset: f32 },
}

impl From<TransformSpec> for Transform {
    fn from(spec: TransformSpec) -> Self {
        match spec {
            TransformSpec::Pad { size, mode } => {
                let mode = match mode {
                    PadModeSpec::Constant { value } => PadMode::Constant(value),
                    PadModeSpec::Reflect => PadMode::Reflect,
                };
                Transform::Pad { size, mode }
            }
            TransformSpec::Jitter { radius } => Transform::Jitter(radius),
            TransformSpec::RandomScale { factors } => Transform::RandomScale(factors),
            TransformSpec::RandomRotate { angles } => Transform::RandomRotate(angles),
            TransformSpec::Resize { height, width } => Transform::Resize { height, width },
            TransformSpec::Normalize { mean, std } => Transform::Normalize { mean, std },
            TransformSpec::Affine { scale, offset } => Transform::Affine { scale, offset },
        }
    }
}

/// The specification for the image parameterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSpec {
    pub batch: Option<usize>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub fft: bool,
    pub decorrelate: bool,
    pub sd: f32,
    pub decay_power: f32,
}

impl Default for ParamSpec {
    fn default() -> Self {
        let config = ParamConfig::default();
        Self {
            batch: None,
            width: config.width,
            height: config.height,
            channels: config.channels,
            fft: config.fft,
            decorrelate: config.decorrelate,
            sd: config.sd,
            decay_power: config.decay_power,
        }
    }
}

/// The specification of a whole render, as read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSpec {
    pub steps: Option<usize>,
    pub thresholds: Vec<usize>,
    pub seed: Option<u64>,
    pub sampling: SamplingMode,
    pub fixed_image_size: Option<(usize, usize)>,
    pub verbose: bool,
    pub preprocess: PreprocessSpec,
    pub optimizer: OptimizerSpec,
    pub param: ParamSpec,
    /// `None` uses the default transforms.
    pub transforms: Option<Vec<TransformSpec>>,
}

impl Default for RenderSpec {
    fn default() -> Self {
        Self {
            steps: None,
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            seed: None,
            sampling: SamplingMode::default(),
            fixed_image_size: None,
            verbose: false,
            preprocess: PreprocessSpec::default(),
            optimizer: OptimizerSpec::default(),
            param: ParamSpec::default(),
            transforms: None,
        }
    }
}

impl RenderSpec {
    /// Parses a `RenderSpec` from JSON, filling every missing field with its default.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves this specification into the options of a render.
    ///
    /// # Returns
    /// The render options or a config error for values no render could run with.
    pub fn into_options(self) -> Result<RenderOptions> {
        self.validate()?;

        let ParamSpec {
            batch,
            width,
            height,
            channels,
            fft,
            decorrelate,
            sd,
            decay_power,
        } = self.param;

        let param = ParamConfig {
            batch: batch.unwrap_or(1),
            width,
            height,
            channels,
            fft,
            decorrelate,
            sd,
            decay_power,
        };

        Ok(RenderOptions {
            param,
            batch_size: batch,
            param_f: None,
            transforms: self
                .transforms
                .map(|specs| specs.into_iter().map(Transform::from).collect()),
            preprocess: self.preprocess.build(),
            optimizer: self.optimizer,
            steps: self.steps,
            thresholds: self.thresholds,
            seed: self.seed,
            sampling: self.sampling,
            fixed_image_size: self.fixed_image_size,
            verbose: self.verbose,
            cancel: None,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.param.batch == Some(0) {
            return Err(VisErr::InvalidConfig(
                "param.batch must be greater than 0".into(),
            ));
        }

        if self.param.sd < 0. || !self.param.sd.is_finite() {
            return Err(VisErr::InvalidConfig(format!(
                "param.sd must be a non-negative number, got {}",
                self.param.sd
            )));
        }

        if let Some((h, w)) = self.fixed_image_size {
            if h == 0 || w == 0 {
                return Err(VisErr::InvalidConfig(format!(
                    "fixed_image_size must be non-empty, got {h}x{w}"
                )));
            }
        }

        let learning_rate = match self.optimizer {
            OptimizerSpec::Adam { learning_rate, .. }
            | OptimizerSpec::GradientDescent { learning_rate }
            | OptimizerSpec::GradientDescentWithMomentum { learning_rate, .. } => learning_rate,
        };
        if learning_rate <= 0. || !learning_rate.is_finite() {
            return Err(VisErr::InvalidConfig(format!(
                "learning_rate must be positive, got {learning_rate}"
            )));
        }

        Ok(())
    }
}
