use std::fmt;

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use super::{Op, Sampler};
use crate::{Result, VisErr};

/// How a padded border is filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadMode {
    Constant(f32),
    Reflect,
}

/// How random transforms draw their parameters across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// One draw per step, applied to every image of the batch.
    #[default]
    Shared,
    /// Independent jitter offsets and rotation angles for every image. Scale factors are
    /// still shared since the batch must keep a single shape.
    PerSample,
}

/// A differentiable, possibly random, image augmentation.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Pad { size: usize, mode: PadMode },
    /// Translation by an integer offset drawn from `[-radius, radius]` on each axis.
    Jitter(usize),
    /// Bilinear rescale by one of the factors.
    RandomScale(Vec<f32>),
    /// Bilinear rotation by one of the angles, in degrees.
    RandomRotate(Vec<f32>),
    Resize { height: usize, width: usize },
    /// `(x - mean[c]) / std[c]` per channel.
    Normalize { mean: Vec<f32>, std: Vec<f32> },
    /// `x * scale + offset` on every channel.
    Affine { scale: f32, offset: f32 },
}

pub fn pad(size: usize, mode: PadMode) -> Transform {
    Transform::Pad { size, mode }
}

pub fn jitter(radius: usize) -> Transform {
    Transform::Jitter(radius)
}

pub fn random_scale(factors: impl Into<Vec<f32>>) -> Transform {
    Transform::RandomScale(factors.into())
}

pub fn random_rotate(angles: impl Into<Vec<f32>>) -> Transform {
    Transform::RandomRotate(angles.into())
}

pub fn resize(height: usize, width: usize) -> Transform {
    Transform::Resize { height, width }
}

pub fn normalize(mean: impl Into<Vec<f32>>, std: impl Into<Vec<f32>>) -> Transform {
    Transform::Normalize {
        mean: mean.into(),
        std: std.into(),
    }
}

pub fn affine(scale: f32, offset: f32) -> Transform {
    Transform::Affine { scale, offset }
}

/// Normalization with the channel statistics of ImageNet.
pub fn imagenet_normalize() -> Transform {
    normalize([0.485, 0.456, 0.406], [0.229, 0.224, 0.225])
}

/// The input range InceptionV1 was trained on.
pub fn inceptionv1_preprocess() -> Transform {
    affine(255., -117.)
}

/// The augmentations applied when a render doesn't ask for any.
pub fn default_transforms() -> Vec<Transform> {
    let factors: Vec<f32> = (0..11).map(|i| 1. + (i as f32 - 5.) / 50.).collect();
    let angles: Vec<f32> = (-10..=10)
        .map(|a| a as f32)
        .chain(std::iter::repeat_n(0., 5))
        .collect();

    vec![
        pad(12, PadMode::Constant(0.5)),
        jitter(8),
        random_scale(factors),
        random_rotate(angles),
        jitter(4),
    ]
}

impl Transform {
    /// Draws the concrete operation this transform applies to a batch of `shape`.
    ///
    /// # Errors
    /// A config error for empty choice lists or non-positive sizes, a shape error when a
    /// per-channel transform doesn't match the channel count.
    pub fn sample<R: Rng>(
        &self,
        shape: (usize, usize, usize, usize),
        rng: &mut R,
        mode: SamplingMode,
    ) -> Result<Op> {
        let (b, c, h, w) = shape;
        let draws = match mode {
            SamplingMode::Shared => 1,
            SamplingMode::PerSample => b,
        };

        let op = match self {
            Transform::Pad { size, mode } => Op::Pad {
                size: *size,
                mode: *mode,
            },
            Transform::Jitter(radius) => {
                let r = *radius as i64;
                let mut offset = || rng.random_range(-r..=r) as isize;
                let offsets = (0..draws).map(|_| (offset(), offset())).collect();
                Op::Translate { offsets }
            }
            Transform::RandomScale(factors) => {
                let factor = *self.choose(factors, rng)?;
                let out_h = ((h as f32 * factor).round() as usize).max(1);
                let out_w = ((w as f32 * factor).round() as usize).max(1);
                Op::Resample {
                    samplers: vec![Sampler::resize(h, w, out_h, out_w)],
                }
            }
            Transform::RandomRotate(angles) => {
                let samplers = (0..draws)
                    .map(|_| -> Result<Sampler> {
                        Ok(Sampler::rotate(h, w, *self.choose(angles, rng)?))
                    })
                    .collect::<Result<_>>()?;
                Op::Resample { samplers }
            }
            Transform::Resize { height, width } => {
                if *height == 0 || *width == 0 {
                    return Err(VisErr::InvalidConfig(format!("{self} has an empty size")));
                }
                Op::Resample {
                    samplers: vec![Sampler::resize(h, w, *height, *width)],
                }
            }
            Transform::Normalize { mean, std } => {
                if mean.len() != c || std.len() != c {
                    return Err(VisErr::ShapeMismatch {
                        stage: self.to_string(),
                        got: vec![b, c, h, w],
                        expected: vec![b, mean.len(), h, w],
                    });
                }
                if std.iter().any(|&s| s == 0.) {
                    return Err(VisErr::InvalidConfig(format!(
                        "{self} divides by a zero standard deviation"
                    )));
                }

                Op::Channelwise {
                    scale: std.iter().map(|s| 1. / s).collect(),
                    offset: mean.iter().zip(std).map(|(m, s)| -m / s).collect(),
                }
            }
            Transform::Affine { scale, offset } => Op::Channelwise {
                scale: vec![*scale; c],
                offset: vec![*offset; c],
            },
        };

        Ok(op)
    }

    fn choose<'a, R: Rng>(&self, values: &'a [f32], rng: &mut R) -> Result<&'a f32> {
        values
            .choose(rng)
            .ok_or_else(|| VisErr::InvalidConfig(format!("{self} has nothing to choose from")))
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Pad {
                size,
                mode: PadMode::Constant(v),
            } => write!(f, "pad({size}, constant {v})"),
            Transform::Pad {
                size,
                mode: PadMode::Reflect,
            } => write!(f, "pad({size}, reflect)"),
            Transform::Jitter(radius) => write!(f, "jitter({radius})"),
            Transform::RandomScale(factors) => write!(f, "random_scale({} factors)", factors.len()),
            Transform::RandomRotate(angles) => write!(f, "random_rotate({} angles)", angles.len()),
            Transform::Resize { height, width } => write!(f, "resize({height}x{width})"),
            Transform::Normalize { .. } => write!(f, "normalize"),
            Transform::Affine { scale, offset } => write!(f, "affine(x * {scale} + {offset})"),
        }
    }
}
