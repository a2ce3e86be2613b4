use std::borrow::Cow;

use log::debug;
use ndarray::{Array4, ArrayView4, Zip};
use rand::Rng;

use super::{
    FourierBasis,
    color::{self, Mat3},
};
use crate::{
    Result, VisErr,
    initialization::{ParamGen, RandParamGen},
};

/// How the free parameters of an image batch are laid out and initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamConfig {
    pub batch: usize,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// Parameterize in a scaled Fourier basis instead of pixels.
    pub fft: bool,
    /// Mix channels with the ImageNet color decorrelation matrix before squashing.
    pub decorrelate: bool,
    /// Standard deviation of the initial parameters.
    pub sd: f32,
    pub decay_power: f32,
}

impl Default for ParamConfig {
    fn default() -> Self {
        Self {
            batch: 1,
            width: 128,
            height: 128,
            channels: 3,
            fft: true,
            decorrelate: true,
            sd: 0.01,
            decay_power: 1.,
        }
    }
}

impl ParamConfig {
    fn validate(&self) -> Result<()> {
        if self.batch == 0 || self.width == 0 || self.height == 0 || self.channels == 0 {
            return Err(VisErr::InvalidConfig(format!(
                "image parameterization needs a non-empty shape, got {}x{}x{}x{}",
                self.batch, self.channels, self.height, self.width
            )));
        }

        if self.decorrelate && self.channels != 3 {
            return Err(VisErr::InvalidConfig(format!(
                "color decorrelation needs 3 channels, got {}",
                self.channels
            )));
        }

        Ok(())
    }
}

#[derive(Debug)]
enum Basis {
    Pixel,
    Fourier(FourierBasis),
}

/// The free parameters of a batch of images and the fixed decode that turns them into
/// RGB values in `[0, 1]`: basis, then optional color decorrelation, then a sigmoid.
#[derive(Debug)]
pub struct ImageParam {
    config: ParamConfig,
    basis: Basis,
    params: Vec<f32>,
    color: Option<(Mat3, Mat3)>,
    decoded: Option<Array4<f32>>,
}

impl ImageParam {
    /// Creates a new `ImageParam` with parameters drawn from `N(0, sd)`.
    ///
    /// # Arguments
    /// * `config` - The shape and decode of the image batch.
    /// * `rng` - The session's random number generator.
    ///
    /// # Returns
    /// A new `ImageParam` or a config error for empty shapes, negative `sd` or
    /// decorrelation over something other than RGB.
    pub fn new<R: Rng>(config: &ParamConfig, rng: &mut R) -> Result<Self> {
        let mut param = Self::zeros(config)?;

        let len = param.params.len();
        param.params = RandParamGen::normal(rng, len, 0., config.sd)?.sample_exact(len);

        debug!(
            params = len, fft = config.fft, decorrelate = config.decorrelate;
            "initialized image parameterization"
        );
        Ok(param)
    }

    fn zeros(config: &ParamConfig) -> Result<Self> {
        config.validate()?;

        let ParamConfig { height, width, .. } = *config;
        let (basis, plane_len) = match config.fft {
            true => {
                let basis = FourierBasis::new(height, width, config.decay_power);
                let len = basis.plane_len();
                (Basis::Fourier(basis), len)
            }
            false => (Basis::Pixel, height * width),
        };

        let color = config.decorrelate.then(|| {
            let m = color::color_correlation_normalized();
            (m, color::transpose(&m))
        });

        Ok(Self {
            config: config.clone(),
            basis,
            params: vec![0.; config.batch * config.channels * plane_len],
            color,
            decoded: None,
        })
    }

    /// Creates an `ImageParam` that decodes into `image` (NHWC, values in `[0, 1]`).
    ///
    /// Values are clamped slightly inside `(0, 1)` before inverting the squash.
    pub fn from_image(config: &ParamConfig, image: ArrayView4<f32>) -> Result<Self> {
        let mut param = Self::zeros(config)?;
        let (b, c, h, w) = param.shape();

        if image.shape() != [b, h, w, c] {
            return Err(VisErr::ShapeMismatch {
                stage: "warm start image".to_string(),
                got: image.shape().to_vec(),
                expected: vec![b, h, w, c],
            });
        }

        let mut x = Array4::from_shape_fn((b, c, h, w), |(n, ch, y, x)| {
            color::logit(image[[n, y, x, ch]])
        });

        if let Some((m, _)) = &param.color {
            color::mix_channels(x.view_mut(), &color::invert(m)?)?;
        }

        let pixels: Vec<f32> = x.iter().copied().collect();
        match &param.basis {
            Basis::Pixel => param.params = pixels,
            Basis::Fourier(basis) => basis.encode(&pixels, &mut param.params),
        }

        Ok(param)
    }

    /// The decoded batch shape, `(batch, channels, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let c = &self.config;
        (c.batch, c.channels, c.height, c.width)
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch
    }

    pub fn config(&self) -> &ParamConfig {
        &self.config
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn render(&self) -> Result<Array4<f32>> {
        let shape = self.shape();
        let (b, c, h, w) = shape;

        let raw = match &self.basis {
            Basis::Pixel => self.params.clone(),
            Basis::Fourier(basis) => {
                let mut out = vec![0.; b * c * h * w];
                basis.decode(&self.params, &mut out);
                out
            }
        };

        let len = raw.len();
        let mut x = Array4::from_shape_vec(shape, raw).map_err(|_| VisErr::SizeMismatch {
            what: "decoded image",
            got: len,
            expected: b * c * h * w,
        })?;

        if let Some((m, _)) = &self.color {
            color::mix_channels(x.view_mut(), m)?;
        }

        color::squash(&mut x);
        Ok(x)
    }

    /// Decodes the current parameters into an NCHW batch and remembers it for `backward`.
    pub fn decode(&mut self) -> Result<Array4<f32>> {
        let x = self.render()?;
        self.decoded = Some(x.clone());
        Ok(x)
    }

    /// Pulls the gradient of the loss with respect to the decoded batch back onto the free
    /// parameters.
    ///
    /// # Arguments
    /// * `grad` - d(loss)/d(image), NCHW, as returned by the most recent `decode`.
    pub fn backward(&self, grad: ArrayView4<f32>) -> Result<Vec<f32>> {
        let y = match &self.decoded {
            Some(y) => Cow::Borrowed(y),
            None => Cow::Owned(self.render()?),
        };

        if grad.shape() != y.shape() {
            return Err(VisErr::ShapeMismatch {
                stage: "image gradient".to_string(),
                got: grad.shape().to_vec(),
                expected: y.shape().to_vec(),
            });
        }

        let mut g = Zip::from(grad)
            .and(y.view())
            .map_collect(|&g, &y| g * y * (1. - y));

        if let Some((_, mt)) = &self.color {
            color::mix_channels(g.view_mut(), mt)?;
        }

        let pixels: Vec<f32> = g.iter().copied().collect();
        match &self.basis {
            Basis::Pixel => Ok(pixels),
            Basis::Fourier(basis) => {
                let mut out = vec![0.; self.params.len()];
                basis.backward(&pixels, &mut out);
                Ok(out)
            }
        }
    }

    /// Decodes the current parameters into an NHWC batch without touching the state
    /// `backward` relies on.
    pub fn snapshot(&self) -> Result<Array4<f32>> {
        let x = self.render()?;
        Ok(x.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned())
    }
}
