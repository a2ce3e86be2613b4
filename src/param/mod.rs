mod color;
mod fourier;
mod image;

pub use color::{logit, sigmoid};
pub use fourier::FourierBasis;
pub use image::{ImageParam, ParamConfig};
