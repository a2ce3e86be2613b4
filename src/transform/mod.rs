mod op;
mod pipeline;
mod resample;
#[allow(clippy::module_inception)]
mod transform;

pub use op::{Op, Shape};
pub use pipeline::{Pipeline, TransformTrace};
pub use resample::Sampler;
pub use transform::{
    PadMode, SamplingMode, Transform, affine, default_transforms, imagenet_normalize,
    inceptionv1_preprocess, jitter, normalize, pad, random_rotate, random_scale, resize,
};
