mod cancel;
mod config;
mod session;

pub use cancel::CancelToken;
pub use config::{
    DEFAULT_THRESHOLDS, OptimizerSpec, PadModeSpec, ParamFn, ParamSpec, PreprocessSpec,
    RenderOptions, RenderSpec, TransformSpec,
};
pub use session::{RenderSession, RenderState};

use ndarray::Array4;

use crate::{HostModel, Result, objective::IntoObjective};

/// Optimizes an image batch so that it maximizes `objective` on `model`.
///
/// # Arguments
/// * `model` - The host network.
/// * `objective` - An `Objective` or a `"layer:channel"` shorthand.
/// * `options` - The configuration of the render.
///
/// # Returns
/// The NHWC image batches kept at every threshold, in order, or the error that aborted
/// the render.
pub fn render_vis<M, O>(
    model: &mut M,
    objective: O,
    options: RenderOptions,
) -> Result<Vec<Array4<f32>>>
where
    M: HostModel + ?Sized,
    O: IntoObjective,
{
    RenderSession::new(model, objective, options)?.run()
}
