pub mod arch;
pub mod capture;
pub mod error;
pub mod initialization;
pub mod objective;
pub mod optimization;
pub mod param;
pub mod render;
pub mod transform;

pub use capture::{
    ActivationCapture, ActivationGrads, ActivationMap, DependencyGraph, HostModel, LayerFilter,
    LayerName, Module, ModuleKind, Recorder, filter_layer_names, get_layer_repr,
    get_model_layers,
};
pub use error::{ErrorKind, Result, VisErr};
pub use objective::{
    BatchTarget, IntoObjective, Leaf, LeafKind, Objective, channel, direction, layer_mean,
    neuron, neuron_at,
};
pub use render::{CancelToken, RenderOptions, RenderSpec, render_vis};
