mod activations;
mod graph;
mod model;
mod name;

pub use activations::{ActivationCapture, ActivationGrads, ActivationMap, Recorder};
pub use graph::{DependencyGraph, GraphNode, LayerFilter, get_layer_repr, get_model_layers};
pub use model::{HostModel, Module, ModuleKind};
pub use name::{LayerName, filter_layer_names};
