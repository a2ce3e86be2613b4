use std::fmt;

use ndarray::{Array4, ArrayView4};

use super::{ActivationGrads, Recorder};
use crate::Result;

/// The kind of a module in the host network, used to decide whether it is addressable
/// and whether it is listed by `get_model_layers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// A pure grouping container: its children are traversed but it has no name of its own.
    Sequential,
    /// A composite module with an output of its own (e.g. an inception block).
    Block,
    Conv,
    Linear,
    Activation,
    Normalization,
    Pooling,
    Other,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ModuleKind::Sequential => "sequential",
            ModuleKind::Block => "block",
            ModuleKind::Conv => "conv",
            ModuleKind::Linear => "linear",
            ModuleKind::Activation => "activation",
            ModuleKind::Normalization => "normalization",
            ModuleKind::Pooling => "pooling",
            ModuleKind::Other => "other",
        };
        write!(f, "{kind}")
    }
}

/// A description of one module of the host network and its children, in declaration order.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub kind: ModuleKind,
    pub description: Option<String>,
    pub children: Vec<Module>,
}

impl Module {
    /// Creates a module without children.
    pub fn new(name: &str, kind: ModuleKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: None,
            children: Vec::new(),
        }
    }

    /// Creates a module with the given children.
    pub fn with_children<I>(name: &str, kind: ModuleKind, children: I) -> Self
    where
        I: IntoIterator<Item = Module>,
    {
        Self {
            name: name.to_string(),
            kind,
            description: None,
            children: children.into_iter().collect(),
        }
    }

    /// Attaches a human readable description of the layer, such as its hyperparameters.
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The module's description, falling back to its kind.
    pub fn describe(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.kind.to_string())
    }

    /// Whether this module produces an activation that can be targeted.
    pub fn is_addressable(&self) -> bool {
        self.kind != ModuleKind::Sequential
    }
}

/// The boundary with the differentiable network being visualized.
///
/// The engine never mutates the network's weights: `forward` only caches whatever the
/// reverse pass needs, and `backward` only propagates gradients towards the input.
pub trait HostModel {
    /// The top level modules of the network.
    fn modules(&self) -> Vec<Module>;

    /// The `(channels, height, width)` the network requires, if it requires a fixed one.
    fn input_shape(&self) -> Option<[usize; 3]> {
        None
    }

    /// Runs a forward pass over an NCHW batch, recording every addressable module's
    /// output through `recorder`.
    fn forward(&mut self, x: ArrayView4<f32>, recorder: &mut Recorder<'_>) -> Result<()>;

    /// Propagates the gradients of the loss with respect to the recorded activations
    /// back to the input of the last forward pass.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input batch.
    fn backward(&mut self, grads: &ActivationGrads) -> Result<Array4<f32>>;
}
