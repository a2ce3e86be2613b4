use std::collections::HashMap;

use log::{debug, warn};
use ndarray::{Array4, ArrayD, ArrayView4, ArrayViewD, IxDyn};

use super::{DependencyGraph, HostModel, LayerFilter, LayerName, get_model_layers};
use crate::Result;

/// The activations captured during the most recent forward pass.
///
/// Only a `Recorder` handed out by `ActivationCapture` can write to it; everyone else gets
/// a shared reference to a single consistent snapshot per step.
#[derive(Debug, Default)]
pub struct ActivationMap {
    tensors: HashMap<LayerName, ArrayD<f32>>,
}

impl ActivationMap {
    pub fn get(&self, layer: &str) -> Option<ArrayViewD<'_, f32>> {
        self.tensors.get(layer).map(|t| t.view())
    }

    pub fn contains(&self, layer: &str) -> bool {
        self.tensors.contains_key(layer)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerName> {
        self.tensors.keys()
    }

    /// Builds a map directly from tensors, for evaluating objectives outside a render.
    pub fn from_tensors<I>(tensors: I) -> Self
    where
        I: IntoIterator<Item = (LayerName, ArrayD<f32>)>,
    {
        Self {
            tensors: tensors.into_iter().collect(),
        }
    }
}

/// Accumulates the gradient of the loss with respect to each targeted activation.
#[derive(Debug, Default)]
pub struct ActivationGrads {
    tensors: HashMap<LayerName, ArrayD<f32>>,
}

impl ActivationGrads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives mutable access to the gradient buffer of `layer`, creating a zeroed one with
    /// `shape` on first use.
    pub fn entry(&mut self, layer: &LayerName, shape: &[usize]) -> &mut ArrayD<f32> {
        self.tensors
            .entry(layer.clone())
            .or_insert_with(|| ArrayD::zeros(IxDyn(shape)))
    }

    pub fn get(&self, layer: &str) -> Option<ArrayViewD<'_, f32>> {
        self.tensors.get(layer).map(|t| t.view())
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerName> {
        self.tensors.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn clear(&mut self) {
        self.tensors.clear();
    }
}

/// The write handle a host model uses to report its layers' outputs during a forward pass.
pub struct Recorder<'a> {
    graph: &'a DependencyGraph,
    map: &'a mut ActivationMap,
}

impl Recorder<'_> {
    /// Records the output of the layer `name`, overwriting anything recorded before.
    pub fn record(&mut self, name: &LayerName, output: ArrayViewD<'_, f32>) {
        if !self.graph.contains(name.as_str()) {
            warn!(layer:% = name; "ignoring activation of a layer absent from the graph");
            return;
        }

        self.map.tensors.insert(name.clone(), output.to_owned());
    }
}

/// Instruments a host model: builds its dependency graph once and captures every
/// addressable layer's output on each forward pass.
pub struct ActivationCapture {
    graph: DependencyGraph,
    activations: ActivationMap,
}

impl ActivationCapture {
    /// Creates a new `ActivationCapture` for `model`.
    ///
    /// # Arguments
    /// * `model` - The model that will be run through this capture.
    ///
    /// # Returns
    /// A new `ActivationCapture` instance.
    pub fn new<M>(model: &M) -> Self
    where
        M: HostModel + ?Sized,
    {
        let (_, graph) = get_model_layers(model, &LayerFilter::all());
        debug!(layers = graph.len(); "built dependency graph");

        Self {
            graph,
            activations: ActivationMap::default(),
        }
    }

    /// Runs `model` over `x`, replacing the previous pass's activations.
    ///
    /// # Returns
    /// The freshly captured activations or the model's error.
    pub fn forward<M>(&mut self, model: &mut M, x: ArrayView4<f32>) -> Result<&ActivationMap>
    where
        M: HostModel + ?Sized,
    {
        self.activations.tensors.clear();

        let mut recorder = Recorder {
            graph: &self.graph,
            map: &mut self.activations,
        };
        model.forward(x, &mut recorder)?;

        Ok(&self.activations)
    }

    /// Runs the model's reverse pass from the given activation gradients.
    pub fn backward<M>(&self, model: &mut M, grads: &ActivationGrads) -> Result<Array4<f32>>
    where
        M: HostModel + ?Sized,
    {
        model.backward(grads)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}
