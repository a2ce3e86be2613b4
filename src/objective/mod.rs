mod leaf;
#[allow(clippy::module_inception)]
mod objective;
mod parse;

pub use leaf::{BatchTarget, Leaf, LeafKind, Slots};
pub use objective::{
    BinOp, Objective, channel, direction, layer_mean, neuron, neuron_at,
};
pub use parse::IntoObjective;
