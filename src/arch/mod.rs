mod block;
pub mod layers;
mod mini_inception;

pub use block::Block;
pub use mini_inception::{MiniInception, WeightGen};
