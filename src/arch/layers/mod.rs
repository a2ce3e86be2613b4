mod conv;
mod linear;
mod pool;
mod relu;

pub use conv::Conv2d;
pub use linear::Linear;
pub use pool::{AvgPool2d, GlobalAvgPool};
pub use relu::Relu;
