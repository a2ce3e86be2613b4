use std::fmt;

use ndarray::{Array4, ArrayView4, Zip};

use crate::{Result, VisErr};

#[derive(Debug, Clone, Default)]
pub struct Relu {
    x: Option<Array4<f32>>,
}

impl fmt::Display for Relu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReLU")
    }
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Array4<f32> {
        self.x = Some(x.to_owned());
        x.mapv(|v| v.max(0.))
    }

    pub fn backward(&self, grad: ArrayView4<f32>) -> Result<Array4<f32>> {
        let x = self.x.as_ref().ok_or(VisErr::NotForwarded { layer: "relu" })?;
        Ok(Zip::from(grad)
            .and(x)
            .map_collect(|&g, &x| if x > 0. { g } else { 0. }))
    }
}
