use ndarray::{Array1, ArrayView1, ArrayViewMut1, Zip};

use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Descent along a velocity that keeps a decaying sum of past gradients, so parameters
/// whose gradient keeps its sign across render steps speed up.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Array1<f32>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` at rest.
    ///
    /// # Arguments
    /// * `len` - How many parameters the image exposes.
    /// * `learning_rate` - Scales the velocity into a parameter step.
    /// * `momentum` - The fraction of the velocity carried over to the next step.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: Array1::zeros(len),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(grad, self.velocity.as_slice().unwrap_or_default())?;

        let grad = ArrayView1::from(grad);
        self.velocity *= self.momentum;
        self.velocity += &grad;

        Zip::from(ArrayViewMut1::from(params))
            .and(&self.velocity)
            .for_each(|p, &v| *p -= self.learning_rate * v);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates() {
        let mut opt = GradientDescentWithMomentum::new(1, 1., 0.5);
        let mut params = [0.];

        opt.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-1.]);

        opt.update_params(&[1.], &mut params).unwrap();
        assert_eq!(params, [-2.5]);
    }

    #[test]
    fn velocity_must_match_the_parameters() {
        let mut opt = GradientDescentWithMomentum::new(2, 1., 0.5);
        assert!(opt.update_params(&[1.], &mut [0.]).is_err());
    }
}
