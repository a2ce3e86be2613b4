use ndarray::{ArrayView1, ArrayViewMut1};

use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Plain descent: every parameter moves against its gradient by a fixed fraction of it.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;

        ArrayViewMut1::from(params).scaled_add(-self.learning_rate, &ArrayView1::from(grad));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut sgd = GradientDescent::new(0.5);
        let mut params = [1., 2.];

        sgd.update_params(&[2., -2.], &mut params).unwrap();
        assert_eq!(params, [0., 3.]);
    }

    #[test]
    fn zero_gradient_leaves_parameters() {
        let mut sgd = GradientDescent::new(10.);
        let mut params = [0.25, -4.];

        sgd.update_params(&[0., 0.], &mut params).unwrap();
        assert_eq!(params, [0.25, -4.]);
    }
}
