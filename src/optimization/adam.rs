use ndarray::{Array1, ArrayView1, ArrayViewMut1, Zip};

use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// The learning rate renders use unless told otherwise.
pub const DEFAULT_LEARNING_RATE: f32 = 5e-2;

/// Adam over an image's free parameters, with bias corrected moment estimates and the
/// epsilon added after the square root of the corrected second moment.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    betas: (f32, f32),
    epsilon: f32,
    steps: i32,
    mean: Array1<f32>,
    sq_mean: Array1<f32>,
}

impl Adam {
    /// Creates a new `Adam` optimizer for `len` parameters with zeroed moments.
    ///
    /// # Arguments
    /// * `len` - How many parameters the image exposes.
    /// * `learning_rate` - The largest step a single parameter takes on a render step.
    /// * `betas` - Decay rates of the gradient mean and the squared gradient mean.
    /// * `epsilon` - Keeps the update finite for parameters whose gradient stays at zero.
    pub fn new(len: usize, learning_rate: f32, betas: (f32, f32), epsilon: f32) -> Self {
        Self {
            learning_rate,
            betas,
            epsilon,
            steps: 0,
            mean: Array1::zeros(len),
            sq_mean: Array1::zeros(len),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(grad, self.mean.as_slice().unwrap_or_default())?;

        self.steps += 1;
        let (b1, b2) = self.betas;
        let mean_correction = 1. - b1.powi(self.steps);
        let sq_correction = 1. - b2.powi(self.steps);
        let (lr, eps) = (self.learning_rate, self.epsilon);

        Zip::from(ArrayViewMut1::from(params))
            .and(ArrayView1::from(grad))
            .and(&mut self.mean)
            .and(&mut self.sq_mean)
            .par_for_each(|p, &g, m, v| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g * g;

                let m_hat = *m / mean_correction;
                let v_hat = *v / sq_correction;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });

        Ok(())
    }
}
