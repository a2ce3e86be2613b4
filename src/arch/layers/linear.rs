use std::fmt;

use ndarray::{Array1, Array2, ArrayView2, linalg};

use crate::{Result, VisErr, initialization::ParamGen};

impl fmt::Display for Linear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (inputs, outputs) = self.dim;
        write!(f, "Linear(in_features={inputs}, out_features={outputs})")
    }
}

/// A fully connected layer with frozen weights.
#[derive(Debug, Clone)]
pub struct Linear {
    dim: (usize, usize),
    weights: Array2<f32>,
    bias: Array1<f32>,

    // Forward metadata
    batch: Option<usize>,
}

impl Linear {
    /// Creates a new `Linear` layer.
    ///
    /// # Arguments
    /// * `dim` - The `(inputs, outputs)` of the layer.
    /// * `weight_gen` - The generator for the `inputs x outputs` weights.
    /// * `bias_gen` - The generator for the biases.
    pub fn new<W, B>(dim: (usize, usize), weight_gen: &mut W, bias_gen: &mut B) -> Result<Self>
    where
        W: ParamGen + ?Sized,
        B: ParamGen + ?Sized,
    {
        let n = dim.0 * dim.1;
        let weights =
            Array2::from_shape_vec(dim, weight_gen.sample_exact(n)).map_err(|_| {
                VisErr::SizeMismatch {
                    what: "linear weights",
                    got: n,
                    expected: n,
                }
            })?;

        Ok(Self {
            dim,
            weights,
            bias: Array1::from_vec(bias_gen.sample_exact(dim.1)),
            batch: None,
        })
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(VisErr::SizeMismatch {
                what: "linear inputs",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &self.weights, 0.0, &mut z);
        z += &self.bias;

        self.batch = Some(x.nrows());
        Ok(z)
    }

    /// The shape of the last output, for seeding a reverse pass.
    pub fn output_dim(&self) -> Option<(usize, usize)> {
        self.batch.map(|b| (b, self.dim.1))
    }

    pub fn backward(&self, grad: ArrayView2<f32>) -> Result<Array2<f32>> {
        let batch = self.batch.ok_or(VisErr::NotForwarded { layer: "linear" })?;

        let mut d = Array2::zeros((batch, self.dim.0));
        linalg::general_mat_mul(1.0, &grad, &self.weights.t(), 0.0, &mut d);
        Ok(d)
    }
}
