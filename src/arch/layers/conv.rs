use std::{fmt, ops::Range};

use ndarray::{Array1, Array4, ArrayView4, Axis, s};
use rayon::prelude::*;

use crate::{Result, VisErr, initialization::ParamGen};

/// The output and input ranges along one axis for a kernel tap shifted by `d`.
fn shifted(d: isize, n: usize) -> Option<(Range<usize>, Range<usize>)> {
    let n = n as isize;
    let (lo, hi) = ((-d).max(0), (n - d).min(n));
    if lo >= hi {
        return None;
    }

    let out = lo as usize..hi as usize;
    let inp = (lo + d) as usize..(hi + d) as usize;
    Some((out, inp))
}

impl fmt::Display for Conv2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Conv2d({}, {}, kernel_size={}, padding={})",
            self.in_channels,
            self.out_channels,
            self.kernel,
            self.kernel / 2
        )
    }
}

/// A stride 1 convolution with same padding and frozen weights.
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    weights: Array4<f32>,
    bias: Array1<f32>,

    // Forward metadata
    input: Option<(usize, usize, usize, usize)>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `in_channels`, `out_channels` - The channels this layer reads and writes.
    /// * `kernel` - The side of the square kernel, must be odd.
    /// * `weight_gen` - The generator for the `[out, in, kernel, kernel]` weights.
    /// * `bias_gen` - The generator for the biases.
    ///
    /// # Returns
    /// A new `Conv2d` or a config error for an even kernel.
    pub fn new<W, B>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        weight_gen: &mut W,
        bias_gen: &mut B,
    ) -> Result<Self>
    where
        W: ParamGen + ?Sized,
        B: ParamGen + ?Sized,
    {
        if kernel % 2 == 0 {
            return Err(VisErr::InvalidConfig(format!(
                "convolution kernels must have an odd side, got {kernel}"
            )));
        }

        let shape = (out_channels, in_channels, kernel, kernel);
        let n = out_channels * in_channels * kernel * kernel;
        let weights = Array4::from_shape_vec(shape, weight_gen.sample_exact(n)).map_err(|_| {
            VisErr::SizeMismatch {
                what: "convolution weights",
                got: n,
                expected: n,
            }
        })?;
        let bias = Array1::from_vec(bias_gen.sample_exact(out_channels));

        Ok(Self {
            in_channels,
            out_channels,
            kernel,
            weights,
            bias,
            input: None,
        })
    }

    /// Returns the fan in of each output unit.
    pub fn fan_in(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn taps(&self) -> impl Iterator<Item = (usize, usize, isize, isize)> + '_ {
        let p = (self.kernel / 2) as isize;
        (0..self.kernel).flat_map(move |ky| {
            (0..self.kernel).map(move |kx| (ky, kx, ky as isize - p, kx as isize - p))
        })
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(VisErr::SizeMismatch {
                what: "convolution input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let mut y = Array4::zeros((b, self.out_channels, h, w));
        for (mut yb, xb) in y.axis_iter_mut(Axis(0)).zip(x.axis_iter(Axis(0))) {
            yb.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(o, mut plane)| {
                    plane.fill(self.bias[o]);

                    for (i, xi) in xb.axis_iter(Axis(0)).enumerate() {
                        for (ky, kx, dy, dx) in self.taps() {
                            let weight = self.weights[[o, i, ky, kx]];
                            let (Some((oy, iy)), Some((ox, ix))) = (shifted(dy, h), shifted(dx, w))
                            else {
                                continue;
                            };

                            plane
                                .slice_mut(s![oy, ox])
                                .scaled_add(weight, &xi.slice(s![iy, ix]));
                        }
                    }
                });
        }

        self.input = Some((b, c, h, w));
        Ok(y)
    }

    /// Computes the gradient with respect to the input; the weights stay frozen.
    pub fn backward(&self, grad: ArrayView4<f32>) -> Result<Array4<f32>> {
        let input = self.input.ok_or(VisErr::NotForwarded {
            layer: "convolution",
        })?;
        let (_, _, h, w) = input;

        let mut gx = Array4::zeros(input);
        for (mut gb, g) in gx.axis_iter_mut(Axis(0)).zip(grad.axis_iter(Axis(0))) {
            gb.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(i, mut plane)| {
                    for (o, go) in g.axis_iter(Axis(0)).enumerate() {
                        for (ky, kx, dy, dx) in self.taps() {
                            let weight = self.weights[[o, i, ky, kx]];
                            let (Some((oy, iy)), Some((ox, ix))) = (shifted(dy, h), shifted(dx, w))
                            else {
                                continue;
                            };

                            plane
                                .slice_mut(s![iy, ix])
                                .scaled_add(weight, &go.slice(s![oy, ox]));
                        }
                    }
                });
        }

        Ok(gx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::ConstParamGen;

    #[test]
    fn shifted_ranges() {
        assert_eq!(shifted(0, 4), Some((0..4, 0..4)));
        assert_eq!(shifted(1, 4), Some((0..3, 1..4)));
        assert_eq!(shifted(-1, 4), Some((1..4, 0..3)));
        assert_eq!(shifted(2, 1), None);
    }

    #[test]
    fn box_filter_with_zero_padding() {
        let mut conv = Conv2d::new(
            1,
            1,
            3,
            &mut ConstParamGen::new(1., 9),
            &mut ConstParamGen::new(0.5, 1),
        )
        .unwrap();

        let x = Array4::from_elem((1, 1, 3, 3), 1.);
        let y = conv.forward(x.view()).unwrap();

        assert_eq!(y[[0, 0, 1, 1]], 9.5);
        assert_eq!(y[[0, 0, 0, 0]], 4.5);
        assert_eq!(y[[0, 0, 0, 1]], 6.5);
    }

    #[test]
    fn backward_is_the_adjoint() {
        let mut state = 0.3f32;
        let mut next = move |_n: usize| {
            state = (state * 7.13 + 0.41).fract();
            state - 0.5
        };

        struct FnGen<F>(F);
        impl<F: FnMut(usize) -> f32> ParamGen for FnGen<F> {
            fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
                Some((0..n).map(|i| (self.0)(i)).collect())
            }
        }

        let mut conv =
            Conv2d::new(2, 3, 3, &mut FnGen(&mut next), &mut ConstParamGen::new(0., 3)).unwrap();
        let x = Array4::from_shape_simple_fn((2, 2, 4, 5), || next(0));
        let g = Array4::from_shape_simple_fn((2, 3, 4, 5), || next(0));

        let y = conv.forward(x.view()).unwrap();
        let gx = conv.backward(g.view()).unwrap();

        let lhs = (&y * &g).sum();
        let rhs = (&x * &gx).sum();
        assert!((lhs - rhs).abs() < 1e-4, "{lhs} vs {rhs}");
    }

    #[test]
    fn even_kernels_are_rejected() {
        let err = Conv2d::new(
            1,
            1,
            2,
            &mut ConstParamGen::new(1., 4),
            &mut ConstParamGen::new(0., 1),
        );
        assert!(err.is_err());
    }
}
