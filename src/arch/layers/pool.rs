use std::fmt;

use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis, s};

use crate::{Result, VisErr};

/// Average pooling over non overlapping `size x size` windows; trailing rows and columns
/// that don't fill a window are dropped.
#[derive(Debug, Clone)]
pub struct AvgPool2d {
    size: usize,
    input: Option<(usize, usize, usize, usize)>,
}

impl fmt::Display for AvgPool2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AvgPool2d(kernel_size={})", self.size)
    }
}

impl AvgPool2d {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            input: None,
        }
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();
        let k = self.size;
        if h < k || w < k {
            return Err(VisErr::SizeMismatch {
                what: "pooling input side",
                got: h.min(w),
                expected: k,
            });
        }

        let area = (k * k) as f32;
        let y = Array4::from_shape_fn((b, c, h / k, w / k), |(n, ch, y, xx)| {
            x_window(&x, n, ch, y, xx, k).sum() / area
        });

        self.input = Some((b, c, h, w));
        Ok(y)
    }

    pub fn backward(&self, grad: ArrayView4<f32>) -> Result<Array4<f32>> {
        let input = self.input.ok_or(VisErr::NotForwarded { layer: "average pool" })?;
        let k = self.size;
        let area = (k * k) as f32;

        let mut gx = Array4::zeros(input);
        for ((n, ch, y, xx), &g) in grad.indexed_iter() {
            gx.slice_mut(s![n, ch, y * k..(y + 1) * k, xx * k..(xx + 1) * k])
                .fill(g / area);
        }

        Ok(gx)
    }
}

fn x_window<'a>(
    x: &'a ArrayView4<f32>,
    n: usize,
    ch: usize,
    y: usize,
    xx: usize,
    k: usize,
) -> ArrayView2<'a, f32> {
    x.slice(s![n, ch, y * k..(y + 1) * k, xx * k..(xx + 1) * k])
}

/// Averages every channel over its spatial positions.
#[derive(Debug, Clone, Default)]
pub struct GlobalAvgPool {
    input: Option<(usize, usize, usize, usize)>,
}

impl fmt::Display for GlobalAvgPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalAvgPool")
    }
}

impl GlobalAvgPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayView4<f32>) -> Array2<f32> {
        let (b, c, h, w) = x.dim();
        self.input = Some((b, c, h, w));

        let area = (h * w).max(1) as f32;
        x.sum_axis(Axis(3)).sum_axis(Axis(2)) / area
    }

    pub fn backward(&self, grad: ArrayView2<f32>) -> Result<Array4<f32>> {
        let input = self.input.ok_or(VisErr::NotForwarded {
            layer: "global average pool",
        })?;
        let (_, _, h, w) = input;
        let area = (h * w).max(1) as f32;

        Ok(Array4::from_shape_fn(input, |(n, ch, _, _)| {
            grad[[n, ch]] / area
        }))
    }
}
