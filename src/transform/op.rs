use std::borrow::Cow;

use ndarray::{Array4, Axis, s};
use rayon::prelude::*;

use super::{PadMode, Sampler};
use crate::{Result, VisErr};

pub type Shape = (usize, usize, usize, usize);

/// A sampled transform: every random choice already made, ready to run forward and back.
#[derive(Debug, Clone)]
pub enum Op {
    Pad {
        size: usize,
        mode: PadMode,
    },
    /// One `(dx, dy)` for the whole batch or one per image.
    Translate {
        offsets: Vec<(isize, isize)>,
    },
    /// One sampler for the whole batch or one per image.
    Resample {
        samplers: Vec<Sampler>,
    },
    /// `x * scale[c] + offset[c]`.
    Channelwise {
        scale: Vec<f32>,
        offset: Vec<f32>,
    },
}

fn per_image<T>(values: &[T], b: usize) -> &T {
    &values[b.min(values.len() - 1)]
}

/// Mirrors `i` back into `[0, n)` without repeating the edge.
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }

    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    match i < n as isize {
        true => i as usize,
        false => (period - i) as usize,
    }
}

fn planes(x: &Array4<f32>) -> Cow<'_, [f32]> {
    match x.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(x.iter().copied().collect()),
    }
}

fn from_planes(shape: Shape, data: Vec<f32>) -> Result<Array4<f32>> {
    let len = data.len();
    Array4::from_shape_vec(shape, data).map_err(|_| VisErr::SizeMismatch {
        what: "resampled batch",
        got: len,
        expected: shape.0 * shape.1 * shape.2 * shape.3,
    })
}

impl Op {
    /// The shape this op produces from an input of `shape`.
    pub fn output_shape(&self, shape: Shape) -> Shape {
        let (b, c, h, w) = shape;
        match self {
            Op::Pad { size, .. } => (b, c, h + 2 * size, w + 2 * size),
            Op::Resample { samplers } => match samplers.first() {
                Some(sampler) => {
                    let (oh, ow) = sampler.output_size();
                    (b, c, oh, ow)
                }
                None => shape,
            },
            Op::Translate { .. } | Op::Channelwise { .. } => shape,
        }
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        let (b, c, h, w) = x.dim();

        let y = match self {
            Op::Pad {
                size: p,
                mode: PadMode::Constant(v),
            } => {
                let p = *p;
                let mut y = Array4::from_elem((b, c, h + 2 * p, w + 2 * p), *v);
                y.slice_mut(s![.., .., p..p + h, p..p + w]).assign(x);
                y
            }
            Op::Pad {
                size: p,
                mode: PadMode::Reflect,
            } => {
                let p = *p as isize;
                let shape = self.output_shape(x.dim());
                Array4::from_shape_fn(shape, |(n, ch, y, xx)| {
                    x[[n, ch, reflect(y as isize - p, h), reflect(xx as isize - p, w)]]
                })
            }
            Op::Translate { offsets } => Array4::from_shape_fn(x.dim(), |(n, ch, y, xx)| {
                let (dx, dy) = *per_image(offsets, n);
                let (sy, sx) = (y as isize - dy, xx as isize - dx);
                match (0..h as isize).contains(&sy) && (0..w as isize).contains(&sx) {
                    true => x[[n, ch, sy as usize, sx as usize]],
                    false => 0.,
                }
            }),
            Op::Resample { samplers } => {
                let shape = self.output_shape(x.dim());
                let (_, _, oh, ow) = shape;
                let src = planes(x);

                let mut out = vec![0.; b * c * oh * ow];
                out.par_chunks_mut(oh * ow)
                    .zip(src.par_chunks(h * w))
                    .enumerate()
                    .for_each(|(plane, (dst, src))| {
                        per_image(samplers, plane / c).forward(src, dst)
                    });

                from_planes(shape, out)?
            }
            Op::Channelwise { scale, offset } => {
                let mut y = x.clone();
                for (ch, mut plane) in y.axis_iter_mut(Axis(1)).enumerate() {
                    let (a, o) = (scale[ch], offset[ch]);
                    plane.mapv_inplace(|v| v * a + o);
                }
                y
            }
        };

        Ok(y)
    }

    /// Pulls `grad`, the gradient with respect to this op's output, back to its input of
    /// shape `input`.
    pub fn backward(&self, grad: &Array4<f32>, input: Shape) -> Result<Array4<f32>> {
        let (b, c, h, w) = input;

        let gx = match self {
            Op::Pad {
                size: p,
                mode: PadMode::Constant(_),
            } => {
                let p = *p;
                grad.slice(s![.., .., p..p + h, p..p + w]).to_owned()
            }
            Op::Pad {
                size: p,
                mode: PadMode::Reflect,
            } => {
                let p = *p as isize;
                let mut gx = Array4::zeros(input);
                for ((n, ch, y, xx), &g) in grad.indexed_iter() {
                    gx[[n, ch, reflect(y as isize - p, h), reflect(xx as isize - p, w)]] += g;
                }
                gx
            }
            Op::Translate { offsets } => Array4::from_shape_fn(input, |(n, ch, y, xx)| {
                let (dx, dy) = *per_image(offsets, n);
                let (oy, ox) = (y as isize + dy, xx as isize + dx);
                match (0..h as isize).contains(&oy) && (0..w as isize).contains(&ox) {
                    true => grad[[n, ch, oy as usize, ox as usize]],
                    false => 0.,
                }
            }),
            Op::Resample { samplers } => {
                let (_, _, oh, ow) = grad.dim();
                let src = planes(grad);

                let mut out = vec![0.; b * c * h * w];
                out.par_chunks_mut(h * w)
                    .zip(src.par_chunks(oh * ow))
                    .enumerate()
                    .for_each(|(plane, (dst, g))| {
                        per_image(samplers, plane / c).backward(g, dst)
                    });

                from_planes(input, out)?
            }
            Op::Channelwise { scale, .. } => {
                let mut gx = grad.clone();
                for (ch, mut plane) in gx.axis_iter_mut(Axis(1)).enumerate() {
                    let a = scale[ch];
                    plane.mapv_inplace(|g| g * a);
                }
                gx
            }
        };

        Ok(gx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflection_does_not_repeat_the_edge() {
        let idx: Vec<_> = (-3..7).map(|i| reflect(i, 4)).collect();
        assert_eq!(idx, [3, 2, 1, 0, 1, 2, 3, 2, 1, 0]);
        assert_eq!(reflect(-2, 1), 0);
    }

    #[test]
    fn translation_fills_with_zeros() {
        let x = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, y, x)| (y * 3 + x + 1) as f32);
        let op = Op::Translate {
            offsets: vec![(1, -1)],
        };

        let y = op.forward(&x).unwrap();
        let expected = [[0., 4., 5.], [0., 7., 8.], [0., 0., 0.]];
        for ((_, _, i, j), &v) in y.indexed_iter() {
            assert_eq!(v, expected[i][j]);
        }
    }

    #[test]
    fn per_image_offsets() {
        let x = Array4::from_elem((2, 1, 2, 2), 1.);
        let op = Op::Translate {
            offsets: vec![(0, 0), (1, 1)],
        };

        let y = op.forward(&x).unwrap();
        assert_eq!(y.index_axis(Axis(0), 0).sum(), 4.);
        assert_eq!(y.index_axis(Axis(0), 1).sum(), 1.);
    }
}
