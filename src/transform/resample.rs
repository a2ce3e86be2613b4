/// A fixed bilinear resampling of one `in_h x in_w` plane into an `out_h x out_w` plane.
///
/// Every output pixel reads four taps of the input; taps falling outside the input carry a
/// zero weight. The same taps drive the reverse pass, which makes it the exact adjoint.
#[derive(Debug, Clone)]
pub struct Sampler {
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
    taps: Vec<[(usize, f32); 4]>,
}

impl Sampler {
    /// Builds a sampler from the source coordinate of every output pixel.
    ///
    /// # Arguments
    /// * `source` - Maps an output `(y, x)` to the input `(y, x)` it reads from.
    fn from_fn<F>(in_h: usize, in_w: usize, out_h: usize, out_w: usize, source: F) -> Self
    where
        F: Fn(f32, f32) -> (f32, f32),
    {
        let mut taps = Vec::with_capacity(out_h * out_w);

        for oy in 0..out_h {
            for ox in 0..out_w {
                let (sy, sx) = source(oy as f32, ox as f32);
                let (y0, x0) = (sy.floor(), sx.floor());
                let (fy, fx) = (sy - y0, sx - x0);

                let tap = |dy: f32, dx: f32, weight: f32| {
                    let (y, x) = (y0 + dy, x0 + dx);
                    let inside = y >= 0. && x >= 0. && y < in_h as f32 && x < in_w as f32;
                    match inside && weight != 0. {
                        true => (y as usize * in_w + x as usize, weight),
                        false => (0, 0.),
                    }
                };

                taps.push([
                    tap(0., 0., (1. - fy) * (1. - fx)),
                    tap(0., 1., (1. - fy) * fx),
                    tap(1., 0., fy * (1. - fx)),
                    tap(1., 1., fy * fx),
                ]);
            }
        }

        Self {
            in_h,
            in_w,
            out_h,
            out_w,
            taps,
        }
    }

    /// Align-corners bilinear resize.
    pub fn resize(in_h: usize, in_w: usize, out_h: usize, out_w: usize) -> Self {
        let ratio = |src: usize, dst: usize| match dst > 1 {
            true => (src - 1) as f32 / (dst - 1) as f32,
            false => 0.,
        };
        let (ry, rx) = (ratio(in_h, out_h), ratio(in_w, out_w));

        Self::from_fn(in_h, in_w, out_h, out_w, |y, x| (y * ry, x * rx))
    }

    /// Counterclockwise rotation by `degrees` about the plane's center, keeping its size.
    pub fn rotate(h: usize, w: usize, degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (cy, cx) = ((h as f32 - 1.) / 2., (w as f32 - 1.) / 2.);

        Self::from_fn(h, w, h, w, |y, x| {
            let (dy, dx) = (y - cy, x - cx);
            (cy - sin * dx + cos * dy, cx + cos * dx + sin * dy)
        })
    }

    pub fn input_size(&self) -> (usize, usize) {
        (self.in_h, self.in_w)
    }

    pub fn output_size(&self) -> (usize, usize) {
        (self.out_h, self.out_w)
    }

    pub fn forward(&self, src: &[f32], dst: &mut [f32]) {
        for (d, taps) in dst.iter_mut().zip(&self.taps) {
            *d = taps.iter().map(|&(i, w)| w * src[i]).sum();
        }
    }

    pub fn backward(&self, grad: &[f32], dst: &mut [f32]) {
        dst.fill(0.);
        for (&g, taps) in grad.iter().zip(&self.taps) {
            for &(i, w) in taps {
                dst[i] += w * g;
            }
        }
    }
}
