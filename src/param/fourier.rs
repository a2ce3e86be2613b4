use std::{fmt, sync::Arc};

use rayon::prelude::*;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Divides every decoded image so freshly initialized spectra don't saturate the squash.
const SATURATION: f32 = 4.0;

/// Frequency of bin `k` of an `n` point transform, in cycles per sample.
fn fftfreq(k: usize, n: usize) -> f32 {
    let k = if k <= (n - 1) / 2 {
        k as f32
    } else {
        k as f32 - n as f32
    };

    k / n as f32
}

/// Decodes real images from half spectra whose coefficients are scaled towards low
/// frequencies.
///
/// Each `height x width` plane is described by `height * (width / 2 + 1)` complex
/// coefficients, stored as interleaved real and imaginary parts. The remaining columns of
/// the spectrum are implied by Hermitian symmetry, so the decoded image is always real.
///
/// The half spectrum has more real degrees of freedom than the plane has pixels: the
/// imaginary parts of self-conjugate bins and the asymmetric part of the `kx = 0` and
/// Nyquist columns decode to nothing. `decode` projects them away and `encode` returns
/// the canonical coefficients, those with that part zeroed. So `encode(decode(z)) == z`
/// holds for every canonical `z`, and `decode(encode(decode(z))) == decode(z)` for any `z`.
pub struct FourierBasis {
    height: usize,
    width: usize,
    bins: usize,
    scale: Vec<f32>,
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
}

impl FourierBasis {
    /// Creates a new `FourierBasis`.
    ///
    /// # Arguments
    /// * `height`, `width` - The size of each decoded plane, any positive size works.
    /// * `decay_power` - How strongly high frequencies are damped.
    ///
    /// # Returns
    /// A new `FourierBasis` instance.
    pub fn new(height: usize, width: usize, decay_power: f32) -> Self {
        let bins = width / 2 + 1;
        let floor = 1. / height.max(width) as f32;

        let scale = (0..height)
            .flat_map(|ky| {
                (0..bins).map(move |kx| {
                    let (fy, fx) = (fftfreq(ky, height), fftfreq(kx, width));
                    let f = (fy * fy + fx * fx).sqrt();
                    1. / f.max(floor).powf(decay_power)
                })
            })
            .collect();

        let mut planner = FftPlanner::new();
        Self {
            height,
            width,
            bins,
            scale,
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        }
    }

    /// The number of free parameters describing one plane.
    pub fn plane_len(&self) -> usize {
        self.height * self.bins * 2
    }

    fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// Decodes every plane of `params` into `out`.
    pub fn decode(&self, params: &[f32], out: &mut [f32]) {
        params
            .par_chunks(self.plane_len())
            .zip(out.par_chunks_mut(self.pixels()))
            .for_each(|(z, x)| self.decode_plane(z, x));
    }

    /// Pulls the gradient of every decoded plane back onto the parameters.
    pub fn backward(&self, grad: &[f32], out: &mut [f32]) {
        grad.par_chunks(self.pixels())
            .zip(out.par_chunks_mut(self.plane_len()))
            .for_each(|(g, z)| self.backward_plane(g, z));
    }

    /// Finds the parameters that decode into `image`.
    pub fn encode(&self, image: &[f32], out: &mut [f32]) {
        image
            .par_chunks(self.pixels())
            .zip(out.par_chunks_mut(self.plane_len()))
            .for_each(|(x, z)| self.encode_plane(x, z));
    }

    fn coefficient(&self, params: &[f32], ky: usize, kx: usize) -> Complex<f32> {
        let i = ky * self.bins + kx;
        Complex::new(params[2 * i], params[2 * i + 1]) * self.scale[i]
    }

    fn decode_plane(&self, params: &[f32], out: &mut [f32]) {
        let (h, w) = (self.height, self.width);
        let mut spectrum = Vec::with_capacity(h * w);

        for ky in 0..h {
            for kx in 0..w {
                let z = if kx < self.bins {
                    self.coefficient(params, ky, kx)
                } else {
                    self.coefficient(params, (h - ky) % h, w - kx).conj()
                };
                spectrum.push(z);
            }
        }

        self.transform(&mut spectrum, true);
        for (x, z) in out.iter_mut().zip(&spectrum) {
            *x = z.re / SATURATION;
        }
    }

    fn backward_plane(&self, grad: &[f32], out: &mut [f32]) {
        let (h, w) = (self.height, self.width);
        let mut spectrum: Vec<_> = grad
            .iter()
            .map(|&g| Complex::new(g / SATURATION, 0.))
            .collect();
        self.transform(&mut spectrum, false);

        for ky in 0..h {
            for kx in 0..self.bins {
                let mut g = spectrum[ky * w + kx];

                // Columns past the half spectrum are conjugated copies of this bin.
                let mirror = w - kx;
                if kx > 0 && mirror >= self.bins {
                    g += spectrum[((h - ky) % h) * w + mirror].conj();
                }

                let i = ky * self.bins + kx;
                out[2 * i] = g.re * self.scale[i];
                out[2 * i + 1] = g.im * self.scale[i];
            }
        }
    }

    fn encode_plane(&self, image: &[f32], out: &mut [f32]) {
        let w = self.width;
        let mut spectrum: Vec<_> = image
            .iter()
            .map(|&x| Complex::new(x * SATURATION, 0.))
            .collect();
        self.transform(&mut spectrum, false);

        for ky in 0..self.height {
            for kx in 0..self.bins {
                let i = ky * self.bins + kx;
                let z = spectrum[ky * w + kx] / self.scale[i];
                out[2 * i] = z.re;
                out[2 * i + 1] = z.im;
            }
        }
    }

    /// Orthonormal 2D transform of a row major `height x width` buffer.
    fn transform(&self, buf: &mut [Complex<f32>], inverse: bool) {
        let (h, w) = (self.height, self.width);
        let (rows, cols) = match inverse {
            true => (&self.row_inverse, &self.col_inverse),
            false => (&self.row_forward, &self.col_forward),
        };

        rows.process(buf);

        let mut transposed = vec![Complex::default(); h * w];
        for y in 0..h {
            for x in 0..w {
                transposed[x * h + y] = buf[y * w + x];
            }
        }

        cols.process(&mut transposed);

        let norm = 1. / ((h * w) as f32).sqrt();
        for y in 0..h {
            for x in 0..w {
                buf[y * w + x] = transposed[x * h + y] * norm;
            }
        }
    }
}

impl fmt::Debug for FourierBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FourierBasis")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("bins", &self.bins)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;
    use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn random(len: usize, seed: u64) -> Vec<f32> {
        Array1::random_using(len, StandardNormal, &mut StdRng::seed_from_u64(seed)).to_vec()
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn frequencies_follow_numpy_layout() {
        let f: Vec<_> = (0..5).map(|k| fftfreq(k, 5)).collect();
        assert_eq!(f, [0., 0.2, 0.4, -0.4, -0.2]);

        let f: Vec<_> = (0..4).map(|k| fftfreq(k, 4)).collect();
        assert_eq!(f, [0., 0.25, -0.5, -0.25]);
    }

    #[test]
    fn encode_then_decode_recovers_the_image() {
        for (h, w) in [(8, 8), (5, 7), (6, 3), (1, 4)] {
            let basis = FourierBasis::new(h, w, 1.);
            let image = random(2 * h * w, 1);

            let mut params = vec![0.; 2 * basis.plane_len()];
            basis.encode(&image, &mut params);
            let mut decoded = vec![0.; image.len()];
            basis.decode(&params, &mut decoded);

            for (a, b) in image.iter().zip(&decoded) {
                assert!((a - b).abs() < 1e-4, "{h}x{w}: {a} vs {b}");
            }
        }
    }

    fn assert_close(a: &[f32], b: &[f32], what: &str) {
        let tolerance = 1e-4 * a.iter().fold(1f32, |m, v| m.max(v.abs()));
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < tolerance, "{what}: {x} vs {y}");
        }
    }

    #[test]
    fn decode_then_encode_recovers_canonical_coefficients() {
        for (h, w) in [(4, 4), (5, 7), (6, 3), (1, 4)] {
            let basis = FourierBasis::new(h, w, 1.);

            let mut z = vec![0.; basis.plane_len()];
            basis.encode(&random(h * w, 4), &mut z);

            let mut x = vec![0.; h * w];
            basis.decode(&z, &mut x);
            let mut recovered = vec![0.; z.len()];
            basis.encode(&x, &mut recovered);

            assert_close(&z, &recovered, &format!("{h}x{w}"));
        }
    }

    #[test]
    fn encode_is_a_projection_for_arbitrary_coefficients() {
        for (h, w) in [(4, 4), (5, 7), (6, 3)] {
            let basis = FourierBasis::new(h, w, 1.);
            let z = random(basis.plane_len(), 5);

            let mut x = vec![0.; h * w];
            basis.decode(&z, &mut x);
            let mut canonical = vec![0.; z.len()];
            basis.encode(&x, &mut canonical);
            let mut again = vec![0.; h * w];
            basis.decode(&canonical, &mut again);

            assert_close(&x, &again, &format!("{h}x{w}"));

            let mut twice = vec![0.; z.len()];
            basis.encode(&again, &mut twice);
            assert_close(&canonical, &twice, &format!("{h}x{w}"));
        }
    }

    #[test]
    fn backward_is_the_adjoint_of_decode() {
        for (h, w) in [(4, 6), (5, 5), (7, 4)] {
            let basis = FourierBasis::new(h, w, 1.);
            let z = random(basis.plane_len(), 2);
            let g = random(h * w, 3);

            let mut x = vec![0.; h * w];
            basis.decode(&z, &mut x);
            let mut dz = vec![0.; z.len()];
            basis.backward(&g, &mut dz);

            let (lhs, rhs) = (dot(&x, &g), dot(&z, &dz));
            assert!(
                (lhs - rhs).abs() < 1e-3 * lhs.abs().max(1.),
                "{h}x{w}: {lhs} vs {rhs}"
            );
        }
    }

    #[test]
    fn low_frequencies_dominate() {
        let basis = FourierBasis::new(16, 16, 1.);
        assert_eq!(basis.scale[0], 16.);
        assert!(basis.scale[1] > basis.scale[8]);
    }
}
