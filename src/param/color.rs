use ndarray::{Array4, ArrayViewMut4, Axis, Zip};

use crate::{Result, VisErr};

/// Square root of the color covariance of ImageNet, columns in RGB order.
const COLOR_CORRELATION_SVD_SQRT: [[f32; 3]; 3] = [
    [0.26, 0.09, 0.02],
    [0.27, 0.00, -0.05],
    [0.27, -0.09, 0.03],
];

pub type Mat3 = [[f32; 3]; 3];

/// The decorrelation matrix with its columns scaled by the largest column norm.
pub fn color_correlation_normalized() -> Mat3 {
    let m = COLOR_CORRELATION_SVD_SQRT;
    let max_norm = (0..3)
        .map(|j| (0..3).map(|i| m[i][j] * m[i][j]).sum::<f32>().sqrt())
        .fold(0., f32::max);

    m.map(|row| row.map(|v| v / max_norm))
}

pub fn transpose(m: &Mat3) -> Mat3 {
    let mut t = [[0.; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            t[j][i] = v;
        }
    }
    t
}

/// Inverts `m` through its adjugate.
pub fn invert(m: &Mat3) -> Result<Mat3> {
    let c = |i: usize, j: usize| {
        let (r0, r1) = ((i + 1) % 3, (i + 2) % 3);
        let (c0, c1) = ((j + 1) % 3, (j + 2) % 3);
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };

    let det: f32 = (0..3).map(|j| m[0][j] * c(0, j)).sum();
    if det.abs() < f32::EPSILON {
        return Err(VisErr::InvalidConfig(
            "the color matrix is singular".to_string(),
        ));
    }

    let mut inv = [[0.; 3]; 3];
    for (i, row) in inv.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = c(j, i) / det;
        }
    }
    Ok(inv)
}

/// Replaces every pixel's channel vector `x` of an NCHW batch with `m * x`.
pub fn mix_channels(mut x: ArrayViewMut4<f32>, m: &Mat3) -> Result<()> {
    let channels = x.len_of(Axis(1));
    if channels != 3 {
        return Err(VisErr::SizeMismatch {
            what: "color channels",
            got: channels,
            expected: 3,
        });
    }

    for mut sample in x.axis_iter_mut(Axis(0)) {
        let mut planes = sample.axis_iter_mut(Axis(0));
        let (Some(r), Some(g), Some(b)) = (planes.next(), planes.next(), planes.next()) else {
            continue;
        };

        Zip::from(r).and(g).and(b).for_each(|r, g, b| {
            let px = [*r, *g, *b];
            let y = m.map(|row| row[0] * px[0] + row[1] * px[1] + row[2] * px[2]);
            (*r, *g, *b) = (y[0], y[1], y[2]);
        });
    }

    Ok(())
}

/// Logistic function that never overflows, so any finite input lands in `[0, 1]`.
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

/// Inverse of `sigmoid`, with the input clamped away from 0 and 1.
pub fn logit(y: f32) -> f32 {
    let y = y.clamp(1e-4, 1. - 1e-4);
    (y / (1. - y)).ln()
}

/// Applies `sigmoid` to every element in place.
pub fn squash(x: &mut Array4<f32>) {
    x.par_mapv_inplace(sigmoid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn largest_column_has_unit_norm() {
        let m = color_correlation_normalized();
        let norms: Vec<f32> = (0..3)
            .map(|j| (0..3).map(|i| m[i][j] * m[i][j]).sum::<f32>().sqrt())
            .collect();

        assert!((norms[0] - 1.).abs() < 1e-6);
        assert!(norms[1] < 1. && norms[2] < 1.);
    }

    #[test]
    fn inverse_undoes_mixing() {
        let m = color_correlation_normalized();
        let inv = invert(&m).unwrap();

        let mut x = Array4::from_shape_fn((2, 3, 2, 2), |(b, c, y, x)| {
            (b * 7 + c * 3 + y * 2 + x) as f32 * 0.1 - 0.4
        });
        let original = x.clone();

        mix_channels(x.view_mut(), &m).unwrap();
        mix_channels(x.view_mut(), &inv).unwrap();

        for (a, b) in x.iter().zip(&original) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn transpose_is_the_adjoint() {
        let m = color_correlation_normalized();
        let x = Array4::from_shape_fn((1, 3, 2, 1), |(_, c, y, _)| c as f32 - y as f32 * 0.5);
        let g = Array4::from_shape_fn((1, 3, 2, 1), |(_, c, y, _)| 1. + c as f32 * y as f32);

        let mut mx = x.clone();
        mix_channels(mx.view_mut(), &m).unwrap();
        let mut mtg = g.clone();
        mix_channels(mtg.view_mut(), &transpose(&m)).unwrap();

        let lhs = (&mx * &g).sum();
        let rhs = (&x * &mtg).sum();
        assert!((lhs - rhs).abs() < 1e-5);
    }

    #[test]
    fn sigmoid_stays_bounded() {
        for x in [-1e6, -88.7, -1., 0., 1., 88.7, 1e6] {
            let y = sigmoid(x);
            assert!((0. ..=1.).contains(&y), "{x} -> {y}");
        }

        assert_eq!(sigmoid(0.), 0.5);
        assert!((sigmoid(logit(0.3)) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn mixing_requires_three_channels() {
        let mut x = Array4::<f32>::zeros((1, 4, 1, 1));
        assert!(mix_channels(x.view_mut(), &color_correlation_normalized()).is_err());
    }
}
