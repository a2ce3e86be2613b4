use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::ParamGen;
use crate::{Result, VisErr};

/// A parameter generator that follows a certain probabilistic distribution.
///
/// It borrows the session's random number generator so every random draw of a render comes
/// from a single seeded stream.
pub struct RandParamGen<'a, R: Rng, D: Distribution<f32>> {
    rng: &'a mut R,
    distribution: D,
    remaining: usize,
}

impl<'a, R: Rng, D: Distribution<f32>> RandParamGen<'a, R, D> {
    /// Creates a new `RandParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `distribution` - The distribution to sample the random numbers from.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn new(rng: &'a mut R, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<'a, R: Rng> RandParamGen<'a, R, Normal<f32>> {
    /// Creates a new `RandParamGen` parameter generator with a normal distribution.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `mean` - The mean of the distribution.
    /// * `std_dev` - The standard deviation of the distribution.
    ///
    /// # Returns
    /// An error if `std_dev` is negative or not finite.
    pub fn normal(rng: &'a mut R, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        let distribution =
            Normal::new(mean, std_dev).map_err(|e| VisErr::InvalidConfig(e.to_string()))?;
        Ok(Self::new(rng, distribution, limit))
    }

    /// Creates a new `RandParamGen` parameter generator using Kaiming normal initialization.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `fan_in` - The number of input units in the weight tensor.
    pub fn kaiming(rng: &'a mut R, limit: usize, fan_in: usize) -> Result<Self> {
        let std_dev = (2. / fan_in.max(1) as f32).sqrt();
        Self::normal(rng, limit, 0., std_dev)
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<'_, R, D> {
    fn sample(&mut self, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;

        let sample = (0..n)
            .map(|_| self.distribution.sample(&mut *self.rng))
            .collect();
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn partial() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut param_gen = RandParamGen::normal(&mut rng, 10, 0., 1.).unwrap();

        assert_eq!(param_gen.sample(7).unwrap().len(), 7);
        assert_eq!(param_gen.sample(7).unwrap().len(), 3);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn seeded_samples_repeat() {
        let draw = || {
            let mut rng = StdRng::seed_from_u64(7);
            RandParamGen::kaiming(&mut rng, 16, 8)
                .unwrap()
                .sample_exact(16)
        };

        assert_eq!(draw(), draw());
    }

    #[test]
    fn kaiming_scales_with_fan_in() {
        let mut rng = StdRng::seed_from_u64(3);
        let sample = RandParamGen::kaiming(&mut rng, 4000, 8)
            .unwrap()
            .sample_exact(4000);

        let var = sample.iter().map(|v| v * v).sum::<f32>() / sample.len() as f32;
        assert!((var - 0.25).abs() < 0.03, "{var}");
    }

    #[test]
    fn explicit_distributions_are_sampled() {
        let mut rng = StdRng::seed_from_u64(3);
        let uniform = rand_distr::Uniform::new(-1f32, 1.).unwrap();
        let sample = RandParamGen::new(&mut rng, uniform, 50).sample_exact(50);

        assert!(sample.iter().all(|v| (-1. ..1.).contains(v)));
    }

    #[test]
    fn invalid_distributions_are_config_errors() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(RandParamGen::normal(&mut rng, 1, 0., f32::NAN).is_err());
        assert!(RandParamGen::normal(&mut rng, 1, 0., -1.).is_err());
    }
}
