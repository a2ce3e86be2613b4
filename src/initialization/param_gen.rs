/// A `ParamGen` generates the initial values of a tensor of parameters, be it a network's
/// weights or an image's free parameters.
pub trait ParamGen {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// An option whether the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;

    /// Samples exactly `n` parameters, padding with zeros if the generator runs out.
    fn sample_exact(&mut self, n: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.sample(n - out.len()) {
                Some(sample) if !sample.is_empty() => out.extend(sample),
                _ => break,
            }
        }

        out.resize(n, 0.);
        out
    }
}
