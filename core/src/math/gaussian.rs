/// Normalised, truncated 1-D Gaussian applied with mirror (reflect)
/// boundaries: `d c b a | a b c d | d c b a`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    weights: Vec<f64>,
    radius: usize,
}

/// Kernel half-width in standard deviations.
pub const DEFAULT_TRUNCATE: f64 = 4.0;

impl GaussianKernel {
    /// `None` when `sigma` is not positive, meaning "leave the axis alone".
    ///
    /// The radius never exceeds `max_radius`; callers pass the lane length,
    /// past which further taps only revisit mirrored samples. The weights
    /// are normalised over whatever window remains.
    pub fn new(sigma: f64, truncate: f64, max_radius: usize) -> Option<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return None;
        }
        let radius = ((truncate * sigma + 0.5) as usize).min(max_radius);
        let denom = 2.0 * sigma * sigma;
        let mut weights: Vec<f64> = (0..=2 * radius)
            .map(|i| {
                let x = i as f64 - radius as f64;
                (-(x * x) / denom).exp()
            })
            .collect();
        let total: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= total);
        Some(Self { weights, radius })
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Convolves `input` into `output`; both must have the same length.
    pub fn convolve_reflect(&self, input: &[f32], output: &mut [f32]) {
        let n = input.len();
        if n == 0 {
            return;
        }
        let radius = self.radius as isize;
        for (i, out) in output.iter_mut().enumerate().take(n) {
            let mut acc = 0.0f64;
            for (k, &w) in self.weights.iter().enumerate() {
                let j = reflect(i as isize + k as isize - radius, n);
                acc += w * input[j] as f64;
            }
            *out = acc as f32;
        }
    }
}

fn reflect(index: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut m = index.rem_euclid(period);
    if m >= n {
        m = period - 1 - m;
    }
    m as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_sigma_yields_no_kernel() {
        assert!(GaussianKernel::new(0.0, DEFAULT_TRUNCATE, 64).is_none());
        assert!(GaussianKernel::new(-1.0, DEFAULT_TRUNCATE, 64).is_none());
    }

    #[test]
    fn weights_are_normalised_and_symmetric() {
        let kernel = GaussianKernel::new(2.0, DEFAULT_TRUNCATE, 64).unwrap();
        assert_eq!(kernel.radius(), 8);
        let weights = kernel.weights();
        let total: f64 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        for i in 0..weights.len() {
            assert!((weights[i] - weights[weights.len() - 1 - i]).abs() < 1e-15);
        }
    }

    #[test]
    fn reflect_mirrors_about_the_edge_sample() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(9, 4), 1);
        assert_eq!(reflect(-7, 1), 0);
    }

    #[test]
    fn constant_signal_is_preserved() {
        let kernel = GaussianKernel::new(3.0, DEFAULT_TRUNCATE, 64).unwrap();
        let input = vec![2.5f32; 5];
        let mut output = vec![0.0f32; 5];
        kernel.convolve_reflect(&input, &mut output);
        for v in output {
            assert!((v - 2.5).abs() < 1e-5);
        }
    }

    #[test]
    fn radius_is_capped_for_huge_sigma() {
        let kernel = GaussianKernel::new(2.0e6, DEFAULT_TRUNCATE, 5).unwrap();
        assert_eq!(kernel.radius(), 5);
        assert_eq!(kernel.weights().len(), 11);
        let total: f64 = kernel.weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-12);

        let input = vec![4.0f32; 5];
        let mut output = vec![0.0f32; 5];
        kernel.convolve_reflect(&input, &mut output);
        assert!(output.iter().all(|v| (v - 4.0).abs() < 1e-5));
    }

    #[test]
    fn impulse_spreads_symmetrically() {
        let kernel = GaussianKernel::new(1.0, DEFAULT_TRUNCATE, 64).unwrap();
        let mut input = vec![0.0f32; 21];
        input[10] = 1.0;
        let mut output = vec![0.0f32; 21];
        kernel.convolve_reflect(&input, &mut output);
        assert!(output[10] > output[9]);
        assert!((output[9] - output[11]).abs() < 1e-7);
        let mass: f32 = output.iter().sum();
        assert!((mass - 1.0).abs() < 1e-5);
    }
}
