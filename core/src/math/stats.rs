pub struct StatsHelper;

impl StatsHelper {
    pub fn nonzero(samples: &[f32]) -> usize {
        samples.iter().filter(|&&v| v != 0.0).count()
    }

    pub fn max(samples: &[f32]) -> f32 {
        samples.iter().copied().fold(0.0, f32::max)
    }

    /// Smallest non-zero magnitude, or zero when every sample is zero.
    pub fn min_nonzero(samples: &[f32]) -> f32 {
        samples
            .iter()
            .map(|v| v.abs())
            .filter(|&v| v > 0.0)
            .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.min(v))))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_yields_zero() {
        assert_eq!(StatsHelper::nonzero(&[]), 0);
        assert_eq!(StatsHelper::max(&[]), 0.0);
        assert_eq!(StatsHelper::min_nonzero(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn counts_and_extremes() {
        let samples = [0.0, 3.0, 0.0, 0.5, 70.0];
        assert_eq!(StatsHelper::nonzero(&samples), 3);
        assert_eq!(StatsHelper::max(&samples), 70.0);
        assert_eq!(StatsHelper::min_nonzero(&samples), 0.5);
    }
}
