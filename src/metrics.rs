// src/metrics.rs
//
// Online summary statistics for reward, loss and divergence streams.
// Welford's update keeps one pass and no stored samples, so episode
// workers can fold thousands of step rewards without allocation.

#[derive(Debug, Clone, Copy)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for OnlineStats {
    fn default() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl OnlineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sample if finite. Non-finite samples are ignored.
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }

        self.n += 1;
        self.min = self.min.min(x);
        self.max = self.max.max(x);

        let delta = x - self.mean;
        self.mean += delta / (self.n as f64);
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn min(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Population variance (divide by n).
    pub fn variance_population(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.m2 / (self.n as f64)
        }
    }

    /// Sample variance (divide by n-1).
    pub fn variance_sample(&self) -> f64 {
        if self.n <= 1 {
            0.0
        } else {
            self.m2 / ((self.n as f64) - 1.0)
        }
    }

    pub fn stddev_population(&self) -> f64 {
        self.variance_population().sqrt()
    }

    pub fn stddev_sample(&self) -> f64 {
        self.variance_sample().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_mean_min_max() {
        let mut s = OnlineStats::new();
        for x in [2.0, -1.0, 4.0, 3.0] {
            s.add(x);
        }
        assert_eq!(s.n(), 4);
        assert!((s.mean() - 2.0).abs() < 1e-12);
        assert_eq!(s.min(), -1.0);
        assert_eq!(s.max(), 4.0);
    }

    #[test]
    fn variance_matches_direct_formula() {
        let xs = [0.5, 1.5, 2.5, 3.5, 4.5];
        let mut s = OnlineStats::new();
        for x in xs {
            s.add(x);
        }
        let mean: f64 = xs.iter().sum::<f64>() / xs.len() as f64;
        let var: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!((s.variance_population() - var).abs() < 1e-12);
    }

    #[test]
    fn non_finite_samples_are_skipped() {
        let mut s = OnlineStats::new();
        s.add(1.0);
        s.add(f64::NAN);
        s.add(f64::INFINITY);
        s.add(3.0);
        assert_eq!(s.n(), 2);
        assert!((s.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_stats_report_zeros() {
        let s = OnlineStats::new();
        assert_eq!(s.n(), 0);
        assert_eq!(s.mean(), 0.0);
        assert_eq!(s.min(), 0.0);
        assert_eq!(s.max(), 0.0);
        assert_eq!(s.variance_sample(), 0.0);
    }
}
