//! Stochastic storm / interstorm sequence.
//!
//! Storm durations, storm depths and interstorm gaps are drawn from exponential
//! distributions. The generator alternates storm and interstorm intervals, starting with a
//! storm, and truncates the last interval so the durations sum exactly to the total time.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

use crate::config::StormParams;
use crate::error::{LemError, Result};

/// One interval of the rainfall sequence. Interstorm intervals have zero intensity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StormInterval {
    pub duration: f64,
    pub intensity: f64,
}

impl StormInterval {
    #[inline]
    pub fn is_raining(&self) -> bool {
        self.intensity > 0.0
    }
}

fn exponential(key: &str, mean: f64) -> Result<Exp<f64>> {
    Exp::new(1.0 / mean).map_err(|e| LemError::invalid(key, mean, e.to_string()))
}

/// Seeded storm generator; iterate it to get the sequence.
#[derive(Clone, Debug)]
pub struct StormGenerator {
    params: StormParams,
    total_time: f64,
    seed: u64,
    rng: StdRng,
    storm_duration: Exp<f64>,
    storm_depth: Exp<f64>,
    interstorm_duration: Exp<f64>,
    elapsed: f64,
    next_is_storm: bool,
}

impl StormGenerator {
    pub fn new(params: StormParams, total_time: f64, seed: u64) -> Result<Self> {
        params.validate()?;
        if !(total_time.is_finite() && total_time > 0.0) {
            return Err(LemError::invalid("total_time", total_time, "must be finite and > 0"));
        }
        Ok(Self {
            storm_duration: exponential("mean_storm_duration", params.mean_storm_duration)?,
            storm_depth: exponential("mean_storm_depth", params.mean_storm_depth)?,
            interstorm_duration: exponential(
                "mean_interstorm_duration",
                params.mean_interstorm_duration,
            )?,
            params,
            total_time,
            seed,
            rng: StdRng::seed_from_u64(seed),
            elapsed: 0.0,
            next_is_storm: true,
        })
    }

    /// A fresh generator that replays this one's sequence from the start.
    pub fn restart(&self) -> Result<Self> {
        Self::new(self.params.clone(), self.total_time, self.seed)
    }

    /// Model time covered by the intervals drawn so far.
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn params(&self) -> &StormParams {
        &self.params
    }

    /// Next interval, or `ExhaustedInput` once `total_time` has been covered.
    pub fn next_interval(&mut self) -> Result<StormInterval> {
        let remaining = self.total_time - self.elapsed;
        if remaining <= 0.0 {
            return Err(LemError::ExhaustedInput {
                elapsed: self.elapsed,
                requested: self.total_time,
            });
        }

        let interval = if self.next_is_storm {
            // Exp can return exactly 0; keep the intensity finite.
            let duration = self
                .storm_duration
                .sample(&mut self.rng)
                .max(self.params.mean_storm_duration * 1e-12);
            let depth = self.storm_depth.sample(&mut self.rng);
            StormInterval { duration, intensity: depth / duration }
        } else {
            StormInterval { duration: self.interstorm_duration.sample(&mut self.rng), intensity: 0.0 }
        };
        self.next_is_storm = !self.next_is_storm;

        let interval = if interval.duration >= remaining {
            self.elapsed = self.total_time;
            StormInterval { duration: remaining, ..interval }
        } else {
            self.elapsed += interval.duration;
            interval
        };
        Ok(interval)
    }
}

impl Iterator for StormGenerator {
    type Item = StormInterval;

    fn next(&mut self) -> Option<StormInterval> {
        self.next_interval().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_durations_sum_to_total() {
        let storms = StormGenerator::new(StormParams::default(), 25.0, 7).unwrap();
        let intervals: Vec<StormInterval> = storms.collect();
        let total: f64 = intervals.iter().map(|s| s.duration).sum();
        assert_relative_eq!(total, 25.0, epsilon = 1e-9);
        assert!(intervals.iter().all(|s| s.duration > 0.0 && s.intensity >= 0.0));
    }

    #[test]
    fn test_alternates_storm_and_interstorm() {
        let storms = StormGenerator::new(StormParams::default(), 50.0, 3).unwrap();
        for (k, s) in storms.enumerate() {
            assert_eq!(s.is_raining(), k % 2 == 0, "interval {k}");
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = StormGenerator::new(StormParams::default(), 10.0, 11).unwrap();
        let replay = a.restart().unwrap();
        let first: Vec<StormInterval> = a.collect();
        let second: Vec<StormInterval> = replay.collect();
        assert_eq!(first, second);
        let other: Vec<StormInterval> =
            StormGenerator::new(StormParams::default(), 10.0, 12).unwrap().collect();
        assert_ne!(first, other);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut storms = StormGenerator::new(StormParams::default(), 1.0, 0).unwrap();
        while storms.next_interval().is_ok() {}
        assert_eq!(storms.elapsed_time(), 1.0);
        assert!(matches!(
            storms.next_interval(),
            Err(LemError::ExhaustedInput { .. })
        ));
    }

    #[test]
    fn test_mean_duration_roughly_matches() {
        let params = StormParams::default();
        let storms = StormGenerator::new(params.clone(), 4000.0, 99).unwrap();
        let durations: Vec<f64> = storms.filter(|s| s.is_raining()).map(|s| s.duration).collect();
        let mean = durations.iter().sum::<f64>() / durations.len() as f64;
        assert!((mean - params.mean_storm_duration).abs() < 0.2 * params.mean_storm_duration);
    }

    #[test]
    fn test_rejects_bad_params() {
        let params = StormParams { mean_storm_depth: 0.0, ..Default::default() };
        assert!(StormGenerator::new(params, 10.0, 0).is_err());
        assert!(StormGenerator::new(StormParams::default(), 0.0, 0).is_err());
    }
}
