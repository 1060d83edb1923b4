//! Synthetic arrival schedules
//!
//! [`PhasedWorkload`] models arrivals as a Poisson process whose rate follows
//! an ordered list of phases, each optionally modulated by a sinusoid.
//! Processing times come from a pluggable sampler (gamma by default).
//! [`ScriptedWorkload`] replays fixed batches for deterministic scenarios.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma, Poisson};
use scalewise_core::{
    Arrival, PhaseConfig, Result, ScalewiseError, WorkloadConfig, WorkloadSource,
};
use tracing::warn;

/// Processing times below this are rounded up
const MIN_PROCESSING_TIME: f64 = 1e-3;

/// Source of per-task processing times
pub trait ProcessingTimeSampler {
    fn sample(&mut self, rng: &mut StdRng) -> f64;
}

/// Gamma(shape, scale) processing times
pub struct GammaSampler {
    dist: Gamma<f64>,
}

impl GammaSampler {
    pub fn new(shape: f64, scale: f64) -> Result<Self> {
        let dist = Gamma::new(shape, scale).map_err(|e| {
            ScalewiseError::config(format!("invalid gamma({shape}, {scale}): {e}"))
        })?;
        Ok(Self { dist })
    }
}

impl ProcessingTimeSampler for GammaSampler {
    fn sample(&mut self, rng: &mut StdRng) -> f64 {
        self.dist.sample(rng)
    }
}

/// Constant processing time
pub struct FixedSampler(pub f64);

impl ProcessingTimeSampler for FixedSampler {
    fn sample(&mut self, _rng: &mut StdRng) -> f64 {
        self.0
    }
}

/// Poisson arrivals following a phase schedule
pub struct PhasedWorkload {
    base_rate: f64,
    phases: Vec<PhaseConfig>,
    deadline_coefficient: f64,
    sampler: Box<dyn ProcessingTimeSampler>,
    seed: u64,
    rng: StdRng,
}

impl PhasedWorkload {
    pub fn new(
        base_rate: f64,
        phases: Vec<PhaseConfig>,
        deadline_coefficient: f64,
        sampler: Box<dyn ProcessingTimeSampler>,
        seed: u64,
    ) -> Self {
        PhasedWorkload {
            base_rate,
            phases,
            deadline_coefficient,
            sampler,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build the schedule from config with a gamma processing-time model
    pub fn from_config(config: &WorkloadConfig, deadline_coefficient: f64) -> Result<Self> {
        let pt = config.processing_time;
        let sampler = GammaSampler::new(pt.shape, pt.scale)?;
        Ok(Self::new(
            config.base_rate,
            config.phases.clone(),
            deadline_coefficient,
            Box::new(sampler),
            config.seed,
        ))
    }

    /// Sum of all phase durations
    pub fn total_duration(&self) -> f64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }

    /// Instantaneous arrival rate (tasks/s) at simulated time `now`
    pub fn rate_at(&self, now: f64) -> f64 {
        let mut phase_start = 0.0;
        for phase in &self.phases {
            let phase_end = phase_start + phase.duration_secs;
            if now < phase_end {
                let modulation = match phase.oscillation {
                    Some(osc) => {
                        1.0 + osc.amplitude * (2.0 * PI * (now - phase_start) / osc.period_secs).sin()
                    }
                    None => 1.0,
                };
                return (self.base_rate * phase.rate_multiplier * modulation).max(0.0);
            }
            phase_start = phase_end;
        }
        0.0
    }
}

impl WorkloadSource for PhasedWorkload {
    fn next_arrivals(&mut self, now: f64, step_duration: f64) -> Vec<Arrival> {
        let mean = self.rate_at(now) * step_duration;
        if mean <= 0.0 {
            return Vec::new();
        }
        let count = match Poisson::new(mean) {
            Ok(poisson) => {
                let drawn: f64 = poisson.sample(&mut self.rng);
                drawn as usize
            }
            Err(e) => {
                warn!(mean, error = %e, "invalid arrival mean, skipping interval");
                return Vec::new();
            }
        };

        (0..count)
            .map(|_| {
                let processing_time = self.sampler.sample(&mut self.rng).max(MIN_PROCESSING_TIME);
                Arrival {
                    processing_time,
                    deadline: now + self.deadline_coefficient * processing_time,
                }
            })
            .collect()
    }

    fn is_exhausted(&self, now: f64) -> bool {
        now >= self.total_duration()
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Replays one batch of processing times per step, then stops
pub struct ScriptedWorkload {
    batches: Vec<Vec<f64>>,
    deadline_coefficient: f64,
    cursor: usize,
}

impl ScriptedWorkload {
    pub fn new(batches: Vec<Vec<f64>>, deadline_coefficient: f64) -> Self {
        ScriptedWorkload {
            batches,
            deadline_coefficient,
            cursor: 0,
        }
    }
}

impl WorkloadSource for ScriptedWorkload {
    fn next_arrivals(&mut self, now: f64, _step_duration: f64) -> Vec<Arrival> {
        let Some(batch) = self.batches.get(self.cursor) else {
            return Vec::new();
        };
        self.cursor += 1;
        batch
            .iter()
            .map(|&processing_time| Arrival {
                processing_time,
                deadline: now + self.deadline_coefficient * processing_time,
            })
            .collect()
    }

    fn is_exhausted(&self, _now: f64) -> bool {
        self.cursor >= self.batches.len()
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalewise_core::OscillationConfig;

    fn phases() -> Vec<PhaseConfig> {
        vec![
            PhaseConfig {
                rate_multiplier: 1.0,
                duration_secs: 10.0,
                oscillation: None,
            },
            PhaseConfig {
                rate_multiplier: 4.0,
                duration_secs: 10.0,
                oscillation: Some(OscillationConfig {
                    amplitude: 0.5,
                    period_secs: 4.0,
                }),
            },
        ]
    }

    #[test]
    fn test_rate_follows_phases() {
        let workload = PhasedWorkload::new(2.0, phases(), 2.0, Box::new(FixedSampler(1.0)), 7);
        assert_eq!(workload.rate_at(0.0), 2.0);
        assert_eq!(workload.rate_at(10.0), 8.0);
        // quarter period into the oscillating phase
        assert!((workload.rate_at(11.0) - 12.0).abs() < 1e-9);
        assert_eq!(workload.rate_at(20.0), 0.0);
        assert!(workload.is_exhausted(20.0));
        assert!(!workload.is_exhausted(19.0));
    }

    #[test]
    fn test_seeded_schedule_is_reproducible() {
        let mut workload = PhasedWorkload::new(
            3.0,
            phases(),
            2.0,
            Box::new(GammaSampler::new(2.0, 1.0).unwrap()),
            42,
        );
        let first: Vec<Vec<Arrival>> = (0..20)
            .map(|t| workload.next_arrivals(t as f64, 1.0))
            .collect();
        workload.reset();
        let second: Vec<Vec<Arrival>> = (0..20)
            .map(|t| workload.next_arrivals(t as f64, 1.0))
            .collect();
        assert_eq!(first, second);
        assert!(first.iter().map(Vec::len).sum::<usize>() > 0);
    }

    #[test]
    fn test_arrival_deadlines_use_coefficient() {
        let mut workload = PhasedWorkload::new(5.0, phases(), 3.0, Box::new(FixedSampler(2.0)), 1);
        for arrival in workload.next_arrivals(4.0, 1.0) {
            assert_eq!(arrival.processing_time, 2.0);
            assert_eq!(arrival.deadline, 10.0);
        }
    }

    #[test]
    fn test_invalid_gamma_rejected() {
        assert!(GammaSampler::new(-1.0, 1.0).is_err());
    }

    #[test]
    fn test_scripted_batches() {
        let mut workload = ScriptedWorkload::new(vec![vec![2.0], vec![], vec![1.0, 1.0]], 2.0);
        assert_eq!(workload.next_arrivals(0.0, 1.0).len(), 1);
        assert!(workload.next_arrivals(1.0, 1.0).is_empty());
        assert!(!workload.is_exhausted(2.0));
        assert_eq!(workload.next_arrivals(2.0, 1.0).len(), 2);
        assert!(workload.is_exhausted(3.0));
        workload.reset();
        assert!(!workload.is_exhausted(0.0));
    }
}
