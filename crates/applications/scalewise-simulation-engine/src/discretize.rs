//! Observation discretization for tabular learning

use scalewise_core::{BucketSpec, Observation, Result, ScalewiseError, OBSERVATION_DIMS};
use serde::{Deserialize, Serialize};

/// Bucket index per observation dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey(pub [u16; OBSERVATION_DIMS]);

/// Maps a continuous observation onto a finite [`StateKey`]
#[derive(Debug, Clone)]
pub struct Discretizer {
    edges: Vec<Vec<f64>>,
}

impl Discretizer {
    pub fn from_specs(specs: &[BucketSpec]) -> Result<Self> {
        if specs.len() != OBSERVATION_DIMS {
            return Err(ScalewiseError::config(format!(
                "expected {} bucket specs, got {}",
                OBSERVATION_DIMS,
                specs.len()
            )));
        }
        Ok(Self {
            edges: specs.iter().map(BucketSpec::edges).collect(),
        })
    }

    /// Bucket for `value` in dimension `dim`. Values outside the configured
    /// range land in the first or last bucket; NaN lands in the first.
    pub fn bucket(&self, dim: usize, value: f64) -> u16 {
        if value.is_nan() {
            return 0;
        }
        let index = self.edges[dim].partition_point(|edge| *edge <= value);
        u16::try_from(index).unwrap_or(u16::MAX)
    }

    pub fn key(&self, observation: &Observation) -> StateKey {
        let values = observation.to_array();
        let mut key = [0u16; OBSERVATION_DIMS];
        for (dim, value) in values.iter().enumerate() {
            key[dim] = self.bucket(dim, *value);
        }
        StateKey(key)
    }

    /// Number of distinct keys this discretizer can produce
    pub fn state_space_size(&self) -> usize {
        self.edges
            .iter()
            .map(|e| e.len() + 1)
            .fold(1usize, |acc, n| acc.saturating_mul(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discretizer() -> Discretizer {
        let mut specs = vec![BucketSpec::Edges { edges: vec![] }; OBSERVATION_DIMS];
        specs[1] = BucketSpec::Edges {
            edges: vec![1.0, 5.0, 20.0],
        };
        specs[8] = BucketSpec::Uniform {
            min: 0.0,
            max: 1.0,
            count: 4,
        };
        Discretizer::from_specs(&specs).unwrap()
    }

    #[test]
    fn test_bucket_boundaries() {
        let d = discretizer();
        assert_eq!(d.bucket(1, 0.0), 0);
        assert_eq!(d.bucket(1, 1.0), 1);
        assert_eq!(d.bucket(1, 4.99), 1);
        assert_eq!(d.bucket(1, 5.0), 2);
        assert_eq!(d.bucket(1, 19.0), 2);
        assert_eq!(d.bucket(1, 20.0), 3);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let d = discretizer();
        assert_eq!(d.bucket(1, -100.0), 0);
        assert_eq!(d.bucket(1, 1e12), 3);
        assert_eq!(d.bucket(8, 1.5), 3);
        assert_eq!(d.bucket(8, f64::NAN), 0);
        assert_eq!(d.bucket(8, f64::INFINITY), 3);
    }

    #[test]
    fn test_key_from_observation() {
        let d = discretizer();
        let obs = Observation {
            worker_q_len: 7.0,
            qos_rate: 0.6,
            ..Default::default()
        };
        let key = d.key(&obs);
        assert_eq!(key.0[1], 2);
        assert_eq!(key.0[8], 2);
        assert_eq!(key.0[0], 0);
        assert_eq!(d.state_space_size(), 16);
    }

    #[test]
    fn test_wrong_dimension_count_rejected() {
        assert!(Discretizer::from_specs(&[BucketSpec::Edges { edges: vec![] }]).is_err());
    }

    #[test]
    fn test_oversized_dimension_saturates() {
        let mut specs = vec![BucketSpec::Edges { edges: vec![] }; OBSERVATION_DIMS];
        specs[0] = BucketSpec::Edges {
            edges: (0..70_000).map(f64::from).collect(),
        };
        let d = Discretizer::from_specs(&specs).unwrap();
        assert_eq!(d.bucket(0, 100.5), 101);
        assert_eq!(d.bucket(0, 1e9), u16::MAX);
    }
}
