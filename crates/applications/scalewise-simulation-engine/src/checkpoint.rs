//! Agent checkpoint persistence
//!
//! Value and trace tables are written as JSON lists keyed by
//! (state key, action). Floats round-trip exactly, so greedy action
//! selection after reload matches the agent that was saved.

use std::path::Path;

use scalewise_core::{Result, ScalewiseError, ScaleAction};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::discretize::StateKey;

/// Bumped when the on-disk layout changes
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub state: StateKey,
    /// Indexed by [`ScaleAction::index`]
    pub values: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub state: StateKey,
    pub action: ScaleAction,
    pub trace: f64,
}

/// Serialized learning state of a SARSA agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub version: u32,
    pub epsilon: f64,
    pub episodes: usize,
    pub values: Vec<ValueEntry>,
    pub traces: Vec<TraceEntry>,
}

impl AgentCheckpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(
            path = %path.display(),
            states = self.values.len(),
            episodes = self.episodes,
            "agent checkpoint saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let checkpoint: AgentCheckpoint = serde_json::from_str(&raw)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(ScalewiseError::checkpoint(format!(
                "unsupported checkpoint version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        info!(
            path = %path.display(),
            states = checkpoint.values.len(),
            episodes = checkpoint.episodes,
            "agent checkpoint loaded"
        );
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("scalewise-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let checkpoint = AgentCheckpoint {
            version: CHECKPOINT_VERSION,
            epsilon: 0.1234567890123,
            episodes: 12,
            values: vec![ValueEntry {
                state: StateKey([1, 0, 0, 0, 3, 1, 1, 2, 3]),
                values: [-0.1 / 3.0, 0.7071067811865476, 1e-17],
            }],
            traces: vec![TraceEntry {
                state: StateKey([0; 9]),
                action: ScaleAction::Up,
                trace: 0.36,
            }],
        };
        let path = temp_path("roundtrip");
        checkpoint.save(&path).unwrap();
        let loaded = AgentCheckpoint::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let checkpoint = AgentCheckpoint {
            version: CHECKPOINT_VERSION + 1,
            epsilon: 0.0,
            episodes: 0,
            values: vec![],
            traces: vec![],
        };
        let path = temp_path("version");
        checkpoint.save(&path).unwrap();
        let err = AgentCheckpoint::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, ScalewiseError::Checkpoint(_)));
    }
}
