//! Durable sampler checkpoints.
//!
//! A checkpoint is the JSON form of a [`SamplerState`] tagged with a format
//! version. Writes go to a sibling temporary file that is renamed over the
//! target, so a reader never observes a half-written checkpoint.

use super::state::SamplerState;
use crate::error::FitError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format version written into every checkpoint
pub const CHECKPOINT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub state: SamplerState,
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write `state` to `path`
pub fn save_checkpoint(path: &Path, state: &SamplerState) -> Result<(), FitError> {
    let checkpoint = Checkpoint {
        version: CHECKPOINT_VERSION,
        state: state.clone(),
    };
    let json = serde_json::to_string(&checkpoint)?;
    let tmp = temporary_path(path);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!(
        "Checkpoint written to {} at iteration {}",
        path.display(),
        state.iteration
    );
    Ok(())
}

/// Read a checkpoint back.
///
/// Every failure, unreadable file included, is reported as
/// [`FitError::CheckpointCorruption`] so that callers can restart cleanly.
pub fn load_checkpoint(path: &Path) -> Result<SamplerState, FitError> {
    let corrupt = |reason: String| FitError::CheckpointCorruption {
        path: path.to_path_buf(),
        reason,
    };
    let json = std::fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?;
    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(corrupt(format!(
            "format version {} is not {}",
            checkpoint.version, CHECKPOINT_VERSION
        )));
    }
    checkpoint.state.validate().map_err(corrupt)?;
    Ok(checkpoint.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::evidence::EvidenceAccumulator;
    use crate::sampler::state::{LivePoint, SamplerStatus};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    fn state() -> SamplerState {
        let mut evidence = EvidenceAccumulator::starting_at(-0.5);
        evidence.add(-4.2, 2);
        SamplerState {
            ndim: 2,
            n_live: 2,
            seed: 5,
            status: SamplerStatus::Sampling,
            live: vec![
                LivePoint {
                    u: vec![0.1, 0.7],
                    v: vec![1.0, 7.0],
                    log_l: -3.0,
                    birth: 2,
                },
                LivePoint {
                    u: vec![0.3, 0.2],
                    v: vec![3.0, 2.0],
                    log_l: -1.0 / 3.0,
                    birth: 1,
                },
            ],
            dead: Vec::new(),
            evidence,
            queue: VecDeque::new(),
            iteration: 1,
            calls: 17,
            next_serial: 8,
            next_birth: 3,
            walk_scale: 0.731,
            empty_refills: 0,
            log_l_low: None,
            log_l_high: None,
            elapsed_s: 0.25,
            log_vol_init: -0.5,
            fingerprint: Some("0f3a".to_string()),
        }
    }

    #[test]
    fn test_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.json");
        let original = state();
        save_checkpoint(&path, &original).unwrap();
        assert!(!temporary_path(&path).exists());
        assert_eq!(load_checkpoint(&path).unwrap(), original);
    }

    #[test]
    fn test_garbage_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.json");
        std::fs::write(&path, "{\"version\": 1, \"state\": [").unwrap();
        assert!(matches!(
            load_checkpoint(&path),
            Err(FitError::CheckpointCorruption { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let result = load_checkpoint(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(FitError::CheckpointCorruption { .. })));
    }

    #[test]
    fn test_older_format_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.json");
        save_checkpoint(&path, &state()).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        let old = json.replacen(
            &format!("\"version\":{CHECKPOINT_VERSION}"),
            "\"version\":1",
            1,
        );
        std::fs::write(&path, old).unwrap();
        assert!(matches!(
            load_checkpoint(&path),
            Err(FitError::CheckpointCorruption { .. })
        ));
    }

    #[test]
    fn test_inconsistent_state_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.json");
        let mut broken = state();
        broken.live.pop();
        save_checkpoint(&path, &broken).unwrap();
        assert!(load_checkpoint(&path).is_err());
    }
}
