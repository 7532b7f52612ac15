use std::path::Path;

use tracing::info;

use crate::ai::resolve_agent;
use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointStore};
use crate::config::AppConfig;
use crate::error::{CampaignFailure, CheckpointError};

/// Export an evaluation copy of a training checkpoint: exploration and
/// learning switched off, replay memory dropped, weights kept.
pub fn freeze_checkpoint(
    store: &CheckpointStore,
    config: &AppConfig,
    load: &Path,
    save: &Path,
) -> Result<CheckpointMetadata, CampaignFailure> {
    let source = store.load(load)?;
    let descriptor = resolve_agent(&source.metadata.agent, &config.dqn, &config.ddpg)?;

    let mut agent = descriptor.build_agent(source.metadata.seed);
    agent
        .load_state(&source.state)
        .map_err(|e| CheckpointError::Corrupt {
            path: load.to_path_buf(),
            reason: e.to_string(),
        })?;
    agent.enter_eval_mode();
    let state = agent.save_state().map_err(|e| CheckpointError::Write {
        path: save.to_path_buf(),
        source: std::io::Error::other(e),
    })?;

    let metadata = CheckpointMetadata {
        evaluation: true,
        ..source.metadata
    };
    store.save(
        save,
        &Checkpoint {
            metadata: metadata.clone(),
            state,
        },
    )?;
    info!(from = %load.display(), to = %save.display(), "evaluation checkpoint written");
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Observation, SessionAgent};
    use crate::checkpoint::{CheckpointMetrics, CheckpointStoreConfig, FORMAT_VERSION};

    fn trained_checkpoint(store: &CheckpointStore, path: &Path) {
        let config = AppConfig::default();
        let descriptor = resolve_agent("DQN", &config.dqn, &config.ddpg).unwrap();
        let mut agent = descriptor.build_agent(9);
        for i in 0..200 {
            agent.act(&Observation {
                history: vec![(i % 7) as f32 / 7.0; 16],
                reward: (i % 3) as f32,
                sim_time: i as f64 * 0.01,
                current_thr: 30.0,
                n_wifi: 5,
            });
        }
        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata {
                format_version: FORMAT_VERSION,
                agent: "DQN".to_string(),
                algorithm: "DQN".to_string(),
                scenario: "basic".to_string(),
                n_wifi: 5,
                run_index: 14,
                seed: 55,
                timestamp: 0,
                evaluation: false,
                metrics: CheckpointMetrics::default(),
            },
            state: agent.save_state().unwrap(),
        };
        store.save(path, &checkpoint).unwrap();
    }

    #[test]
    fn test_freeze_disables_exploration() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(CheckpointStoreConfig {
            checkpoint_dir: dir.path().to_path_buf(),
        });
        let load = dir.path().join("DQN_basic_5_run_14.ckpt.lz4");
        let save = dir.path().join("eval.ckpt.lz4");
        trained_checkpoint(&store, &load);

        let meta = freeze_checkpoint(&store, &AppConfig::default(), &load, &save).unwrap();
        assert!(meta.evaluation);
        assert_eq!(meta.run_index, 14);

        let frozen = store.load(&save).unwrap();
        let config = AppConfig::default();
        let mut agent = resolve_agent("DQN", &config.dqn, &config.ddpg)
            .unwrap()
            .build_agent(1);
        agent.load_state(&frozen.state).unwrap();
        assert_eq!(agent.exploration(), 0.0);
        assert_eq!(agent.step_count(), 200);

        // Source is untouched.
        assert!(!store.load(&load).unwrap().metadata.evaluation);
    }

    #[test]
    fn test_freeze_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(CheckpointStoreConfig {
            checkpoint_dir: dir.path().to_path_buf(),
        });
        let err = freeze_checkpoint(
            &store,
            &AppConfig::default(),
            &dir.path().join("missing.ckpt.lz4"),
            &dir.path().join("out.ckpt.lz4"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "CheckpointNotFoundError");
        assert!(!dir.path().join("out.ckpt.lz4").exists());
    }
}
