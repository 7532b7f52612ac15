use std::path::PathBuf;

use crate::checkpoint::CheckpointStore;
use crate::error::ConfigError;
use crate::training::seed::SeedSequencer;

/// What to train: fixed for the life of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignSpec {
    pub agent: String,
    pub scenario: String,
    pub n_wifi: u32,
    pub base_seed: u64,
    pub runs: u32,
}

impl CampaignSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runs == 0 {
            return Err(ConfigError::Validation("campaign length must be >= 1".into()));
        }
        if self.n_wifi == 0 {
            return Err(ConfigError::Validation("nWifi must be >= 1".into()));
        }
        if self.scenario.is_empty()
            || self
                .scenario
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(ConfigError::Validation(format!(
                "scenario '{}' cannot be used in a checkpoint file name",
                self.scenario
            )));
        }
        if !SeedSequencer::new(self.base_seed).covers(self.runs) {
            return Err(ConfigError::Validation(format!(
                "base seed {} overflows over {} runs",
                self.base_seed, self.runs
            )));
        }
        Ok(())
    }

    pub fn seeds(&self) -> SeedSequencer {
        SeedSequencer::new(self.base_seed)
    }
}

/// One step of the checkpoint chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDescriptor {
    pub run_index: u32,
    pub seed: u64,
    /// Checkpoint written by the previous run; absent for run 1.
    pub load_checkpoint: Option<PathBuf>,
    pub save_checkpoint: PathBuf,
}

/// Lay out runs `start_run..=spec.runs`. Each run loads what its predecessor
/// saves, including the predecessor of `start_run` when resuming.
pub fn plan_runs(spec: &CampaignSpec, store: &CheckpointStore, start_run: u32) -> Vec<RunDescriptor> {
    let seeds = spec.seeds();
    let path = |i: u32| store.path_for(&spec.agent, &spec.scenario, spec.n_wifi, i);

    (start_run.max(1)..=spec.runs)
        .map(|i| RunDescriptor {
            run_index: i,
            seed: seeds.seed_for(i),
            load_checkpoint: (i > 1).then(|| path(i - 1)),
            save_checkpoint: path(i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStoreConfig;

    fn spec(runs: u32) -> CampaignSpec {
        CampaignSpec {
            agent: "DDPG".to_string(),
            scenario: "basic".to_string(),
            n_wifi: 5,
            base_seed: 200,
            runs,
        }
    }

    fn store() -> CheckpointStore {
        CheckpointStore::new(CheckpointStoreConfig {
            checkpoint_dir: PathBuf::from("ckpt"),
        })
    }

    #[test]
    fn test_three_run_chain() {
        let runs = plan_runs(&spec(3), &store(), 1);
        assert_eq!(runs.len(), 3);

        assert_eq!(runs[0].seed, 200);
        assert_eq!(runs[0].load_checkpoint, None);
        assert_eq!(
            runs[0].save_checkpoint,
            PathBuf::from("ckpt/DDPG_basic_5_run_1.ckpt.lz4")
        );

        for pair in runs.windows(2) {
            assert_eq!(pair[1].load_checkpoint.as_ref(), Some(&pair[0].save_checkpoint));
            assert_eq!(pair[1].seed, pair[0].seed + 1);
        }
        assert_eq!(runs[2].seed, 202);
    }

    #[test]
    fn test_resume_plan_loads_predecessor() {
        let runs = plan_runs(&spec(5), &store(), 4);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_index, 4);
        assert_eq!(runs[0].seed, 203);
        assert_eq!(
            runs[0].load_checkpoint,
            Some(PathBuf::from("ckpt/DDPG_basic_5_run_3.ckpt.lz4"))
        );
    }

    #[test]
    fn test_save_paths_unique() {
        let runs = plan_runs(&spec(20), &store(), 1);
        let mut paths: Vec<_> = runs.iter().map(|r| r.save_checkpoint.clone()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 20);
    }

    #[test]
    fn test_validation() {
        assert!(spec(1).validate().is_ok());
        assert!(spec(0).validate().is_err());

        let mut s = spec(3);
        s.n_wifi = 0;
        assert!(s.validate().is_err());

        let mut s = spec(3);
        s.scenario = "../etc".to_string();
        assert!(s.validate().is_err());

        let mut s = spec(3);
        s.base_seed = u64::MAX - 1;
        assert!(s.validate().is_err());
    }
}
