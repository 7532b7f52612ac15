//! Property-based checks of the seed law, the run plan, and checkpoint
//! persistence.

use proptest::prelude::*;
use rl_campaign::ai::AgentState;
use rl_campaign::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointMetrics, CheckpointStore, CheckpointStoreConfig,
    FORMAT_VERSION,
};
use rl_campaign::training::{plan_runs, run_seed, CampaignSpec, SeedSequencer};

fn metadata(run_index: u32, seed: u64) -> CheckpointMetadata {
    CheckpointMetadata {
        format_version: FORMAT_VERSION,
        agent: "DDPG".to_string(),
        algorithm: "DDPG".to_string(),
        scenario: "convergence".to_string(),
        n_wifi: 30,
        run_index,
        seed,
        timestamp: 1_700_000_000,
        evaluation: false,
        metrics: CheckpointMetrics::default(),
    }
}

// Scenario names usable in file names.
fn scenario_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").unwrap()
}

proptest! {
    /// seed(base, i) = base + i - 1, independent of anything else.
    #[test]
    fn prop_seed_is_offset_of_base(base in 0u64..u64::MAX / 2, i in 1u32..100_000) {
        let seed = run_seed(base, i);
        prop_assert_eq!(seed, base + u64::from(i) - 1);
        prop_assert_eq!(seed, SeedSequencer::new(base).seed_for(i));
        prop_assert_eq!(run_seed(base, i), seed);
    }

    /// Seeds are strictly increasing and never repeat within a campaign.
    #[test]
    fn prop_seeds_strictly_increase(base in 0u64..u64::MAX / 2, runs in 1u32..200) {
        let seq = SeedSequencer::new(base);
        for i in 1..runs {
            prop_assert!(seq.seed_for(i) < seq.seed_for(i + 1));
        }
    }

    /// Every planned run loads exactly what its predecessor saves.
    #[test]
    fn prop_plan_is_a_chain(
        scenario in scenario_strategy(),
        n_wifi in 1u32..100,
        runs in 1u32..40,
        base_seed in 0u64..1_000_000,
    ) {
        let spec = CampaignSpec {
            agent: "DQN".to_string(),
            scenario,
            n_wifi,
            base_seed,
            runs,
        };
        prop_assert!(spec.validate().is_ok());
        let store = CheckpointStore::new(CheckpointStoreConfig::default());
        let plan = plan_runs(&spec, &store, 1);

        prop_assert_eq!(plan.len(), runs as usize);
        prop_assert!(plan[0].load_checkpoint.is_none());
        for pair in plan.windows(2) {
            prop_assert_eq!(pair[1].run_index, pair[0].run_index + 1);
            prop_assert_eq!(pair[1].load_checkpoint.as_ref(), Some(&pair[0].save_checkpoint));
            prop_assert_ne!(&pair[1].save_checkpoint, &pair[0].save_checkpoint);
        }
    }

    /// load(save(path, S)) == S, byte for byte.
    #[test]
    fn prop_checkpoint_round_trip(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        run_index in 1u32..1000,
        seed in any::<u64>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(CheckpointStoreConfig {
            checkpoint_dir: dir.path().to_path_buf(),
        });
        let path = store.path_for("DDPG", "convergence", 30, run_index);
        let checkpoint = Checkpoint {
            metadata: metadata(run_index, seed),
            state: AgentState { data },
        };

        store.save(&path, &checkpoint).unwrap();
        let loaded = store.load(&path).unwrap();
        prop_assert_eq!(loaded.state, checkpoint.state);
        prop_assert_eq!(loaded.metadata, checkpoint.metadata);
    }
}
