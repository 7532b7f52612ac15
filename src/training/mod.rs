//! Campaign orchestration: seed sequencing, the checkpoint-chained run plan,
//! the session manager state machine, per-run metrics, and evaluation export.

pub mod freeze;
pub mod manager;
pub mod metrics;
pub mod plan;
pub mod replay_buffer;
pub mod seed;

pub use freeze::freeze_checkpoint;
pub use manager::{CampaignManager, CampaignReport, RunOutcome, RunPhase, StartRun, TrainingConfig};
pub use metrics::RunMetrics;
pub use plan::{plan_runs, CampaignSpec, RunDescriptor};
pub use seed::{run_seed, SeedSequencer};
