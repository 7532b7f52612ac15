use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::ai::{resolve_agent, AgentDescriptor, DdpgConfig, DqnConfig};
use crate::channel::{ChannelConfig, Simulator, SimulatorChannel, SimulatorParams};
use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointMetrics, CheckpointStore, FORMAT_VERSION,
};
use crate::config::AppConfig;
use crate::error::{CampaignError, CampaignFailure, CheckpointError, ConfigError};
use crate::training::plan::{plan_runs, CampaignSpec, RunDescriptor};

/// Campaign loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Steps between in-run progress log lines (0 disables them).
    pub log_interval: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig { log_interval: 1000 }
    }
}

/// Where the campaign loop begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRun {
    /// Run 1.
    First,
    /// A given run; its predecessor's checkpoint must exist.
    At(u32),
    /// The run after the highest contiguous persisted checkpoint.
    Resume,
}

/// Session manager state. One pass through `ConfigResolved..=CheckpointPersisted`
/// per run, ending in one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    ConfigResolved,
    SeedAssigned,
    CheckpointResolved,
    SessionRunning,
    CheckpointPersisted,
    CampaignComplete,
    CampaignFailed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A run that reached `CheckpointPersisted`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_index: u32,
    pub seed: u64,
    pub checkpoint: PathBuf,
    pub metrics: CheckpointMetrics,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignReport {
    pub runs: Vec<RunOutcome>,
}

impl CampaignReport {
    /// The campaign's final artifact, if any run completed in this invocation.
    pub fn final_checkpoint(&self) -> Option<&Path> {
        self.runs.last().map(|r| r.checkpoint.as_path())
    }
}

/// Drives a campaign: one strictly sequential simulator session per run,
/// each chained to its predecessor's checkpoint.
pub struct CampaignManager<'a> {
    spec: CampaignSpec,
    dqn: DqnConfig,
    ddpg: DdpgConfig,
    store: CheckpointStore,
    channel: ChannelConfig,
    training: TrainingConfig,
    simulator: &'a dyn Simulator,
    cancel: Arc<AtomicBool>,
    start: StartRun,
    phase: RunPhase,
    history: Vec<(Option<u32>, RunPhase)>,
}

impl<'a> CampaignManager<'a> {
    pub fn new(spec: CampaignSpec, config: &AppConfig, simulator: &'a dyn Simulator) -> Self {
        CampaignManager {
            spec,
            dqn: config.dqn.clone(),
            ddpg: config.ddpg.clone(),
            store: CheckpointStore::new(config.checkpoint.clone()),
            channel: config.channel.clone(),
            training: config.training.clone(),
            simulator,
            cancel: Arc::new(AtomicBool::new(false)),
            start: StartRun::First,
            phase: RunPhase::Idle,
            history: Vec::new(),
        }
    }

    /// Share a cancellation flag (typically set from a signal handler).
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_start(mut self, start: StartRun) -> Self {
        self.start = start;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Every phase entered so far, tagged with its run index.
    pub fn history(&self) -> &[(Option<u32>, RunPhase)] {
        &self.history
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    fn enter(&mut self, run: Option<u32>, phase: RunPhase) {
        debug!(run, %phase, "phase");
        self.phase = phase;
        self.history.push((run, phase));
    }

    fn fail(&mut self, run: Option<u32>, failure: impl Into<CampaignFailure>) -> CampaignError {
        let err = CampaignError {
            run_index: run,
            failure: failure.into(),
        };
        self.enter(run, RunPhase::CampaignFailed);
        error!(run, kind = err.failure.kind(), "campaign halted: {err}");
        err
    }

    /// Run the campaign to completion or to the first failure.
    pub fn run(&mut self) -> Result<CampaignReport, CampaignError> {
        // Nothing on disk or in shared memory is touched before this point.
        let descriptor = resolve_agent(&self.spec.agent, &self.dqn, &self.ddpg)
            .map_err(|e| self.fail(None, e))?;
        self.spec.validate().map_err(|e| self.fail(None, e))?;

        let start = self.start_run()?;
        info!(
            agent = %self.spec.agent,
            algorithm = descriptor.algorithm_tag(),
            scenario = %self.spec.scenario,
            n_wifi = self.spec.n_wifi,
            base_seed = self.spec.base_seed,
            runs = self.spec.runs,
            start,
            key = %self.channel.mempool_key,
            "starting campaign"
        );

        let mut report = CampaignReport::default();
        for run in plan_runs(&self.spec, &self.store, start) {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(self.fail(Some(run.run_index), CampaignFailure::Cancelled));
            }
            let outcome = self
                .run_one(&descriptor, &run)
                .map_err(|failure| self.fail(Some(run.run_index), failure))?;
            report.runs.push(outcome);
            self.phase = RunPhase::Idle;
        }

        self.enter(None, RunPhase::CampaignComplete);
        info!(
            completed = report.runs.len(),
            last = ?report.final_checkpoint(),
            "campaign complete"
        );
        Ok(report)
    }

    fn start_run(&mut self) -> Result<u32, CampaignError> {
        match self.start {
            StartRun::First => Ok(1),
            StartRun::At(k) if k >= 1 && k <= self.spec.runs => Ok(k),
            StartRun::At(k) => Err(self.fail(
                None,
                ConfigError::Validation(format!(
                    "start run {k} outside campaign of {} runs",
                    self.spec.runs
                )),
            )),
            StartRun::Resume => {
                let last = self
                    .store
                    .last_contiguous_run(&self.spec.agent, &self.spec.scenario, self.spec.n_wifi)
                    .map_err(|e| self.fail(None, e))?;
                let next = last.map_or(1, |k| k + 1);
                info!(last_persisted = last, next, "resuming campaign");
                Ok(next)
            }
        }
    }

    fn run_one(
        &mut self,
        descriptor: &AgentDescriptor,
        run: &RunDescriptor,
    ) -> Result<RunOutcome, CampaignFailure> {
        let i = Some(run.run_index);
        self.enter(i, RunPhase::ConfigResolved);

        self.enter(i, RunPhase::SeedAssigned);
        info!(run = run.run_index, seed = run.seed, "starting run");

        let prior = match &run.load_checkpoint {
            Some(path) => Some(self.load_predecessor(path, run)?),
            None => None,
        };
        self.enter(i, RunPhase::CheckpointResolved);

        let mut agent = descriptor.build_agent(run.seed);
        if let Some(checkpoint) = &prior {
            agent.load_state(&checkpoint.state).map_err(|e| CheckpointError::Corrupt {
                path: run.load_checkpoint.clone().unwrap_or_default(),
                reason: e.to_string(),
            })?;
            debug!(
                run = run.run_index,
                steps = agent.step_count(),
                exploration = agent.exploration(),
                "agent state restored"
            );
        }

        self.enter(i, RunPhase::SessionRunning);
        let params = SimulatorParams {
            run_index: run.run_index,
            seed: run.seed,
            n_wifi: self.spec.n_wifi,
            scenario: self.spec.scenario.clone(),
            agent_type: descriptor.action_space(),
        };
        let mut channel =
            SimulatorChannel::open(self.channel.mempool_key, &self.channel, self.simulator, params)?;
        let result = channel.run_episode_loop(
            agent.as_mut(),
            &self.cancel,
            self.training.log_interval,
        );
        channel.close();
        let metrics = result?.to_checkpoint_metrics();

        let state = agent.save_state().map_err(|e| CheckpointError::Write {
            path: run.save_checkpoint.clone(),
            source: std::io::Error::other(e),
        })?;
        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata {
                format_version: FORMAT_VERSION,
                agent: self.spec.agent.clone(),
                algorithm: descriptor.algorithm_tag().to_string(),
                scenario: self.spec.scenario.clone(),
                n_wifi: self.spec.n_wifi,
                run_index: run.run_index,
                seed: run.seed,
                timestamp: unix_timestamp(),
                evaluation: false,
                metrics: metrics.clone(),
            },
            state,
        };
        self.store.save(&run.save_checkpoint, &checkpoint)?;
        self.enter(i, RunPhase::CheckpointPersisted);
        info!(
            run = run.run_index,
            steps = metrics.steps,
            mean_reward = metrics.mean_reward,
            timed_out = metrics.timed_out,
            path = %run.save_checkpoint.display(),
            "run complete"
        );

        Ok(RunOutcome {
            run_index: run.run_index,
            seed: run.seed,
            checkpoint: run.save_checkpoint.clone(),
            metrics,
        })
    }

    /// Load the previous run's checkpoint and make sure it belongs to this
    /// campaign's chain.
    fn load_predecessor(
        &self,
        path: &Path,
        run: &RunDescriptor,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.store.load(path)?;
        let meta = &checkpoint.metadata;
        let expected_run = run.run_index - 1;
        let mismatch = if meta.agent != self.spec.agent {
            Some(format!("agent {} (expected {})", meta.agent, self.spec.agent))
        } else if meta.scenario != self.spec.scenario {
            Some(format!("scenario {} (expected {})", meta.scenario, self.spec.scenario))
        } else if meta.n_wifi != self.spec.n_wifi {
            Some(format!("nWifi {} (expected {})", meta.n_wifi, self.spec.n_wifi))
        } else if meta.run_index != expected_run {
            Some(format!("run {} (expected {expected_run})", meta.run_index))
        } else {
            None
        };
        if let Some(reason) = mismatch {
            return Err(CheckpointError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("checkpoint is from a different chain: {reason}"),
            });
        }
        debug!(
            run = run.run_index,
            path = %path.display(),
            prior_seed = meta.seed,
            prior_steps = meta.metrics.steps,
            "predecessor checkpoint verified"
        );
        Ok(checkpoint)
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
