use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ai::SessionAgent;
use crate::channel::layout::{
    read_observation, read_u32, read_u64, write_action, write_u64, FLAGS_OFFSET, FLAG_FINISHED,
    SEQ_OFFSET,
};
use crate::channel::segment::SharedSegment;
use crate::channel::simulator::{
    LaunchRequest, Simulator, SimulatorExit, SimulatorParams, SimulatorProcess,
};
use crate::channel::MempoolKey;
use crate::error::{ChannelError, ConfigError};
use crate::training::metrics::RunMetrics;

/// Shared-segment and run-supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub segment_dir: PathBuf,
    pub mempool_key: MempoolKey,
    pub segment_size: u64,
    /// Hard wall-clock limit for one run.
    pub run_timeout_secs: u64,
    pub poll_interval_us: u64,
    /// Time the simulator gets to exit after SIGTERM or after finishing.
    pub shutdown_grace_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            segment_dir: PathBuf::from("/dev/shm"),
            mempool_key: MempoolKey(1234),
            segment_size: 16_384,
            run_timeout_secs: 3600,
            poll_interval_us: 50,
            shutdown_grace_ms: 5000,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "channel.run_timeout_secs must be > 0".into(),
            ));
        }
        if self.poll_interval_us == 0 {
            return Err(ConfigError::Validation(
                "channel.poll_interval_us must be > 0".into(),
            ));
        }
        if self.segment_size < crate::channel::layout::LAYOUT_SIZE {
            return Err(ConfigError::Validation(format!(
                "channel.segment_size must be >= {}",
                crate::channel::layout::LAYOUT_SIZE
            )));
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

enum LoopEnd {
    Finished,
    Exited(SimulatorExit),
    TimedOut,
    Cancelled,
    Reset { seen: u64, expected: u64 },
}

/// One run's binding to the simulator: the exclusively held segment plus the
/// simulator process attached to it.
///
/// Dropping the channel closes it, so the key is released on every exit path.
pub struct SimulatorChannel {
    segment: SharedSegment,
    process: Option<Box<dyn SimulatorProcess>>,
    params: SimulatorParams,
    run_timeout: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl SimulatorChannel {
    /// Bind `key` and launch the simulator against it.
    pub fn open(
        key: MempoolKey,
        config: &ChannelConfig,
        simulator: &dyn Simulator,
        params: SimulatorParams,
    ) -> Result<Self, ChannelError> {
        let segment = SharedSegment::acquire(&config.segment_dir, key, config.segment_size)?;
        let request = LaunchRequest {
            mempool_key: key,
            segment_path: segment.path().to_path_buf(),
            params: params.clone(),
        };
        // On failure the segment drops here and the key is released.
        let process = simulator.launch(&request)?;
        debug!(%key, run = params.run_index, "channel open");

        Ok(SimulatorChannel {
            segment,
            process: Some(process),
            params,
            run_timeout: config.run_timeout(),
            poll_interval: config.poll_interval(),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    pub fn key(&self) -> MempoolKey {
        self.segment.key()
    }

    pub fn is_open(&self) -> bool {
        self.segment.is_bound()
    }

    /// Answer observations with `agent` until the simulator finishes the run.
    ///
    /// A hard timeout terminates the simulator and still returns the metrics,
    /// flagged `timed_out`. Setting `cancel` mid-run fails with `Interrupted`.
    pub fn run_episode_loop(
        &mut self,
        agent: &mut dyn SessionAgent,
        cancel: &AtomicBool,
        log_interval: u64,
    ) -> Result<RunMetrics, ChannelError> {
        let mut metrics = RunMetrics::new();
        let end = self.exchange_steps(agent, cancel, log_interval, &mut metrics)?;
        let run = self.params.run_index;

        match end {
            LoopEnd::Finished => {
                let exit = self.await_exit()?;
                if let SimulatorExit::Failure(reason) = exit {
                    return Err(ChannelError::SimulatorCrash(format!(
                        "simulator failed after finishing: {reason}"
                    )));
                }
            }
            LoopEnd::Exited(SimulatorExit::Success) => {
                self.stop_process();
                debug!(run, "simulator exited without setting the finished flag");
            }
            LoopEnd::Exited(SimulatorExit::Failure(reason)) => {
                self.stop_process();
                return Err(ChannelError::SimulatorCrash(reason));
            }
            LoopEnd::Reset { seen, expected } => {
                self.stop_process();
                return Err(ChannelError::SimulatorCrash(format!(
                    "channel reset: sequence counter went from {expected} to {seen}"
                )));
            }
            LoopEnd::Cancelled => {
                self.stop_process();
                return Err(ChannelError::Interrupted);
            }
            LoopEnd::TimedOut => {
                warn!(
                    run,
                    timeout_secs = self.run_timeout.as_secs(),
                    steps = metrics.steps(),
                    "run hit the hard timeout, terminating simulator"
                );
                self.stop_process();
                metrics.timed_out = true;
            }
        }

        info!(
            run,
            steps = metrics.steps(),
            mean_reward = metrics.mean_reward(),
            sim_time = metrics.final_sim_time(),
            "episode loop finished"
        );
        Ok(metrics)
    }

    fn exchange_steps(
        &mut self,
        agent: &mut dyn SessionAgent,
        cancel: &AtomicBool,
        log_interval: u64,
        metrics: &mut RunMetrics,
    ) -> Result<LoopEnd, ChannelError> {
        let deadline = Instant::now() + self.run_timeout;
        let mut answered = 0u64;

        loop {
            let file = self.segment.file()?;
            let seq = read_u64(file, SEQ_OFFSET)?;

            if seq < answered {
                return Ok(LoopEnd::Reset {
                    seen: seq,
                    expected: answered,
                });
            }
            if seq % 2 == 1 && seq > answered {
                let observation = read_observation(file)?;
                let action = agent.act(&observation);
                write_action(file, action)?;
                answered = seq + 1;
                write_u64(file, SEQ_OFFSET, answered)?;

                metrics.record(&observation);
                if log_interval > 0 && metrics.steps() % log_interval == 0 {
                    debug!(
                        run = self.params.run_index,
                        step = metrics.steps(),
                        reward = metrics.rolling_reward(),
                        sim_time = observation.sim_time,
                        exploration = agent.exploration(),
                        "progress"
                    );
                }
                continue;
            }

            if read_u32(file, FLAGS_OFFSET)? & FLAG_FINISHED != 0 {
                return Ok(LoopEnd::Finished);
            }
            // A terminal interrupt may take the simulator down too, so
            // cancellation wins over an observed exit.
            if cancel.load(Ordering::SeqCst) {
                return Ok(LoopEnd::Cancelled);
            }
            if let Some(process) = self.process.as_mut() {
                if let Some(exit) = process.try_wait()? {
                    return Ok(LoopEnd::Exited(exit));
                }
            }
            if Instant::now() >= deadline {
                return Ok(LoopEnd::TimedOut);
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Wait for a finished simulator to exit on its own, terminating it if it
    /// lingers past the grace period.
    fn await_exit(&mut self) -> Result<SimulatorExit, ChannelError> {
        let Some(mut process) = self.process.take() else {
            return Ok(SimulatorExit::Success);
        };
        let deadline = Instant::now() + self.shutdown_grace;
        while Instant::now() < deadline {
            if let Some(exit) = process.try_wait()? {
                return Ok(exit);
            }
            thread::sleep(Duration::from_millis(5));
        }
        warn!(
            run = self.params.run_index,
            "simulator finished but did not exit, terminating"
        );
        process.terminate(self.shutdown_grace)?;
        Ok(SimulatorExit::Success)
    }

    fn stop_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            match process.terminate(self.shutdown_grace) {
                Ok(exit) => debug!(run = self.params.run_index, ?exit, "simulator stopped"),
                Err(e) => warn!(run = self.params.run_index, "failed to stop simulator: {e}"),
            }
        }
    }

    /// Stop the simulator if it is still running and release the key.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        self.stop_process();
        if self.segment.is_bound() {
            self.segment.release();
            debug!(key = %self.segment.key(), "channel closed");
        }
    }
}

impl Drop for SimulatorChannel {
    fn drop(&mut self) {
        self.close();
    }
}
