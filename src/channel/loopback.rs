use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::ai::{Action, Observation, NO_ACTIONS};
use crate::channel::endpoint::SimulatorEndpoint;
use crate::channel::simulator::{
    LaunchRequest, Simulator, SimulatorConfig, SimulatorExit, SimulatorProcess,
};
use crate::error::ChannelError;

/// How an injected fault manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Exit abnormally without finishing the run.
    Crash,
    /// Stop publishing observations until terminated.
    Stall,
}

/// Make the loopback simulator misbehave at a given run and step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInjection {
    pub run_index: u32,
    pub at_step: u64,
    pub kind: FaultKind,
}

/// In-process stand-in for the network simulator.
///
/// Speaks the segment protocol from a background thread and models an 802.11
/// contention domain analytically: the agent's action picks the contention
/// window, which determines the per-station transmission probability and
/// from that the collision probability and normalized throughput.
#[derive(Debug, Clone)]
pub struct LoopbackSimulator {
    steps: u64,
    env_step_time: f64,
    history_length: usize,
    initial_action: f32,
    non_zero_start: bool,
    poll_interval: Duration,
    exchange_timeout: Duration,
    faults: Vec<FaultInjection>,
}

impl LoopbackSimulator {
    pub fn new(config: &SimulatorConfig) -> Self {
        LoopbackSimulator {
            steps: config.steps_per_run(),
            env_step_time: config.env_step_time,
            history_length: config.history_length as usize,
            initial_action: cw_to_action(config.cw),
            non_zero_start: config.non_zero_start,
            poll_interval: Duration::from_micros(50),
            exchange_timeout: Duration::from_secs(30),
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, fault: FaultInjection) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps.max(1);
        self
    }
}

/// Map a fixed contention window to the equivalent action level.
fn cw_to_action(cw: u32) -> f32 {
    if cw == 0 {
        return 0.0;
    }
    ((cw as f32 + 1.0).log2() - 4.0).clamp(0.0, NO_ACTIONS as f32)
}

/// Normalized throughput and collision probability for `n` saturated stations
/// with contention window `2^(a+4) - 1`.
fn contention(action: f32, n: u32) -> (f64, f64) {
    let cw = 2f64.powf(action as f64 + 4.0) - 1.0;
    let tau = 2.0 / (cw + 1.0);
    let others = n.saturating_sub(1) as i32;
    let idle = (1.0 - tau).powi(others);
    let p_col = 1.0 - idle;
    let throughput = n as f64 * tau * idle;
    (throughput, p_col)
}

fn action_level(action: Action) -> f32 {
    match action {
        Action::Discrete(a) => a.min(NO_ACTIONS - 1) as f32,
        Action::Continuous(a) => a.clamp(0.0, NO_ACTIONS as f32),
    }
}

impl Simulator for LoopbackSimulator {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn SimulatorProcess>, ChannelError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut endpoint =
            SimulatorEndpoint::attach(&request.segment_path, self.poll_interval, stop.clone())
                .map_err(|e| ChannelError::Launch(format!("loopback attach: {e}")))?;

        let sim = self.clone();
        let run_index = request.params.run_index;
        let seed = request.params.seed;
        let n_wifi = request.params.n_wifi;
        let fault = self.faults.iter().copied().find(|f| f.run_index == run_index);
        let thread_stop = stop.clone();
        let segment = request.segment_path.clone();

        let handle = thread::Builder::new()
            .name(format!("loopback-run-{run_index}"))
            .spawn(move || {
                match sim.simulate(&mut endpoint, seed, n_wifi, fault, &thread_stop) {
                    Ok(()) => SimulatorExit::Success,
                    Err(reason) => {
                        debug!(run = run_index, segment = %segment.display(), "loopback exit: {reason}");
                        SimulatorExit::Failure(reason)
                    }
                }
            })
            .map_err(|e| ChannelError::Launch(e.to_string()))?;

        Ok(Box::new(LoopbackProcess {
            handle: Some(handle),
            stop,
            exit: None,
        }))
    }
}

impl LoopbackSimulator {
    fn simulate(
        &self,
        endpoint: &mut SimulatorEndpoint,
        seed: u64,
        n_wifi: u32,
        fault: Option<FaultInjection>,
        stop: &AtomicBool,
    ) -> Result<(), String> {
        let mut rng = StdRng::seed_from_u64(seed);
        let jitter = Normal::new(0.0, 0.01).map_err(|e| e.to_string())?;

        let mut history: VecDeque<f32> = VecDeque::with_capacity(self.history_length);
        let (_, p0) = contention(self.initial_action, n_wifi);
        if self.non_zero_start {
            history.extend(std::iter::repeat(p0 as f32).take(self.history_length));
        }
        let mut reward = 0.0f32;
        let mut current_thr = 0.0f64;

        for step in 0..self.steps {
            if let Some(f) = fault.filter(|f| f.at_step == step) {
                match f.kind {
                    FaultKind::Crash => return Err(format!("injected crash at step {step}")),
                    FaultKind::Stall => {
                        while !stop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(5));
                        }
                        return Err(format!("terminated while stalled at step {step}"));
                    }
                }
            }

            let obs = Observation {
                history: history.iter().copied().collect(),
                reward,
                sim_time: step as f64 * self.env_step_time,
                current_thr,
                n_wifi,
            };
            let action = match endpoint.exchange(&obs, self.exchange_timeout) {
                Ok(action) => action,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Err(format!("terminated at step {step}"));
                }
                Err(e) => return Err(format!("exchange failed at step {step}: {e}")),
            };

            let (throughput, p_col) = contention(action_level(action), n_wifi);
            let observed = (p_col + jitter.sample(&mut rng)).clamp(0.0, 1.0);
            if history.len() == self.history_length {
                history.pop_front();
            }
            history.push_back(observed as f32);
            reward = throughput as f32;
            current_thr = throughput * 100.0;
        }

        endpoint.finish().map_err(|e| e.to_string())
    }
}

/// Handle to the loopback simulator thread.
pub struct LoopbackProcess {
    handle: Option<JoinHandle<SimulatorExit>>,
    stop: Arc<AtomicBool>,
    exit: Option<SimulatorExit>,
}

impl LoopbackProcess {
    fn reap(&mut self) -> SimulatorExit {
        if let Some(handle) = self.handle.take() {
            let exit = handle
                .join()
                .unwrap_or_else(|_| SimulatorExit::Failure("simulator thread panicked".into()));
            self.exit = Some(exit);
        }
        self.exit
            .clone()
            .unwrap_or_else(|| SimulatorExit::Failure("simulator already reaped".into()))
    }
}

impl SimulatorProcess for LoopbackProcess {
    fn try_wait(&mut self) -> io::Result<Option<SimulatorExit>> {
        match &self.handle {
            Some(handle) if !handle.is_finished() => Ok(None),
            _ => Ok(Some(self.reap())),
        }
    }

    fn terminate(&mut self, _grace: Duration) -> io::Result<SimulatorExit> {
        self.stop.store(true, Ordering::Relaxed);
        Ok(self.reap())
    }
}

impl Drop for LoopbackProcess {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_station_never_collides() {
        let (thr, p_col) = contention(0.0, 1);
        assert_eq!(p_col, 0.0);
        assert!(thr > 0.0);
    }

    #[test]
    fn test_larger_window_reduces_collisions() {
        let (_, p_small) = contention(0.0, 15);
        let (_, p_large) = contention(5.0, 15);
        assert!(p_large < p_small);
    }

    #[test]
    fn test_dense_network_prefers_larger_window() {
        let (thr_small, _) = contention(0.0, 50);
        let (thr_large, _) = contention(3.0, 50);
        assert!(thr_large > thr_small);
    }

    #[test]
    fn test_cw_to_action() {
        assert_eq!(cw_to_action(0), 0.0);
        assert_eq!(cw_to_action(15), 0.0);
        assert_eq!(cw_to_action(63), 2.0);
        assert_eq!(cw_to_action(100_000), NO_ACTIONS as f32);
    }

    #[test]
    fn test_action_level_clamps() {
        assert_eq!(action_level(Action::Discrete(99)), (NO_ACTIONS - 1) as f32);
        assert_eq!(action_level(Action::Continuous(-1.0)), 0.0);
        assert_eq!(action_level(Action::Continuous(2.5)), 2.5);
    }
}
