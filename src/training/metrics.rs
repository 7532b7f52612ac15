use std::collections::VecDeque;

use crate::ai::Observation;
use crate::checkpoint::CheckpointMetrics;

/// Per-run statistics collected while driving the step exchange.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    steps: u64,
    total_reward: f64,
    throughput_sum: f64,
    final_sim_time: f64,
    recent_rewards: VecDeque<f32>,
    window: usize,
    pub timed_out: bool,
}

impl RunMetrics {
    pub fn with_window(window: usize) -> Self {
        RunMetrics {
            steps: 0,
            total_reward: 0.0,
            throughput_sum: 0.0,
            final_sim_time: 0.0,
            recent_rewards: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            timed_out: false,
        }
    }

    pub fn new() -> Self {
        Self::with_window(100)
    }

    pub fn record(&mut self, observation: &Observation) {
        self.steps += 1;
        self.total_reward += observation.reward as f64;
        self.throughput_sum += observation.current_thr;
        self.final_sim_time = observation.sim_time;
        self.recent_rewards.push_back(observation.reward);
        if self.recent_rewards.len() > self.window {
            self.recent_rewards.pop_front();
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn final_sim_time(&self) -> f64 {
        self.final_sim_time
    }

    pub fn mean_reward(&self) -> f64 {
        if self.steps == 0 {
            return 0.0;
        }
        self.total_reward / self.steps as f64
    }

    pub fn mean_throughput(&self) -> f64 {
        if self.steps == 0 {
            return 0.0;
        }
        self.throughput_sum / self.steps as f64
    }

    /// Mean reward over the most recent window of steps.
    pub fn rolling_reward(&self) -> f32 {
        if self.recent_rewards.is_empty() {
            return 0.0;
        }
        self.recent_rewards.iter().sum::<f32>() / self.recent_rewards.len() as f32
    }

    pub fn to_checkpoint_metrics(&self) -> CheckpointMetrics {
        CheckpointMetrics {
            steps: self.steps,
            total_reward: self.total_reward,
            mean_reward: self.mean_reward(),
            final_sim_time: self.final_sim_time,
            mean_throughput: self.mean_throughput(),
            timed_out: self.timed_out,
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(reward: f32, sim_time: f64, thr: f64) -> Observation {
        Observation {
            history: Vec::new(),
            reward,
            sim_time,
            current_thr: thr,
            n_wifi: 5,
        }
    }

    #[test]
    fn test_empty_metrics() {
        let m = RunMetrics::new();
        assert_eq!(m.steps(), 0);
        assert_eq!(m.mean_reward(), 0.0);
        assert_eq!(m.mean_throughput(), 0.0);
        assert_eq!(m.rolling_reward(), 0.0);
    }

    #[test]
    fn test_means_and_final_time() {
        let mut m = RunMetrics::new();
        m.record(&obs(1.0, 0.01, 10.0));
        m.record(&obs(0.0, 0.02, 30.0));
        assert_eq!(m.steps(), 2);
        assert!((m.mean_reward() - 0.5).abs() < 1e-9);
        assert!((m.mean_throughput() - 20.0).abs() < 1e-9);
        assert_eq!(m.final_sim_time(), 0.02);
    }

    #[test]
    fn test_rolling_window() {
        let mut m = RunMetrics::with_window(2);
        m.record(&obs(0.0, 0.0, 0.0));
        m.record(&obs(1.0, 0.0, 0.0));
        m.record(&obs(1.0, 0.0, 0.0));
        assert!((m.rolling_reward() - 1.0).abs() < 1e-6);
        assert!((m.mean_reward() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_checkpoint_snapshot() {
        let mut m = RunMetrics::new();
        m.record(&obs(0.5, 60.0, 40.0));
        m.timed_out = true;
        let snap = m.to_checkpoint_metrics();
        assert_eq!(snap.steps, 1);
        assert_eq!(snap.final_sim_time, 60.0);
        assert!(snap.timed_out);
    }
}
