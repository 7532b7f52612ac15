use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ai::agent::{ensure_algorithm, Action, AgentState, Observation, SessionAgent, Transition, NO_ACTIONS};
use crate::ai::state_encoding::{all_finite, dot, encode_history, feature_len, soft_update};
use crate::error::AgentStateError;
use crate::training::replay_buffer::ReplayBuffer;

const ALGORITHM: &str = "DQN";

/// DQN hyperparameters. Defaults follow the CCOD settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    pub learning_rate: f32,
    pub discount: f32,
    pub batch_size: usize,
    pub replay_capacity: usize,
    pub tau: f32,
    pub epsilon_start: f32,
    pub epsilon_decay: f32,
    pub epsilon_min: f32,
    pub history_segments: usize,
}

impl Default for DqnConfig {
    fn default() -> Self {
        DqnConfig {
            learning_rate: 4e-4,
            discount: 0.7,
            batch_size: 32,
            replay_capacity: 18_000,
            tau: 4e-3,
            epsilon_start: 0.9,
            epsilon_decay: 0.999,
            epsilon_min: 0.001,
            history_segments: 4,
        }
    }
}

/// Everything that survives a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DqnTrainingState {
    algorithm: String,
    weights: Vec<Vec<f32>>,
    target_weights: Vec<Vec<f32>>,
    epsilon: f32,
    step_count: u64,
    training: bool,
    replay: Vec<Transition>,
}

/// Linear Q-function over history features with experience replay and a
/// softly-updated target copy. Acts epsilon-greedily over `NO_ACTIONS`
/// contention-window levels.
pub struct DqnAgent {
    config: DqnConfig,
    weights: Vec<Vec<f32>>,
    target_weights: Vec<Vec<f32>>,
    replay_buffer: ReplayBuffer,
    epsilon: f32,
    step_count: u64,
    training: bool,
    last: Option<(Vec<f32>, u32)>,
    batch: Vec<Transition>,
    rng: StdRng,
}

impl DqnAgent {
    pub fn new(config: DqnConfig, seed: u64) -> Self {
        let width = feature_len(config.history_segments);
        let weights = vec![vec![0.0; width]; NO_ACTIONS as usize];
        DqnAgent {
            target_weights: weights.clone(),
            weights,
            replay_buffer: ReplayBuffer::new(config.replay_capacity, seed ^ 0x5eed),
            epsilon: config.epsilon_start,
            step_count: 0,
            training: true,
            last: None,
            batch: Vec::with_capacity(config.batch_size),
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn replay_len(&self) -> usize {
        self.replay_buffer.len()
    }

    fn q_values(weights: &[Vec<f32>], features: &[f32]) -> Vec<f32> {
        weights.iter().map(|w| dot(w, features)).collect()
    }

    fn greedy(weights: &[Vec<f32>], features: &[f32]) -> (u32, f32) {
        let mut best = (0u32, f32::NEG_INFINITY);
        for (a, q) in Self::q_values(weights, features).into_iter().enumerate() {
            if q > best.1 {
                best = (a as u32, q);
            }
        }
        best
    }

    /// One SGD step on a replay batch. Returns the mean squared TD error.
    fn train_step(&mut self) -> f32 {
        let mut batch = std::mem::take(&mut self.batch);
        self.replay_buffer.sample_into(self.config.batch_size, &mut batch);

        let scale = self.config.learning_rate / batch.len() as f32;
        let mut loss = 0.0;
        for t in &batch {
            let (_, next_q) = Self::greedy(&self.target_weights, &t.next_state);
            let target = t.reward + self.config.discount * next_q;
            let action = t.action as usize;
            let td = target - dot(&self.weights[action], &t.state);
            loss += td * td;
            for (w, x) in self.weights[action].iter_mut().zip(&t.state) {
                *w += scale * td * x;
            }
        }

        for (target, online) in self.target_weights.iter_mut().zip(&self.weights) {
            soft_update(target, online, self.config.tau);
        }

        let n = batch.len() as f32;
        self.batch = batch;
        loss / n
    }

    fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
    }

    fn training_state(&self) -> DqnTrainingState {
        DqnTrainingState {
            algorithm: ALGORITHM.to_string(),
            weights: self.weights.clone(),
            target_weights: self.target_weights.clone(),
            epsilon: self.epsilon,
            step_count: self.step_count,
            training: self.training,
            replay: self.replay_buffer.to_vec(),
        }
    }
}

impl SessionAgent for DqnAgent {
    fn algorithm_name(&self) -> &str {
        ALGORITHM
    }

    fn act(&mut self, observation: &Observation) -> Action {
        let features = encode_history(&observation.history, self.config.history_segments);
        self.step_count += 1;

        if self.training {
            if let Some((state, action)) = self.last.take() {
                self.replay_buffer.push(Transition {
                    state,
                    action: action as f32,
                    reward: observation.reward,
                    next_state: features.clone(),
                });
                if self.replay_buffer.len() >= self.config.batch_size {
                    self.train_step();
                }
            }
        }

        let action = if self.training && self.rng.random_range(0.0..1.0) < self.epsilon {
            self.rng.random_range(0..NO_ACTIONS)
        } else {
            Self::greedy(&self.weights, &features).0
        };

        if self.training {
            self.decay_epsilon();
            self.last = Some((features, action));
        }
        Action::Discrete(action)
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn exploration(&self) -> f32 {
        self.epsilon
    }

    fn save_state(&self) -> Result<AgentState, AgentStateError> {
        if !self
            .weights
            .iter()
            .chain(&self.target_weights)
            .all(|row| all_finite(row))
        {
            return Err(AgentStateError::NonFinite("weights"));
        }
        let data = serde_json::to_vec(&self.training_state()).map_err(AgentStateError::Encode)?;
        Ok(AgentState { data })
    }

    fn load_state(&mut self, state: &AgentState) -> Result<(), AgentStateError> {
        let restored: DqnTrainingState =
            serde_json::from_slice(&state.data).map_err(AgentStateError::Decode)?;
        ensure_algorithm(ALGORITHM, &restored.algorithm)?;

        let width = feature_len(self.config.history_segments);
        let shape_ok = |w: &Vec<Vec<f32>>| {
            w.len() == NO_ACTIONS as usize && w.iter().all(|row| row.len() == width)
        };
        if !shape_ok(&restored.weights) || !shape_ok(&restored.target_weights) {
            return Err(AgentStateError::AlgorithmMismatch {
                expected: format!("{ALGORITHM} with {NO_ACTIONS}x{width} weights"),
                found: format!("{ALGORITHM} with incompatible weight shape"),
            });
        }

        self.weights = restored.weights;
        self.target_weights = restored.target_weights;
        self.epsilon = restored.epsilon;
        self.step_count = restored.step_count;
        self.training = restored.training;
        self.replay_buffer.restore(restored.replay);
        self.last = None;
        Ok(())
    }

    fn enter_eval_mode(&mut self) {
        self.training = false;
        self.epsilon = 0.0;
        self.replay_buffer.clear();
        self.target_weights = self.weights.clone();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(level: f32, reward: f32) -> Observation {
        Observation {
            history: vec![level; 40],
            reward,
            sim_time: 0.0,
            current_thr: 0.0,
            n_wifi: 5,
        }
    }

    #[test]
    fn test_dqn_selects_valid_action() {
        let mut agent = DqnAgent::new(DqnConfig::default(), 1);
        for _ in 0..200 {
            match agent.act(&observation(0.2, 0.5)) {
                Action::Discrete(a) => assert!(a < NO_ACTIONS),
                other => panic!("unexpected action {other:?}"),
            }
        }
        assert_eq!(agent.step_count(), 200);
    }

    #[test]
    fn test_dqn_epsilon_decay() {
        let config = DqnConfig {
            epsilon_start: 1.0,
            epsilon_decay: 0.5,
            epsilon_min: 0.1,
            ..Default::default()
        };
        let mut agent = DqnAgent::new(config, 1);
        agent.act(&observation(0.1, 0.0));
        assert!((agent.epsilon() - 0.5).abs() < 1e-6);
        for _ in 0..10 {
            agent.act(&observation(0.1, 0.0));
        }
        assert!((agent.epsilon() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_dqn_same_seed_same_actions() {
        let mut a = DqnAgent::new(DqnConfig::default(), 99);
        let mut b = DqnAgent::new(DqnConfig::default(), 99);
        for i in 0..300 {
            let obs = observation((i % 7) as f32 / 7.0, (i % 3) as f32);
            assert_eq!(a.act(&obs), b.act(&obs));
        }
    }

    #[test]
    fn test_dqn_learns_rewarded_action() {
        let config = DqnConfig {
            learning_rate: 0.05,
            discount: 0.0,
            epsilon_start: 1.0,
            epsilon_decay: 0.999,
            epsilon_min: 0.2,
            batch_size: 16,
            ..Default::default()
        };
        let mut agent = DqnAgent::new(config, 3);
        let mut reward = 0.0;
        for _ in 0..4000 {
            let action = agent.act(&observation(0.3, reward));
            reward = if action == Action::Discrete(2) { 1.0 } else { 0.0 };
        }
        agent.enter_eval_mode();
        assert_eq!(agent.act(&observation(0.3, 0.0)), Action::Discrete(2));
    }

    #[test]
    fn test_dqn_refuses_to_save_nan_weights() {
        let config = DqnConfig {
            batch_size: 1,
            ..Default::default()
        };
        let mut agent = DqnAgent::new(config, 8);
        for reward in [0.0, f32::NAN, 0.5] {
            agent.act(&observation(0.4, reward));
        }
        assert!(matches!(
            agent.save_state(),
            Err(AgentStateError::NonFinite(_))
        ));
    }

    #[test]
    fn test_dqn_state_roundtrip() {
        let mut agent = DqnAgent::new(DqnConfig::default(), 5);
        for i in 0..100 {
            agent.act(&observation(0.1 * (i % 5) as f32, 1.0));
        }
        let state = agent.save_state().unwrap();

        let mut restored = DqnAgent::new(DqnConfig::default(), 5);
        restored.load_state(&state).unwrap();
        assert_eq!(restored.step_count(), 100);
        assert!((restored.epsilon() - agent.epsilon()).abs() < 1e-9);
        assert_eq!(restored.replay_len(), agent.replay_len());
        assert_eq!(restored.save_state().unwrap(), state);
    }

    #[test]
    fn test_dqn_rejects_foreign_state() {
        let state = AgentState {
            data: br#"{"algorithm":"DDPG","weights":[],"target_weights":[],"epsilon":0.0,"step_count":0,"training":true,"replay":[]}"#.to_vec(),
        };
        let mut agent = DqnAgent::new(DqnConfig::default(), 5);
        let err = agent.load_state(&state).unwrap_err();
        assert!(matches!(err, AgentStateError::AlgorithmMismatch { .. }));
    }

    #[test]
    fn test_dqn_rejects_garbage() {
        let mut agent = DqnAgent::new(DqnConfig::default(), 5);
        let err = agent
            .load_state(&AgentState {
                data: b"not json".to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, AgentStateError::Decode(_)));
    }

    #[test]
    fn test_dqn_eval_mode_freezes_learning() {
        let mut agent = DqnAgent::new(DqnConfig::default(), 5);
        for _ in 0..50 {
            agent.act(&observation(0.2, 1.0));
        }
        agent.enter_eval_mode();
        assert_eq!(agent.exploration(), 0.0);
        assert_eq!(agent.replay_len(), 0);
        let before = agent.save_state().unwrap();
        let mut snapshot = DqnAgent::new(DqnConfig::default(), 5);
        snapshot.load_state(&before).unwrap();
        for _ in 0..50 {
            agent.act(&observation(0.2, 1.0));
        }
        assert_eq!(agent.replay_len(), 0);
        assert_eq!(agent.weights, snapshot.weights);
    }
}
