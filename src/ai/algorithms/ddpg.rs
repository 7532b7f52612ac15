use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::ai::agent::{
    ensure_algorithm, Action, AgentState, Observation, SessionAgent, Transition, NO_ACTIONS,
};
use crate::ai::state_encoding::{all_finite, dot, encode_history, feature_len, soft_update};
use crate::error::AgentStateError;
use crate::training::replay_buffer::ReplayBuffer;

const ALGORITHM: &str = "DDPG";

/// DDPG hyperparameters. Defaults follow the CCOD settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdpgConfig {
    pub actor_learning_rate: f32,
    pub critic_learning_rate: f32,
    pub discount: f32,
    pub batch_size: usize,
    pub replay_capacity: usize,
    pub tau: f32,
    pub noise_start: f32,
    pub noise_decay: f32,
    pub noise_min: f32,
    pub min_action: f32,
    pub max_action: f32,
    pub history_segments: usize,
}

impl Default for DdpgConfig {
    fn default() -> Self {
        DdpgConfig {
            actor_learning_rate: 4e-4,
            critic_learning_rate: 4e-3,
            discount: 0.7,
            batch_size: 32,
            replay_capacity: 18_000,
            tau: 4e-3,
            noise_start: 1.0,
            noise_decay: 0.9995,
            noise_min: 0.01,
            min_action: 0.0,
            max_action: NO_ACTIONS as f32,
            history_segments: 4,
        }
    }
}

/// Critic parameters: `Q(s, a) = w . phi(s) + v1 * u + v2 * u^2`, where `u` is
/// the action rescaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Critic {
    w: Vec<f32>,
    v1: f32,
    v2: f32,
}

impl Critic {
    fn zeros(width: usize) -> Self {
        Critic {
            w: vec![0.0; width],
            v1: 0.0,
            v2: 0.0,
        }
    }

    fn value(&self, features: &[f32], u: f32) -> f32 {
        dot(&self.w, features) + self.v1 * u + self.v2 * u * u
    }

    fn action_gradient(&self, u: f32) -> f32 {
        self.v1 + 2.0 * self.v2 * u
    }

    fn soft_update(&mut self, online: &Critic, tau: f32) {
        soft_update(&mut self.w, &online.w, tau);
        self.v1 = tau * online.v1 + (1.0 - tau) * self.v1;
        self.v2 = tau * online.v2 + (1.0 - tau) * self.v2;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DdpgTrainingState {
    algorithm: String,
    actor: Vec<f32>,
    actor_target: Vec<f32>,
    critic: Critic,
    critic_target: Critic,
    noise: f32,
    step_count: u64,
    training: bool,
    replay: Vec<Transition>,
}

/// Linear deterministic actor with a linear-quadratic critic. Explores with
/// decaying Gaussian noise on a real-valued action in `[min_action, max_action]`.
pub struct DdpgAgent {
    config: DdpgConfig,
    actor: Vec<f32>,
    actor_target: Vec<f32>,
    critic: Critic,
    critic_target: Critic,
    replay_buffer: ReplayBuffer,
    noise: f32,
    step_count: u64,
    training: bool,
    last: Option<(Vec<f32>, f32)>,
    batch: Vec<Transition>,
    rng: StdRng,
}

impl DdpgAgent {
    pub fn new(config: DdpgConfig, seed: u64) -> Self {
        let width = feature_len(config.history_segments);
        let actor = vec![0.0; width];
        DdpgAgent {
            actor_target: actor.clone(),
            actor,
            critic: Critic::zeros(width),
            critic_target: Critic::zeros(width),
            replay_buffer: ReplayBuffer::new(config.replay_capacity, seed ^ 0x5eed),
            noise: config.noise_start,
            step_count: 0,
            training: true,
            last: None,
            batch: Vec::with_capacity(config.batch_size),
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    pub fn noise(&self) -> f32 {
        self.noise
    }

    pub fn replay_len(&self) -> usize {
        self.replay_buffer.len()
    }

    fn span(&self) -> f32 {
        self.config.max_action - self.config.min_action
    }

    fn clamp(&self, action: f32) -> f32 {
        action.clamp(self.config.min_action, self.config.max_action)
    }

    fn normalize(&self, action: f32) -> f32 {
        (action - self.config.min_action) / self.span()
    }

    fn policy(&self, actor: &[f32], features: &[f32]) -> f32 {
        self.clamp(dot(actor, features))
    }

    /// One update of critic then actor on a replay batch. Returns critic loss.
    fn train_step(&mut self) -> f32 {
        let mut batch = std::mem::take(&mut self.batch);
        self.replay_buffer.sample_into(self.config.batch_size, &mut batch);
        let n = batch.len() as f32;

        let critic_scale = self.config.critic_learning_rate / n;
        let mut loss = 0.0;
        for t in &batch {
            let next_u = self.normalize(self.policy(&self.actor_target, &t.next_state));
            let target = t.reward + self.config.discount * self.critic_target.value(&t.next_state, next_u);
            let u = self.normalize(t.action);
            let td = target - self.critic.value(&t.state, u);
            loss += td * td;
            for (w, x) in self.critic.w.iter_mut().zip(&t.state) {
                *w += critic_scale * td * x;
            }
            self.critic.v1 += critic_scale * td * u;
            self.critic.v2 += critic_scale * td * u * u;
        }

        // Deterministic policy gradient through the clamp-free region.
        let actor_scale = self.config.actor_learning_rate / n;
        let span = self.span();
        for t in &batch {
            let raw = dot(&self.actor, &t.state);
            if raw < self.config.min_action || raw > self.config.max_action {
                continue;
            }
            let grad = self.critic.action_gradient(self.normalize(raw)) / span;
            for (w, x) in self.actor.iter_mut().zip(&t.state) {
                *w += actor_scale * grad * x;
            }
        }

        soft_update(&mut self.actor_target, &self.actor, self.config.tau);
        self.critic_target.soft_update(&self.critic, self.config.tau);

        self.batch = batch;
        loss / n
    }

    fn training_state(&self) -> DdpgTrainingState {
        DdpgTrainingState {
            algorithm: ALGORITHM.to_string(),
            actor: self.actor.clone(),
            actor_target: self.actor_target.clone(),
            critic: self.critic.clone(),
            critic_target: self.critic_target.clone(),
            noise: self.noise,
            step_count: self.step_count,
            training: self.training,
            replay: self.replay_buffer.to_vec(),
        }
    }
}

impl SessionAgent for DdpgAgent {
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
                    action,
                    reward: observation.reward,
                    next_state: features.clone(),
                });
                if self.replay_buffer.len() >= self.config.batch_size {
                    self.train_step();
                }
            }
        }

        let mut action = self.policy(&self.actor, &features);
        if self.training && self.noise > 0.0 {
            if let Ok(normal) = Normal::new(0.0, self.noise) {
                let noisy = action + normal.sample(&mut self.rng);
                action = self.clamp(noisy);
            }
        }

        if self.training {
            self.noise = (self.noise * self.config.noise_decay).max(self.config.noise_min);
            self.last = Some((features, action));
        }
        Action::Continuous(action)
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn exploration(&self) -> f32 {
        self.noise
    }

    fn save_state(&self) -> Result<AgentState, AgentStateError> {
        let critic_ok = |c: &Critic| all_finite(&c.w) && c.v1.is_finite() && c.v2.is_finite();
        if !all_finite(&self.actor)
            || !all_finite(&self.actor_target)
            || !critic_ok(&self.critic)
            || !critic_ok(&self.critic_target)
        {
            return Err(AgentStateError::NonFinite("weights"));
        }
        let data = serde_json::to_vec(&self.training_state()).map_err(AgentStateError::Encode)?;
        Ok(AgentState { data })
    }

    fn load_state(&mut self, state: &AgentState) -> Result<(), AgentStateError> {
        let restored: DdpgTrainingState =
            serde_json::from_slice(&state.data).map_err(AgentStateError::Decode)?;
        ensure_algorithm(ALGORITHM, &restored.algorithm)?;

        let width = feature_len(self.config.history_segments);
        if restored.actor.len() != width
            || restored.actor_target.len() != width
            || restored.critic.w.len() != width
            || restored.critic_target.w.len() != width
        {
            return Err(AgentStateError::AlgorithmMismatch {
                expected: format!("{ALGORITHM} with {width} features"),
                found: format!("{ALGORITHM} with {} features", restored.actor.len()),
            });
        }

        self.actor = restored.actor;
        self.actor_target = restored.actor_target;
        self.critic = restored.critic;
        self.critic_target = restored.critic_target;
        self.noise = restored.noise;
        self.step_count = restored.step_count;
        self.training = restored.training;
        self.replay_buffer.restore(restored.replay);
        self.last = None;
        Ok(())
    }

    fn enter_eval_mode(&mut self) {
        self.training = false;
        self.noise = 0.0;
        self.replay_buffer.clear();
        self.actor_target = self.actor.clone();
        self.critic_target = self.critic.clone();
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

    fn continuous(action: Action) -> f32 {
        match action {
            Action::Continuous(a) => a,
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_ddpg_actions_stay_in_bounds() {
        let mut agent = DdpgAgent::new(DdpgConfig::default(), 11);
        for i in 0..500 {
            let a = continuous(agent.act(&observation(0.1 * (i % 9) as f32, 0.3)));
            assert!((0.0..=NO_ACTIONS as f32).contains(&a), "action {a} out of bounds");
        }
    }

    #[test]
    fn test_ddpg_noise_perturbs_actions() {
        let config = DdpgConfig {
            noise_start: 1.0,
            noise_decay: 1.0,
            noise_min: 1.0,
            ..Default::default()
        };
        let run = |seed| {
            let mut agent = DdpgAgent::new(config.clone(), seed);
            (0..50)
                .map(|_| continuous(agent.act(&observation(0.2, 0.0))))
                .collect::<Vec<_>>()
        };
        let a = run(3);
        assert_eq!(a, run(3));
        assert_ne!(a, run(4));
        assert!(a.iter().all(|x| (0.0..=NO_ACTIONS as f32).contains(x)));
        assert!(a.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_ddpg_noise_decays_to_floor() {
        let config = DdpgConfig {
            noise_start: 1.0,
            noise_decay: 0.5,
            noise_min: 0.05,
            ..Default::default()
        };
        let mut agent = DdpgAgent::new(config, 1);
        for _ in 0..20 {
            agent.act(&observation(0.2, 0.0));
        }
        assert!((agent.noise() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_ddpg_same_seed_same_actions() {
        let mut a = DdpgAgent::new(DdpgConfig::default(), 8);
        let mut b = DdpgAgent::new(DdpgConfig::default(), 8);
        for i in 0..300 {
            let obs = observation((i % 4) as f32 / 4.0, (i % 5) as f32 / 5.0);
            assert_eq!(a.act(&obs), b.act(&obs));
        }
    }

    #[test]
    fn test_ddpg_state_roundtrip() {
        let mut agent = DdpgAgent::new(DdpgConfig::default(), 2);
        for i in 0..120 {
            agent.act(&observation(0.05 * (i % 10) as f32, 0.7));
        }
        let state = agent.save_state().unwrap();

        let mut restored = DdpgAgent::new(DdpgConfig::default(), 2);
        restored.load_state(&state).unwrap();
        assert_eq!(restored.step_count(), 120);
        assert_eq!(restored.replay_len(), agent.replay_len());
        assert_eq!(restored.save_state().unwrap(), state);
    }

    #[test]
    fn test_ddpg_rejects_dqn_state() {
        use crate::ai::algorithms::{DqnAgent, DqnConfig};

        let dqn_state = DqnAgent::new(DqnConfig::default(), 1).save_state().unwrap();
        let mut agent = DdpgAgent::new(DdpgConfig::default(), 1);
        assert!(agent.load_state(&dqn_state).is_err());
    }

    #[test]
    fn test_ddpg_eval_mode_is_deterministic() {
        let mut agent = DdpgAgent::new(DdpgConfig::default(), 4);
        for _ in 0..100 {
            agent.act(&observation(0.3, 0.5));
        }
        agent.enter_eval_mode();
        assert_eq!(agent.exploration(), 0.0);
        let first = agent.act(&observation(0.3, 0.0));
        let second = agent.act(&observation(0.3, 0.0));
        assert_eq!(first, second);
        assert_eq!(agent.replay_len(), 0);
    }
}
