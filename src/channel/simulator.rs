use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ai::MAX_HISTORY_LENGTH;
use crate::channel::loopback::LoopbackSimulator;
use crate::channel::MempoolKey;
use crate::error::{ChannelError, ConfigError};

/// How a simulator process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatorExit {
    Success,
    Failure(String),
}

/// Per-run parameters handed to the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorParams {
    pub run_index: u32,
    pub seed: u64,
    pub n_wifi: u32,
    pub scenario: String,
    /// "discrete" or "continuous".
    pub agent_type: &'static str,
}

/// Everything a simulator needs to bind to this run's segment.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub mempool_key: MempoolKey,
    pub segment_path: PathBuf,
    pub params: SimulatorParams,
}

/// A running simulator instance.
pub trait SimulatorProcess: Send {
    /// Non-blocking check for exit.
    fn try_wait(&mut self) -> io::Result<Option<SimulatorExit>>;

    /// Ask the process to stop, escalating after `grace`, and reap it.
    fn terminate(&mut self, grace: Duration) -> io::Result<SimulatorExit>;
}

/// Something that can start a simulator bound to a segment.
pub trait Simulator {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn SimulatorProcess>, ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorKind {
    Ns3,
    Loopback,
}

/// Simulator selection and the parameters forwarded to it on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub kind: SimulatorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ns3_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
    pub program: String,
    pub sim_time: f64,
    pub env_step_time: f64,
    pub history_length: u32,
    pub cw: u32,
    pub non_zero_start: bool,
    pub tracing: bool,
    pub verbose: bool,
    pub show_output: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            kind: SimulatorKind::Ns3,
            ns3_path: None,
            library_path: None,
            program: "ccod-sim".to_string(),
            sim_time: 60.0,
            env_step_time: 1e-2,
            history_length: 300,
            cw: 0,
            non_zero_start: false,
            tracing: false,
            verbose: false,
            show_output: true,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sim_time <= 0.0 {
            return Err(ConfigError::Validation("simulator.sim_time must be > 0".into()));
        }
        if self.env_step_time <= 0.0 {
            return Err(ConfigError::Validation(
                "simulator.env_step_time must be > 0".into(),
            ));
        }
        if self.history_length == 0 || self.history_length as usize > MAX_HISTORY_LENGTH {
            return Err(ConfigError::Validation(format!(
                "simulator.history_length must be in [1, {MAX_HISTORY_LENGTH}]"
            )));
        }
        if self.program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "simulator.program must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Check external prerequisites exist. Nothing else about them is inspected.
    pub fn validate_environment(&self) -> Result<(), ConfigError> {
        if self.kind == SimulatorKind::Loopback {
            return Ok(());
        }
        let ns3_path = self.ns3_path.as_ref().ok_or_else(|| {
            ConfigError::Validation("simulator.ns3_path is required for the ns3 simulator".into())
        })?;
        if !ns3_path.exists() {
            return Err(ConfigError::MissingPath {
                what: "ns-3 installation",
                path: ns3_path.clone(),
            });
        }
        if let Some(lib) = &self.library_path {
            if !lib.exists() {
                return Err(ConfigError::MissingPath {
                    what: "library installation",
                    path: lib.clone(),
                });
            }
        }
        Ok(())
    }

    /// Number of agent interactions in one run.
    pub fn steps_per_run(&self) -> u64 {
        (self.sim_time / self.env_step_time).round().max(1.0) as u64
    }

    /// Command-line arguments for the simulator program.
    pub fn simulator_args(&self, request: &LaunchRequest) -> Vec<String> {
        let p = &request.params;
        let mut args = vec![
            format!("--mempoolKey={}", request.mempool_key),
            format!("--segmentPath={}", request.segment_path.display()),
            format!("--agentType={}", p.agent_type),
            format!("--nWifi={}", p.n_wifi),
            format!("--scenario={}", p.scenario),
            format!("--RngRun={}", p.seed),
            format!("--rng={}", p.seed),
            format!("--simTime={}", self.sim_time),
            format!("--envStepTime={}", self.env_step_time),
            format!("--historyLength={}", self.history_length),
            format!("--CW={}", self.cw),
        ];
        for (flag, on) in [
            ("nonZeroStart", self.non_zero_start),
            ("tracing", self.tracing),
            ("verbose", self.verbose),
        ] {
            if on {
                args.push(format!("--{flag}"));
            }
        }
        args
    }

    /// Instantiate the configured simulator.
    pub fn build(&self) -> Result<Box<dyn Simulator>, ConfigError> {
        match self.kind {
            SimulatorKind::Ns3 => {
                let ns3_path = self.ns3_path.clone().ok_or_else(|| {
                    ConfigError::Validation(
                        "simulator.ns3_path is required for the ns3 simulator".into(),
                    )
                })?;
                Ok(Box::new(Ns3Simulator {
                    ns3_path,
                    config: self.clone(),
                }))
            }
            SimulatorKind::Loopback => Ok(Box::new(LoopbackSimulator::new(self))),
        }
    }
}

/// Launches the ns-3 program through the `ns3` driver script.
pub struct Ns3Simulator {
    ns3_path: PathBuf,
    config: SimulatorConfig,
}

impl Ns3Simulator {
    fn command(&self, request: &LaunchRequest) -> Command {
        let program = format!(
            "{} {}",
            self.config.program,
            self.config.simulator_args(request).join(" ")
        );
        let mut cmd = Command::new(self.ns3_path.join("ns3"));
        cmd.arg("run").arg(program).current_dir(&self.ns3_path);
        if let Some(lib) = &self.config.library_path {
            cmd.env("LD_LIBRARY_PATH", prepend_path(lib, std::env::var_os("LD_LIBRARY_PATH")));
        }
        if !self.config.show_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd
    }
}

fn prepend_path(first: &Path, existing: Option<std::ffi::OsString>) -> std::ffi::OsString {
    let mut value = first.as_os_str().to_os_string();
    if let Some(rest) = existing.filter(|r| !r.is_empty()) {
        value.push(":");
        value.push(rest);
    }
    value
}

impl Simulator for Ns3Simulator {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn SimulatorProcess>, ChannelError> {
        let mut cmd = self.command(request);
        info!(
            run = request.params.run_index,
            key = %request.mempool_key,
            "launching {} {}",
            self.config.program,
            self.config.simulator_args(request).join(" ")
        );
        let process = Ns3Process::spawn(&mut cmd)
            .map_err(|e| ChannelError::Launch(format!("{}: {e}", self.ns3_path.display())))?;
        Ok(Box::new(process))
    }
}

/// The `ns3` driver and everything it starts. The driver leads its own
/// process group so the simulator binary underneath it is signalled too,
/// and a terminal Ctrl-C reaches only the orchestrator.
struct Ns3Process {
    child: Child,
    pgid: Pid,
}

impl Ns3Process {
    fn spawn(cmd: &mut Command) -> io::Result<Self> {
        let child = cmd.process_group(0).spawn()?;
        let pgid = Pid::from_raw(child.id() as i32);
        Ok(Ns3Process { child, pgid })
    }

    fn signal_group(&self, signal: Signal) {
        match killpg(self.pgid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(pgid = %self.pgid, "{signal:?} to process group failed: {e}"),
        }
    }
}

fn exit_from_status(status: ExitStatus) -> SimulatorExit {
    if status.success() {
        SimulatorExit::Success
    } else if let Some(code) = status.code() {
        SimulatorExit::Failure(format!("exit code {code}"))
    } else if let Some(signal) = status.signal() {
        SimulatorExit::Failure(format!("killed by signal {signal}"))
    } else {
        SimulatorExit::Failure(format!("{status}"))
    }
}

impl SimulatorProcess for Ns3Process {
    fn try_wait(&mut self) -> io::Result<Option<SimulatorExit>> {
        Ok(self.child.try_wait()?.map(exit_from_status))
    }

    fn terminate(&mut self, grace: Duration) -> io::Result<SimulatorExit> {
        if let Some(status) = self.child.try_wait()? {
            // The driver is gone but the simulator under it may not be.
            self.signal_group(Signal::SIGKILL);
            return Ok(exit_from_status(status));
        }

        self.signal_group(Signal::SIGTERM);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                self.signal_group(Signal::SIGKILL);
                return Ok(exit_from_status(status));
            }
            thread::sleep(Duration::from_millis(20));
        }

        warn!(pgid = %self.pgid, "simulator ignored SIGTERM, killing");
        self.signal_group(Signal::SIGKILL);
        Ok(exit_from_status(self.child.wait()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LaunchRequest {
        LaunchRequest {
            mempool_key: MempoolKey(2333),
            segment_path: PathBuf::from("/dev/shm/rl-campaign-2333.shm"),
            params: SimulatorParams {
                run_index: 2,
                seed: 201,
                n_wifi: 5,
                scenario: "basic".to_string(),
                agent_type: "discrete",
            },
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        SimulatorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_forwarded_arguments() {
        let config = SimulatorConfig {
            tracing: true,
            ..Default::default()
        };
        let args = config.simulator_args(&request());
        assert!(args.contains(&"--mempoolKey=2333".to_string()));
        assert!(args.contains(&"--nWifi=5".to_string()));
        assert!(args.contains(&"--scenario=basic".to_string()));
        assert!(args.contains(&"--RngRun=201".to_string()));
        assert!(args.contains(&"--agentType=discrete".to_string()));
        assert!(args.contains(&"--historyLength=300".to_string()));
        assert!(args.contains(&"--tracing".to_string()));
        assert!(!args.contains(&"--verbose".to_string()));
    }

    #[test]
    fn test_history_length_bounds() {
        let mut config = SimulatorConfig::default();
        config.history_length = MAX_HISTORY_LENGTH as u32 + 1;
        assert!(config.validate().is_err());
        config.history_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_steps_per_run() {
        let config = SimulatorConfig {
            sim_time: 60.0,
            env_step_time: 0.01,
            ..Default::default()
        };
        assert_eq!(config.steps_per_run(), 6000);
    }

    #[test]
    fn test_environment_requires_existing_ns3_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SimulatorConfig {
            ns3_path: Some(dir.path().join("missing")),
            ..Default::default()
        };
        assert!(matches!(
            config.validate_environment(),
            Err(ConfigError::MissingPath { .. })
        ));

        config.ns3_path = Some(dir.path().to_path_buf());
        config.validate_environment().unwrap();

        config.library_path = Some(dir.path().join("lib-missing"));
        assert!(config.validate_environment().is_err());
    }

    #[test]
    fn test_loopback_needs_no_environment() {
        let config = SimulatorConfig {
            kind: SimulatorKind::Loopback,
            ..Default::default()
        };
        config.validate_environment().unwrap();
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_prepend_path() {
        let joined = prepend_path(Path::new("/opt/lib"), Some("/usr/lib".into()));
        assert_eq!(joined, "/opt/lib:/usr/lib");
        let alone = prepend_path(Path::new("/opt/lib"), None);
        assert_eq!(alone, "/opt/lib");
    }

    #[test]
    fn test_process_exit_mapping() {
        let mut process = Ns3Process::spawn(Command::new("sh").arg("-c").arg("exit 3")).unwrap();
        let exit = loop {
            if let Some(exit) = process.try_wait().unwrap() {
                break exit;
            }
            thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(exit, SimulatorExit::Failure("exit code 3".into()));
    }

    #[test]
    fn test_terminate_running_process() {
        let mut process = Ns3Process::spawn(Command::new("sleep").arg("30")).unwrap();
        let exit = process.terminate(Duration::from_secs(2)).unwrap();
        assert_eq!(exit, SimulatorExit::Failure("killed by signal 15".into()));
    }

    #[test]
    fn test_driver_leads_its_own_group() {
        let mut process = Ns3Process::spawn(Command::new("sleep").arg("30")).unwrap();
        assert_eq!(process.pgid.as_raw(), process.child.id() as i32);
        assert_ne!(process.pgid, nix::unistd::getpgrp());
        process.terminate(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_terminate_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("still-running");
        let script = format!("(sleep 1; touch {}) & wait", marker.display());
        let mut process = Ns3Process::spawn(Command::new("sh").arg("-c").arg(script)).unwrap();
        thread::sleep(Duration::from_millis(100));

        process.terminate(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
    }
}
