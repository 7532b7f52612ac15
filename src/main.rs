use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rl_campaign::channel::{MempoolKey, SimulatorKind};
use rl_campaign::checkpoint::CheckpointStore;
use rl_campaign::config::AppConfig;
use rl_campaign::error::{CampaignError, ConfigError};
use rl_campaign::training::{freeze_checkpoint, CampaignManager, CampaignSpec, StartRun};

/// Run checkpoint-chained RL training campaigns against a network simulator.
#[derive(Parser)]
#[command(name = "rl-campaign", version, about)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, global = true, default_value = "campaign.toml")]
    config: PathBuf,

    /// Trace-level logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a training campaign
    Run(RunArgs),
    /// Print the metadata of a checkpoint
    Inspect {
        path: PathBuf,
    },
    /// Write an evaluation copy of a checkpoint (no exploration, no replay)
    Freeze {
        #[arg(long)]
        load: PathBuf,
        #[arg(long)]
        save: PathBuf,
    },
    /// Print the default configuration as TOML
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Agent identifier: DQN (discrete) or DDPG (continuous)
    #[arg(long, default_value = "DQN")]
    agent: String,

    /// Scenario name, forwarded to the simulator and used in checkpoint names
    #[arg(long, default_value = "basic")]
    scenario: String,

    /// Number of stations in the simulated network
    #[arg(long = "n-wifi", default_value_t = 5)]
    n_wifi: u32,

    /// Base seed; run i uses seed + i - 1
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of runs in the campaign
    #[arg(long, default_value_t = 15)]
    runs: u32,

    /// First run to execute (needs the previous run's checkpoint)
    #[arg(long, conflicts_with = "resume")]
    start_run: Option<u32>,

    /// Continue after the last contiguous checkpoint on disk
    #[arg(long)]
    resume: bool,

    /// ns-3 installation directory
    #[arg(long)]
    ns3_path: Option<PathBuf>,

    /// Library directory prepended to LD_LIBRARY_PATH for the simulator
    #[arg(long)]
    library_path: Option<PathBuf>,

    /// Shared-memory key the simulator binds to
    #[arg(long)]
    mempool_key: Option<MempoolKey>,

    /// Directory for checkpoints
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Use the in-process loopback simulator instead of ns-3
    #[arg(long)]
    loopback: bool,

    /// Simulated seconds per run
    #[arg(long)]
    sim_time: Option<f64>,

    /// Simulated seconds between agent interactions
    #[arg(long)]
    env_step_time: Option<f64>,

    /// Observation history length
    #[arg(long)]
    history_length: Option<u32>,
}

static CANCEL: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_: nix::libc::c_int) {
    if let Some(flag) = CANCEL.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_signal_handlers(flag: Arc<AtomicBool>) -> Result<()> {
    let _ = CANCEL.set(flag);
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("installing {signal:?} handler"))?;
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "trace"
    } else {
        "info,rl_campaign=debug"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => return run_campaign(&cli.config, args),
        Command::Inspect { path } => inspect(&cli.config, &path),
        Command::Freeze { load, save } => freeze(&cli.config, &load, &save),
        Command::Config => {
            print!("{}", AppConfig::default_toml());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(path) = &args.ns3_path {
        config.simulator.ns3_path = Some(path.clone());
    }
    if let Some(path) = &args.library_path {
        config.simulator.library_path = Some(path.clone());
    }
    if let Some(key) = args.mempool_key {
        config.channel.mempool_key = key;
    }
    if let Some(dir) = &args.checkpoint_dir {
        config.checkpoint.checkpoint_dir = dir.clone();
    }
    if args.loopback {
        config.simulator.kind = SimulatorKind::Loopback;
    }
    if let Some(t) = args.sim_time {
        config.simulator.sim_time = t;
    }
    if let Some(t) = args.env_step_time {
        config.simulator.env_step_time = t;
    }
    if let Some(n) = args.history_length {
        config.simulator.history_length = n;
    }
}

fn load_config(path: &std::path::Path, args: &RunArgs) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load_or_default(path)?;
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn run_campaign(config_path: &std::path::Path, args: RunArgs) -> ExitCode {
    match try_run_campaign(config_path, args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(run = err.run_index, kind = err.failure.kind(), "{err}");
            if err.run_index.is_some() {
                warn!("earlier checkpoints are intact; rerun with --start-run or --resume to continue");
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn try_run_campaign(config_path: &std::path::Path, args: RunArgs) -> Result<(), CampaignError> {
    let config = load_config(config_path, &args).map_err(CampaignError::preflight)?;

    let spec = CampaignSpec {
        agent: args.agent.clone(),
        scenario: args.scenario.clone(),
        n_wifi: args.n_wifi,
        base_seed: args.seed,
        runs: args.runs,
    };
    // Agent and campaign shape are checked before the environment so a bad
    // invocation fails without probing the filesystem.
    rl_campaign::ai::resolve_agent(&spec.agent, &config.dqn, &config.ddpg)
        .map_err(CampaignError::preflight)?;
    spec.validate().map_err(CampaignError::preflight)?;
    config
        .simulator
        .validate_environment()
        .map_err(CampaignError::preflight)?;
    let simulator = config.simulator.build().map_err(CampaignError::preflight)?;

    let cancel = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handlers(cancel.clone()) {
        warn!("signals will not cancel the campaign: {e:#}");
    }

    let start = match (args.start_run, args.resume) {
        (Some(k), _) => StartRun::At(k),
        (None, true) => StartRun::Resume,
        (None, false) => StartRun::First,
    };
    let mut manager = CampaignManager::new(spec, &config, simulator.as_ref())
        .with_cancel(cancel)
        .with_start(start);
    let report = manager.run()?;

    for run in &report.runs {
        info!(
            run = run.run_index,
            seed = run.seed,
            steps = run.metrics.steps,
            mean_reward = run.metrics.mean_reward,
            path = %run.checkpoint.display(),
            "persisted"
        );
    }
    Ok(())
}

fn inspect(config_path: &std::path::Path, path: &std::path::Path) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let store = CheckpointStore::new(config.checkpoint);
    let checkpoint = store
        .load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let json = serde_json::to_string_pretty(&checkpoint.metadata)?;
    println!("{json}");
    println!("state: {} bytes", checkpoint.state.data.len());
    Ok(())
}

fn freeze(config_path: &std::path::Path, load: &std::path::Path, save: &std::path::Path) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?;
    let store = CheckpointStore::new(config.checkpoint.clone());
    let metadata = freeze_checkpoint(&store, &config, load, save)
        .with_context(|| format!("freezing {}", load.display()))?;
    println!(
        "wrote evaluation checkpoint {} ({} run {})",
        save.display(),
        metadata.agent,
        metadata.run_index
    );
    Ok(())
}
