use anyhow::{anyhow, Context, Result};
use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser};
use massprobe::action::ShellAction;
use massprobe::config::{load_config, save_config, FileConfig};
use massprobe::counters::{human_duration, Counters};
use massprobe::limits::{match_nofile, NofileLimit};
use massprobe::logging::{self, LogFormat};
use massprobe::targets::TargetSet;
use massprobe::{Engine, EngineConfig, ProbeSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

// Build-time version: Major.Minor.Patch.Build
const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), ".", env!("APP_BUILD"));

const SEPARATOR: &str = "-----------------------------------------------------------------";

#[derive(Parser, Debug)]
#[command(name = "massprobe", version = APP_VERSION, about = "Probe HTTP resources across a network range")]
struct Cli {
    /// Network or host: 10.0.0.0 (/8), 10.1.0.0 (/16), 10.1.2.0 (/24), a CIDR block, or a single address
    network: Option<String>,

    /// Probe specs, each resource[:pattern[:command]]
    #[arg(value_name = "PROBE")]
    probes: Vec<String>,

    /// Scan-rate knob deriving socket ceiling, worker count and timeouts
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=12))]
    scale: Option<u32>,

    /// Maximum concurrent probe tasks
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Maximum concurrently open sockets (descriptor ceiling)
    #[arg(long = "max-sockets")]
    max_sockets: Option<usize>,

    /// TCP port to probe
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long = "connect-timeout-ms")]
    connect_timeout_ms: Option<u64>,

    #[arg(long = "read-timeout-ms")]
    read_timeout_ms: Option<u64>,

    #[arg(long = "write-timeout-ms")]
    write_timeout_ms: Option<u64>,

    /// How many times a single host is probed
    #[arg(short, long)]
    repeat: Option<u64>,

    /// Pause briefly before every submission to cap the probe rate
    #[arg(long, action = ArgAction::SetTrue)]
    pacing: bool,

    /// Log progress every N seconds (0 disables)
    #[arg(long = "stats-interval-secs")]
    stats_interval_secs: Option<u64>,

    /// Print final statistics as JSON
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    #[arg(long = "log-format", value_enum)]
    log_format: Option<LogFormat>,

    /// Path to a configuration file (TOML). If not set, defaults to $XDG_CONFIG_HOME/massprobe/config.toml when present.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Write current effective configuration to the config file and exit.
    #[arg(long = "write-config", action = ArgAction::SetTrue)]
    write_config: bool,
}

/// Command line merged over the config file over built-in defaults.
struct Settings {
    network: String,
    probes: Vec<String>,
    engine: EngineConfig,
    scale: u32,
    repeat: u64,
    stats_interval: u64,
    json: bool,
    log_format: LogFormat,
}

impl Settings {
    fn merge(cli: &Cli, file: FileConfig) -> Result<Self> {
        let network = match cli.network.clone().or(file.network.clone()) {
            Some(n) => n,
            None => usage("a network or host is required"),
        };
        let probes = if cli.probes.is_empty() {
            file.probes.clone().unwrap_or_default()
        } else {
            cli.probes.clone()
        };
        if probes.is_empty() {
            usage("at least one probe spec resource[:pattern[:command]] is required");
        }

        let scale = cli.scale.or(file.scale).unwrap_or(massprobe::types::DEFAULT_SCALE);
        let mut engine = EngineConfig::from_scale(scale)?;
        if let Some(n) = cli.workers.or(file.workers) {
            engine.workers = n;
        }
        if let Some(m) = cli.max_sockets.or(file.max_sockets) {
            engine.max_sockets = m;
        }
        if let Some(p) = cli.port.or(file.port) {
            engine.port = p;
        }
        if let Some(ms) = cli.connect_timeout_ms.or(file.connect_timeout_ms) {
            engine.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = cli.read_timeout_ms.or(file.read_timeout_ms) {
            engine.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = cli.write_timeout_ms.or(file.write_timeout_ms) {
            engine.write_timeout = Duration::from_millis(ms);
        }
        engine.pacing = cli.pacing || file.pacing.unwrap_or(false);
        engine.validate()?;

        Ok(Self {
            network,
            probes,
            engine,
            scale,
            repeat: cli.repeat.or(file.repeat).unwrap_or(1),
            stats_interval: cli.stats_interval_secs.or(file.stats_interval_secs).unwrap_or(0),
            json: cli.json || file.json.unwrap_or(false),
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
        })
    }

    fn to_file_config(&self) -> FileConfig {
        FileConfig {
            network: Some(self.network.clone()),
            probes: Some(self.probes.clone()),
            scale: Some(self.scale),
            workers: Some(self.engine.workers),
            max_sockets: Some(self.engine.max_sockets),
            port: Some(self.engine.port),
            connect_timeout_ms: Some(self.engine.connect_timeout.as_millis() as u64),
            read_timeout_ms: Some(self.engine.read_timeout.as_millis() as u64),
            write_timeout_ms: Some(self.engine.write_timeout.as_millis() as u64),
            repeat: Some(self.repeat),
            pacing: Some(self.engine.pacing),
            stats_interval_secs: Some(self.stats_interval),
            json: Some(self.json),
            log_format: Some(self.log_format),
        }
    }
}

/// Prints a usage error and exits before any scanning.
fn usage(message: &str) -> ! {
    Cli::command().error(ErrorKind::MissingRequiredArgument, message).exit()
}

/// Logs progress and a rough time-to-finish until aborted.
fn spawn_reporter(counters: Arc<Counters>, total: u64, every: Duration) -> tokio::task::JoinHandle<()> {
    let started = Instant::now();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await;
        loop {
            tick.tick().await;
            let snap = counters.snapshot();
            match snap.estimate(started.elapsed().as_secs_f64(), total) {
                Some((rate, remaining)) => info!(
                    probes = snap.probes,
                    targets = snap.targets,
                    rate = %format!("{rate:.1}/s"),
                    remaining = %human_duration(remaining),
                    "progress"
                ),
                None => info!(probes = snap.probes, "progress"),
            }
        }
    })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config file if present
    let file_cfg = match load_config(cli.config_path.as_deref().map(Path::as_ref)) {
        Ok(opt) => opt.unwrap_or_default(),
        Err(e) => {
            eprintln!("warning: failed to load config file: {e}");
            FileConfig::default()
        }
    };
    let settings = Settings::merge(&cli, file_cfg)?;

    if cli.write_config {
        let path = save_config(&settings.to_file_config(), cli.config_path.as_deref().map(Path::as_ref))
            .map_err(|e| anyhow!("failed to write config: {e}"))?;
        println!("wrote configuration to {}", path.display());
        return Ok(());
    }

    logging::init(settings.log_format, "info");

    let specs = settings
        .probes
        .iter()
        .map(|s| s.parse::<ProbeSpec>().with_context(|| format!("invalid probe spec {s:?}")))
        .collect::<Result<Vec<_>>>()?;
    let targets = TargetSet::parse(&settings.network, settings.repeat)?;

    match match_nofile(settings.engine.max_sockets) {
        Ok(NofileLimit::Raised(n)) => info!(limit = n, "open file limit set"),
        Ok(NofileLimit::Capped(n)) => warn!(limit = n, "user's limits might slow down operations"),
        Err(e) => warn!(error = %e, "could not adjust open file limit"),
    }

    info!(
        network = %settings.network,
        mode = %targets.mode(),
        addresses = targets.len(),
        probes = specs.len(),
        workers = settings.engine.workers,
        max_sockets = settings.engine.max_sockets,
        connect_timeout = ?settings.engine.connect_timeout,
        read_timeout = ?settings.engine.read_timeout,
        "starting scan"
    );

    let started = Instant::now();
    let engine = Engine::new(specs, settings.engine.clone(), targets.mode())?.with_action(Arc::new(ShellAction));

    let reporter = (settings.stats_interval > 0).then(|| {
        spawn_reporter(engine.counters(), targets.len(), Duration::from_secs(settings.stats_interval))
    });

    for address in targets.addresses() {
        engine.submit(&address).await;
    }
    let snapshot = engine.drain().await;

    if let Some(r) = reporter {
        r.abort();
    }

    if settings.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{SEPARATOR}");
        println!("{snapshot}");
        println!("{SEPARATOR}");
        println!("statistics: {} elapsed", human_duration(started.elapsed().as_secs()));
    }

    Ok(())
}
