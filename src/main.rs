mod audit;
mod config;
mod cycle;
mod data_dir;
mod decision;
mod lock;
mod probes;
mod procfs;
mod shutdown;
mod state;
mod status;
mod units;
mod watch;

use clap::{Parser, Subcommand};
use config::DetectorConfig;
use cycle::{run_once, CycleOutcome, Detector};
use data_dir::DataDir;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Powers off an idle Linux host: interactive sessions veto shutdown, and
/// CPU, network and disk activity vote on idleness. Shutdown follows a
/// configured number of consecutive idle checks.
#[derive(Parser, Debug)]
#[command(name = "idlewatch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging (signal samples, lock handling)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log the shutdown instead of running the shutdown command
    #[arg(long, global = true)]
    dry_run: bool,

    /// Data directory (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one evaluation cycle
    Check,
    /// Run cycles every schedule.interval_secs until interrupted
    Watch,
    /// Print idle streak, threshold, lock state and last audit line
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration as TOML
    Config,
    /// Create the data directory and a default config file
    Init,
    /// Print systemd service and timer units for the configured schedule
    Units {
        /// Binary path used in ExecStart (default: this executable)
        #[arg(long)]
        binary: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "idlewatch=debug"
    } else if quiet {
        "idlewatch=warn"
    } else {
        "idlewatch=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file and apply CLI overrides.
fn resolve_config(cli: &Cli) -> DetectorConfig {
    let mut config = match DetectorConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if cli.dry_run {
        config.shutdown.dry_run = true;
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    config
}

/// Build the live detector, creating the data directory if needed.
fn live_detector(config: &DetectorConfig) -> Detector {
    if let Err(e) = DataDir::new(&config.storage.data_dir).init() {
        tracing::error!(
            error = %e,
            path = %config.storage.data_dir.display(),
            "cannot create data directory"
        );
    }
    if !config.shutdown.dry_run && !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("not running as root; the shutdown command may be refused");
    }
    match Detector::from_config(config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = resolve_config(&cli);

    match &cli.command {
        Command::Check => {
            let detector = live_detector(&config);
            let power_off = shutdown::from_config(&config.shutdown);
            let run = run_once(&detector, power_off.as_ref());
            if let CycleOutcome::Evaluated(decision) = &run.outcome {
                tracing::debug!(?decision, powered_off = run.powered_off, "check complete");
            }
        }
        Command::Watch => {
            let detector = live_detector(&config);
            let power_off = shutdown::from_config(&config.shutdown);
            watch::run(detector, power_off, config.schedule.interval()).await;
        }
        Command::Status { json } => {
            let report = status::StatusReport::collect(&config);
            if *json {
                match report.to_json() {
                    Ok(s) => println!("{s}"),
                    Err(e) => {
                        eprintln!("Error: failed to render status: {e}");
                        std::process::exit(1);
                    }
                }
            } else {
                print!("{}", report.to_text());
            }
        }
        Command::Config => match config.to_toml() {
            Ok(s) => print!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        Command::Init => {
            let data_dir = DataDir::new(&config.storage.data_dir);
            match data_dir.init() {
                Ok(true) => println!("Created {}", data_dir.root().display()),
                Ok(false) => println!("{} already exists", data_dir.root().display()),
                Err(e) => {
                    eprintln!("Error: failed to create {}: {e}", data_dir.root().display());
                    std::process::exit(1);
                }
            }
            match config::write_default(&cli.config) {
                Ok(true) => println!("Wrote {}", cli.config.display()),
                Ok(false) => println!("{} already exists, left unchanged", cli.config.display()),
                Err(e) => {
                    eprintln!("Error: failed to write {}: {e}", cli.config.display());
                    std::process::exit(1);
                }
            }
        }
        Command::Units { binary } => {
            let binary = binary.clone().unwrap_or_else(|| {
                std::env::current_exe().unwrap_or_else(|_| PathBuf::from("idlewatch"))
            });
            print!("{}", units::render(&config, &binary, &cli.config));
        }
    }
}
