//! Aftershock CLI - real-time matched-filter earthquake detection

use std::path::PathBuf;

use anyhow::Result;
use aftershock_core::Config;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{cmd_bank, cmd_completions, cmd_config_init, cmd_config_show, cmd_detect, cmd_listen, cmd_reactor};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "aftershock")]
#[command(about = "Real-time matched-filter earthquake detection")]
#[command(after_help = "\
QUICK START:
  aftershock config init          # Write a default config
  aftershock bank init            # Create the template bank layout
  aftershock listen               # Poll the catalog and build templates
  aftershock reactor              # Full reactive detection system

ONE-OFF RUNS:
  aftershock detect --eventid smi:local/2026abcdef
  aftershock detect --latitude -42.7 --longitude 173.0 --radius 0.5
  aftershock detect --latitude -42.7 --longitude 173.0 \\
      --simulate ./archive --speed-up 20")]
struct Cli {
  /// Config file to use instead of the user-level one
  #[arg(short, long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// More log output (-v debug, -vv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Warnings and errors only
  #[arg(short, long, global = true, conflicts_with = "verbose")]
  quiet: bool,

  /// Log to this file instead of the console
  #[arg(long, global = true, value_name = "FILE")]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `aftershock bank`
#[derive(Subcommand)]
pub enum BankCommand {
  /// Create the bank directory layout and an empty index
  Init,
  /// Rebuild the index by scanning the bank directory
  Index,
  /// Summarise the templates matching a region and time range
  GetTemplates {
    /// Centre latitude in decimal degrees
    #[arg(long, requires = "longitude")]
    latitude: Option<f64>,
    /// Centre longitude in decimal degrees
    #[arg(long, requires = "latitude")]
    longitude: Option<f64>,
    /// Search radius in degrees around the centre
    #[arg(long, default_value_t = 1.0)]
    radius: f64,
    /// Only events at or after this time (RFC 3339)
    #[arg(long, value_name = "TIME")]
    starttime: Option<String>,
    /// Only events before this time (RFC 3339)
    #[arg(long, value_name = "TIME")]
    endtime: Option<String>,
  },
}

/// Subcommands for `aftershock config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Print the effective configuration as TOML
  Show,
  /// Write a commented default config file
  Init {
    /// Where to write it (default: the user config path)
    #[arg(long, value_name = "FILE")]
    path: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run the full reactive system: listener, triggers, detectors
  Reactor,
  /// Run one matched-filter detection over a region
  #[command(after_help = "\
EXAMPLES:
  aftershock detect --eventid smi:local/2026abcdef
  aftershock detect --latitude -42.7 --longitude 173.0 --radius 0.5
  aftershock detect --latitude -42.7 --longitude 173.0 \\
      --simulate ./archive --speed-up 20")]
  Detect {
    /// Centre the run on this catalog event from the bank
    #[arg(long, conflicts_with_all = ["latitude", "longitude"])]
    eventid: Option<String>,
    /// Centre latitude in decimal degrees
    #[arg(long, requires = "longitude")]
    latitude: Option<f64>,
    /// Centre longitude in decimal degrees
    #[arg(long, requires = "latitude")]
    longitude: Option<f64>,
    /// Template search radius in degrees
    #[arg(long, default_value_t = 0.5)]
    radius: f64,
    /// Replay this wave archive instead of streaming live
    #[arg(long, value_name = "DIR")]
    simulate: Option<PathBuf>,
    /// Replay speed multiplier for --simulate
    #[arg(long, default_value_t = 1.0)]
    speed_up: f64,
  },
  /// Run the catalog listener alone, building templates into the bank
  Listen,
  /// Template bank maintenance
  Bank {
    #[command(subcommand)]
    command: BankCommand,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Generate shell completions
  Completions {
    #[arg(value_enum)]
    shell: clap_complete::Shell,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // Completions go to a clean stdout, before any logging starts.
  if let Commands::Completions { shell } = &cli.command {
    cmd_completions(*shell);
    return Ok(());
  }

  let config = match &cli.config {
    Some(path) => Config::load(path)?,
    None => Config::load_or_default(),
  };
  let _guard = init_logging(&config.logging, cli.verbose, cli.quiet, cli.log_file.as_deref());

  match cli.command {
    Commands::Reactor => cmd_reactor(config).await,
    Commands::Detect {
      eventid,
      latitude,
      longitude,
      radius,
      simulate,
      speed_up,
    } => cmd_detect(config, eventid, latitude, longitude, radius, simulate, speed_up).await,
    Commands::Listen => cmd_listen(config).await,
    Commands::Bank { command } => cmd_bank(config, command).await,
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(cli.config.as_deref()),
      ConfigCommand::Init { path, force } => cmd_config_init(path, force),
    },
    Commands::Completions { .. } => Ok(()),
  }
}
