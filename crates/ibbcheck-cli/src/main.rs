#![deny(unsafe_code)]

//! ibbcheck CLI: run the IBB exchange against a loopback hub.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ibbcheck_config::{HarnessConfig, Jid};
use ibbcheck_core::scenario::{RECEIVER_PAYLOAD, SENDER_PAYLOAD};
use ibbcheck_core::{Daemon, RecvIbb, RunError, SendIbb, TransferReport, build_info};
use ibbcheck_loopback::{Hub, PairOptions, PairOutcome};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Exit status for a configuration that does not load or validate.
const CONFIG_EXIT: u8 = 2;

/// ibbcheck: cross-process In-Band Bytestream integration harness.
#[derive(Parser)]
#[command(name = "ibbcheck", version = build_info::LONG_VERSION, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "ibbcheck.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the receiver and the sender against an in-process hub.
    Pair(PairArgs),

    /// Run only the sending role, opening a stream to the peer.
    Send(RoleArgs),

    /// Run only the receiving role, accepting the peer's stream.
    Recv(RoleArgs),

    /// Validate and display configuration.
    Config {
        /// Print the resolved configuration, password redacted.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
struct PairArgs {
    /// Session id both roles use instead of a random one.
    #[arg(long)]
    sid: Option<String>,

    /// IBB block size, overriding `run.block_size`.
    #[arg(long)]
    block_size: Option<u16>,

    /// Run deadline in seconds, overriding `run.deadline_secs`. 0 disables.
    #[arg(long)]
    deadline: Option<u64>,

    /// Print both transfer reports as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Make closing the sender's stream fail with this cause.
    #[arg(long, value_name = "CAUSE")]
    inject_close_error: Option<String>,
}

#[derive(Args)]
struct RoleArgs {
    /// JID of the other role.
    #[arg(short, long)]
    jid: Jid,

    /// Session id to use (sender) or require (receiver).
    #[arg(long)]
    sid: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = HarnessConfig::load(&cli.config).await;
    let level = loaded.as_ref().map(|c| c.logging.level.as_str()).unwrap_or("warn");
    let filter = match cli.verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ibbcheck: config: {}: {e}", cli.config.display());
            return ExitCode::from(CONFIG_EXIT);
        }
    };
    debug!(path = %cli.config.display(), version = build_info::LONG_VERSION, "configuration loaded");

    let result = match cli.command {
        Commands::Pair(args) => cmd_pair(config, args).await,
        Commands::Send(args) => cmd_send(config, args).await,
        Commands::Recv(args) => cmd_recv(config, args).await,
        Commands::Config { show } => cmd_config(&cli.config, &config, show),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ibbcheck: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_pair(mut config: HarnessConfig, args: PairArgs) -> Result<u8> {
    if let Some(block_size) = args.block_size {
        config.run.block_size = block_size;
    }
    if let Some(deadline) = args.deadline {
        config.run.deadline_secs = deadline;
    }
    let options = PairOptions {
        sid: args.sid,
        close_fault: args.inject_close_error,
    };

    let outcome = match ibbcheck_loopback::run_pair(&config, &options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("ibbcheck: config: {e}");
            return Ok(CONFIG_EXIT);
        }
    };
    if args.json {
        print_reports(&outcome)?;
    }
    report_failures(&outcome);
    info!(exit_code = outcome.exit_code(), "done");
    Ok(outcome.exit_code())
}

/// Build a daemon for one role on a hub provisioned from `config`.
///
/// Returns `None` after printing the diagnostic when the config is rejected.
fn role_daemon(config: &HarnessConfig) -> Option<Daemon> {
    let daemon = Hub::for_config(config)
        .and_then(|hub| Daemon::configure(config, hub.connector()));
    match daemon {
        Ok(daemon) => Some(daemon),
        Err(e) => {
            eprintln!("ibbcheck: config: {e}");
            None
        }
    }
}

async fn cmd_send(config: HarnessConfig, args: RoleArgs) -> Result<u8> {
    let Some(daemon) = role_daemon(&config) else {
        return Ok(CONFIG_EXIT);
    };
    let mut send = SendIbb::new(args.jid)
        .block_size(config.run.block_size)
        .verify_against(RECEIVER_PAYLOAD);
    if let Some(sid) = args.sid {
        send = send.session_id(sid);
    }
    Ok(finish_role("sender", daemon.run_scoped(&send).await))
}

async fn cmd_recv(config: HarnessConfig, args: RoleArgs) -> Result<u8> {
    let Some(daemon) = role_daemon(&config) else {
        return Ok(CONFIG_EXIT);
    };
    let recv = RecvIbb::new(args.jid)
        .session_id(args.sid)
        .verify_against(SENDER_PAYLOAD);
    Ok(finish_role("receiver", daemon.run_scoped(&recv).await))
}

fn finish_role(role: &str, result: Result<TransferReport, RunError>) -> u8 {
    match result {
        Ok(report) => {
            info!(role, sid = %report.sid, "done");
            0
        }
        Err(e) => {
            eprintln!("ibbcheck: {role}: {e}");
            e.exit_code()
        }
    }
}

fn print_reports(outcome: &PairOutcome) -> Result<()> {
    let report = serde_json::json!({
        "sender": outcome.sender.as_ref().ok(),
        "receiver": outcome.receiver.as_ref().and_then(|r| r.as_ref().ok()),
    });
    let text = serde_json::to_string_pretty(&report).context("serializing transfer reports")?;
    println!("{text}");
    Ok(())
}

fn report_failures(outcome: &PairOutcome) {
    for (role, error) in outcome.failures() {
        eprintln!("ibbcheck: {role}: {error}");
    }
    if outcome.sender.is_ok() && outcome.receiver.is_none() {
        eprintln!("ibbcheck: receiver: never started");
    }
}

fn cmd_config(path: &Path, config: &HarnessConfig, show: bool) -> Result<u8> {
    if show {
        let mut shown = config.clone();
        shown.client.password = "[REDACTED]".to_string();
        let toml_str = toml::to_string_pretty(&shown).context("TOML error")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", path.display());
    }
    Ok(0)
}
