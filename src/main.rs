use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uploadgate::sim::{Scenario, ScenarioReport};
use uploadgate::UploadGateConfig;

#[derive(Parser)]
#[command(
    name = "uploadgate",
    about = "Upload slot admission control for peer-to-peer file sharing",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $UPLOADGATE_CONFIG, then /etc/uploadgate/uploadgate.toml)
    #[arg(long, global = true, env = "UPLOADGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Replay a scripted scenario against a fresh scheduler
    Simulate {
        /// Scenario file (TOML)
        #[arg(long)]
        scenario: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<UploadGateConfig> {
    match path {
        Some(path) => UploadGateConfig::load(path),
        None => Ok(UploadGateConfig::load_or_default()),
    }
}

fn print_report(report: &ScenarioReport) {
    println!(
        "{:<5} | {:<8} | {:<12} | {:>6} | {:>6} | {:>6} | {:>9}",
        "Step", "Op", "User", "Result", "Active", "Queued", "Resumable"
    );
    println!(
        "{:-<5}-|-{:-<8}-|-{:-<12}-|-{:-<6}-|-{:-<6}-|-{:-<6}-|-{:-<9}",
        "", "", "", "", "", "", ""
    );
    for step in &report.steps {
        let code = step.code.map(|c| c.to_string()).unwrap_or_default();
        println!(
            "{:<5} | {:<8} | {:<12} | {:>6} | {:>6} | {:>6} | {:>9}",
            step.index,
            step.op,
            step.user.as_deref().unwrap_or(""),
            code,
            step.active,
            step.queued,
            step.queued_resumable
        );
    }

    println!("\n=== Users ===");
    for user in &report.users {
        println!(
            "{:<12} : released {} time(s), notified {} time(s)",
            user.name, user.releases, user.notifications
        );
    }

    let state = &report.final_state;
    println!("\n=== Final State ===");
    println!("Active:           {}", state.active.len());
    for slot in &state.active {
        println!(" - {} ({}, {:?})", slot.host, slot.priority, slot.kind);
    }
    println!("Queued:           {}", state.queued.len());
    println!("Queued resumable: {}", state.queued_resumable.len());
    match state.measured_bandwidth {
        Some(bw) => println!("Measured:         {:.2} KB/s", bw),
        None => println!("Measured:         insufficient data ({} samples)", state.samples),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    // Initialize tracing; RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Simulate { scenario, json } => {
            tracing::info!(scenario = %scenario.display(), "Running scenario");
            let report = Scenario::load(&scenario)?.run(&config.scheduler)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}
