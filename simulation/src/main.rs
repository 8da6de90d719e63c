//! Aula messaging simulation
//!
//! Runs scripted multi-client scenarios against a shared in-memory store
//! and reports whether the shared state stayed consistent.

use std::path::PathBuf;

use aula_logging::{AulaSubscriberBuilder, LogConfig};
use aula_messaging::MessagingConfig;
use clap::{Parser, Subcommand};

use aula_simulation::{ScenarioReport, SimWorld, scenarios};

#[derive(Parser)]
#[command(
    name = "aula-sim",
    about = "Multi-client messaging scenarios over a shared store",
    version
)]
struct Cli {
    /// Enable verbose, human-readable logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Write every client's debug log to `<DIR>/aula-sim.log`, one JSON object per line
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Both sides of a DM create it concurrently
    DmRace {
        /// Concurrent attempts per side
        #[arg(short, long, default_value = "16")]
        rounds: usize,
    },

    /// Students request to join an approval group and get approved
    ApprovalJoin {
        #[arg(short, long, default_value = "20")]
        applicants: usize,
    },

    /// More students than seats race to join an open group
    Capacity {
        /// Group capacity, owner included
        #[arg(short, long, default_value = "10")]
        capacity: u32,

        #[arg(short, long, default_value = "25")]
        joiners: usize,
    },

    /// Members post concurrently into one group
    Send {
        #[arg(short, long, default_value = "5")]
        senders: usize,

        #[arg(short, long, default_value = "10")]
        per_sender: usize,
    },

    /// Typing throttle and expiry
    Typing,

    /// Run every scenario with default sizes
    All,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let builder = match (&cli.log_dir, cli.verbose) {
        (Some(dir), _) => {
            AulaSubscriberBuilder::new().with_config(LogConfig::simulation(dir.clone(), "aula-sim"))
        }
        (None, true) => AulaSubscriberBuilder::new().with_config(LogConfig::development()),
        (None, false) => AulaSubscriberBuilder::new().with_level("warn"),
    };
    let _log_guard = builder.init();

    let reports = match cli.command {
        Commands::DmRace { rounds } => vec![scenarios::run_dm_race(&SimWorld::new(), rounds).await?],
        Commands::ApprovalJoin { applicants } => {
            vec![scenarios::run_approval_join(&SimWorld::new(), applicants).await?]
        }
        Commands::Capacity { capacity, joiners } => {
            let world =
                SimWorld::with_config(MessagingConfig::default().with_group_capacity(capacity));
            vec![scenarios::run_capacity(&world, joiners).await?]
        }
        Commands::Send {
            senders,
            per_sender,
        } => vec![scenarios::run_send(&SimWorld::new(), senders, per_sender).await?],
        Commands::Typing => vec![scenarios::run_typing(&SimWorld::new()).await?],
        Commands::All => run_all().await?,
    };

    for report in &reports {
        if cli.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            print!("{report}");
        }
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.scenario.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("scenarios failed: {}", failed.join(", "));
    }
    Ok(())
}

async fn run_all() -> anyhow::Result<Vec<ScenarioReport>> {
    let capacity_world = SimWorld::with_config(MessagingConfig::default().with_group_capacity(10));
    Ok(vec![
        scenarios::run_dm_race(&SimWorld::new(), 16).await?,
        scenarios::run_approval_join(&SimWorld::new(), 20).await?,
        scenarios::run_capacity(&capacity_world, 25).await?,
        scenarios::run_send(&SimWorld::new(), 5, 10).await?,
        scenarios::run_typing(&SimWorld::new()).await?,
    ])
}
