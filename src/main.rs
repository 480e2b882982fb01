//! # Quizcast — scheduled quiz pushes
//!
//! Usage:
//!   quizcast run                                   # Start the scheduler
//!   quizcast push-now --group 100 --domain rust    # Push once, right now
//!   quizcast status --group 100                    # Schedule + strategy progress
//!   quizcast task --group 100 on rust 08:30        # Enable a domain
//!   quizcast task --group 100 on default           # Follow the weekly schedule
//!   quizcast strategy --group 100 set counter all  # Switch strategies
//!   quizcast jobs                                  # Print the job table

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use quizcast_core::QuizcastConfig;
use quizcast_core::types::StrategyKind;
use quizcast_scheduler::{Admin, QuizDb, Scheduler, spawn_scheduler, status};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quizcast",
    version,
    about = "📚 Quizcast — scheduled quiz pushes to chat groups"
)]
struct Cli {
    /// Config file (default: ~/.quizcast/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Push one domain to a group immediately
    PushNow {
        #[arg(long)]
        group: String,
        #[arg(long)]
        domain: String,
    },
    /// Show a group's schedule and strategy progress
    Status {
        #[arg(long)]
        group: String,
    },
    /// Turn pushes on or off: a domain name, `all`, or `default`
    Task {
        #[arg(long)]
        group: String,
        switch: Switch,
        target: String,
        /// Push time, HH:MM
        time: Option<String>,
    },
    /// Manage selection strategies
    Strategy {
        #[arg(long)]
        group: String,
        #[command(subcommand)]
        action: StrategyAction,
    },
    /// Print the derived job table
    Jobs,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand)]
enum StrategyAction {
    /// Set the strategy of a domain, or of every active domain with `all`
    Set { kind: String, target: String },
    /// Describe a domain's progress
    Info { domain: String },
    /// Reset a domain's progress for its current strategy
    Reset { domain: String },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "quizcast=debug,quizcast_scheduler=debug,quizcast_core=debug"
    } else {
        "quizcast=info,quizcast_scheduler=info,quizcast_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(QuizcastConfig::default_path);
    let config = if config_path.exists() {
        QuizcastConfig::load_from(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        tracing::warn!("⚠️ {} not found, using defaults", config_path.display());
        QuizcastConfig::default()
    };

    let db = Arc::new(QuizDb::open(&config.database_path()).context("opening database")?);
    let scheduler = Arc::new(Scheduler::from_config(db.clone(), config, Some(config_path)));
    let admin = Admin::new(scheduler.clone());

    match cli.command {
        Command::Run => {
            let jobs = scheduler.reload_all().await?;
            println!("📚 Quizcast v{} — {} jobs loaded", env!("CARGO_PKG_VERSION"), jobs);

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = tokio::spawn(spawn_scheduler(scheduler.clone(), shutdown_rx));
            tokio::signal::ctrl_c().await?;
            tracing::info!("👋 Shutting down...");
            shutdown_tx.send(true).ok();
            handle.await?;
        }
        Command::PushNow { group, domain } => {
            let found = db
                .domain_by_name(&domain)?
                .with_context(|| format!("domain [{domain}] does not exist"))?;
            println!("🚀 Pushing [{}] to group {}...", found.name, group);
            let outcome = scheduler.push_now(&group, found.id).await?;
            println!("{outcome}");
        }
        Command::Status { group } => {
            let snapshot = scheduler.snapshot().await;
            println!("{}", status::schedule_report(&db, &snapshot, &group)?);
            println!();
            println!("{}", status::strategy_report(&db, &group)?);
        }
        Command::Task {
            group,
            switch,
            target,
            time,
        } => {
            let on = matches!(switch, Switch::On);
            let message = match target.as_str() {
                "default" => admin.set_default(&group, on).await?,
                "all" => admin.set_all(&group, on, time.as_deref()).await?,
                domain => admin.set_domain(&group, domain, on, time.as_deref()).await?,
            };
            println!("{message}");
        }
        Command::Strategy { group, action } => {
            let message = match action {
                StrategyAction::Set { kind, target } => {
                    let Ok(kind) = kind.parse::<StrategyKind>() else {
                        bail!("unknown strategy '{kind}' (expected batch, counter, daterem)");
                    };
                    admin.set_strategy(&group, &target, kind).await?
                }
                StrategyAction::Info { domain } => admin.strategy_info(&group, &domain)?,
                StrategyAction::Reset { domain } => admin.reset_progress(&group, &domain).await?,
            };
            println!("{message}");
        }
        Command::Jobs => {
            scheduler.reload_all().await?;
            let jobs = scheduler.jobs().await;
            if jobs.is_empty() {
                println!("📋 No jobs");
            }
            for job in jobs {
                let next = job
                    .next_run
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<40} {:<14} next {}", job.id.as_str(), job.schedule.expression(), next);
            }
        }
    }

    Ok(())
}
