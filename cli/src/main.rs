mod bridge;
mod commands;
mod config;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    ObservationArgs, cmd_delete, cmd_goals_reset, cmd_goals_set, cmd_goals_show, cmd_history,
    cmd_log,
    cmd_mindful_add, cmd_mindful_remove, cmd_ping, cmd_show, cmd_streak, cmd_sync,
    cmd_water_add, cmd_water_remove, cmd_widget,
};
use crate::config::Config;
use vitals_core::service::HealthService;

#[derive(Parser)]
#[command(
    name = "vitals",
    version,
    about = "A local-first daily health record tracker",
    long_about = "One health record per day, merged from HealthKit / Health Connect \
                  exports and quick manual entries, stored locally in SQLite."
)]
struct Cli {
    /// User id to act on (default: this device's user)
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show today's record
    Today {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the record for a date (defaults to today)
    Show {
        /// Date (YYYY-MM-DD or today/yesterday)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show records for the last N days
    History {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge manually entered metrics into a day's record
    Log {
        #[command(flatten)]
        metrics: ObservationArgs,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync today's record from a health platform export
    Sync {
        /// Exported HealthKit / Health Connect sample JSON
        #[arg(short, long, value_name = "PATH")]
        file: Option<std::path::PathBuf>,
        /// Platform of the export: healthkit or health-connect (default: detected)
        #[arg(long)]
        platform: Option<String>,
        /// Sync even if a sync completed within the last minute
        #[arg(long)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log or undo glasses of water
    Water {
        #[command(subcommand)]
        command: AdjustCommands,
    },
    /// Log or undo mindfulness minutes
    Mindful {
        #[command(subcommand)]
        command: AdjustCommands,
    },
    /// Delete the record for a date
    Delete {
        /// Date (YYYY-MM-DD or today/yesterday)
        date: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the current streak of synced days
    Streak {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage daily goals
    Goals {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Show today's widget snapshot (progress against goals)
    Widget {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
    /// Check that a vitals server is reachable
    Ping {
        /// Server address, e.g. 192.168.1.20:8080
        url: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AdjustCommands {
    /// Add to today's total
    Add {
        /// Glasses of water or minutes
        #[arg(default_value = "1")]
        amount: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove from today's total (never below zero)
    Remove {
        /// Glasses of water or minutes
        #[arg(default_value = "1")]
        amount: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GoalCommands {
    /// Show daily goals
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one or more daily goals
    Set {
        /// Daily step goal
        #[arg(long)]
        steps: Option<i64>,
        /// Daily water goal in ml
        #[arg(long)]
        water: Option<i64>,
        /// Daily mindfulness goal in minutes
        #[arg(long)]
        mindful: Option<i64>,
        /// Nightly sleep goal in hours
        #[arg(long)]
        sleep: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore the default goals
    Reset {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let serving = matches!(cli.command, Commands::Serve { .. });
    init_logging(if serving { "info" } else { "warn" });

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Ping { url, json } = &cli.command {
        return cmd_ping(url, *json).await;
    }

    let config = Config::load()?;
    let svc = HealthService::new(&config.db_path)?;
    let user = match cli.user {
        Some(u) => u,
        None => svc.store().get_or_create_user_id()?,
    };

    match cli.command {
        Commands::Today { json } => cmd_show(&svc, &user, None, json),
        Commands::Show { date, json } => cmd_show(&svc, &user, date, json),
        Commands::History { days, json } => cmd_history(&svc, &user, days, json),
        Commands::Log {
            metrics,
            date,
            json,
        } => cmd_log(&svc, &user, metrics, date, json),
        Commands::Sync {
            file,
            platform,
            force,
            json,
        } => cmd_sync(&svc, &user, file, platform, force, json),
        Commands::Water { command } => match command {
            AdjustCommands::Add { amount, json } => cmd_water_add(&svc, &user, amount, json),
            AdjustCommands::Remove { amount, json } => {
                cmd_water_remove(&svc, &user, amount, json)
            }
        },
        Commands::Mindful { command } => match command {
            AdjustCommands::Add { amount, json } => cmd_mindful_add(&svc, &user, amount, json),
            AdjustCommands::Remove { amount, json } => {
                cmd_mindful_remove(&svc, &user, amount, json)
            }
        },
        Commands::Delete { date, json } => cmd_delete(&svc, &user, date, json),
        Commands::Streak { json } => cmd_streak(&svc, &user, json),
        Commands::Goals { command } => match command {
            GoalCommands::Show { json } => cmd_goals_show(&svc, json),
            GoalCommands::Set {
                steps,
                water,
                mindful,
                sleep,
                json,
            } => cmd_goals_set(&svc, steps, water, mindful, sleep, json),
            GoalCommands::Reset { json } => cmd_goals_reset(&svc, json),
        },
        Commands::Widget { json } => cmd_widget(&svc, &user, json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            server::start_server(svc, port, &bind, api_key, new_api_key).await
        }
        Commands::Ping { .. } => Ok(()),
    }
}
