//! Line Fix
//!
//! Recomputes the denormalized fields of lines and trunks in a line-core
//! database. Useful after editing rows by hand or restoring a backup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use line_core::logging::{self, LoggingConfig};
use line_core::{db, LineCoreConfig, LineService};

#[derive(Parser, Debug)]
#[command(author, version, about = "Resync line and trunk fields", long_about = None)]
struct Args {
    /// TOML configuration file; LINE_CORE__* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overriding the configuration
    #[arg(long)]
    database_url: Option<String>,

    /// Log level, overriding the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fix a single line
    Line { id: i64 },
    /// Fix a single trunk
    Trunk { id: i64 },
    /// Fix every line and trunk
    All,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("line-fix failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> line_core::Result<()> {
    let mut config = match args.config.as_ref() {
        Some(path) => LineCoreConfig::from_file(path)?,
        None => LineCoreConfig::from_env()?,
    };
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    logging::setup_logging(LoggingConfig::from_settings(&config.logging)?)?;

    let pool = db::connect(&config.database).await?;
    let service = LineService::new(pool);

    match args.command {
        Command::Line { id } => {
            let report = service.fix_line(id).await?;
            info!("Line {}: {:?}", id, report);
        }
        Command::Trunk { id } => {
            let report = service.fix_trunk(id).await?;
            info!("Trunk {}: {:?}", id, report);
        }
        Command::All => {
            let summary = service.fix_all().await?;
            println!(
                "{} of {} lines and {} of {} trunks changed",
                summary.lines_changed,
                summary.lines_checked,
                summary.trunks_changed,
                summary.trunks_checked
            );
        }
    }
    Ok(())
}
