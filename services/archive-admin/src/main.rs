//! Observation archive administration tool.
//!
//! Initialises, wipes and inspects an archive database over any of the
//! supported backends.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use storage::connection::ColTy;
use storage::Archive;

#[derive(Parser, Debug)]
#[command(name = "archive-admin")]
#[command(about = "Administration tool for the observation archive")]
struct Args {
    /// Archive connection URL (sqlite:, postgresql:, mysql:)
    #[arg(short, long, env = "ARCHIVE_URL")]
    url: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create missing tables and seed the default report networks
    Init,
    /// Drop every archive table and re-initialise from scratch
    Wipe {
        /// Required to confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Print schema version, row counts and report networks
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let archive = Archive::connect(&args.url).await?;

    match args.command {
        Command::Init => {
            archive.init().await?;
            info!("archive initialised");
        }
        Command::Wipe { yes } => {
            if !yes {
                anyhow::bail!("refusing to wipe without --yes");
            }
            archive.reset().await?;
            info!("archive wiped and re-initialised");
        }
        Command::Info => {
            print_info(&archive).await?;
        }
    }

    Ok(())
}

const COUNTED_TABLES: &[&str] = &[
    "repinfo",
    "station",
    "levtr",
    "station_data",
    "data",
    "attr",
    "station_attr",
];

async fn print_info(archive: &Archive) -> Result<()> {
    let conn = archive.connection();

    match archive.schema_version().await? {
        Some(v) => println!("schema version: {}", v),
        None => {
            println!("archive is not initialised");
            return Ok(());
        }
    }

    println!();
    println!("table counts:");
    for table in COUNTED_TABLES {
        let rows = conn
            .query(
                &format!("SELECT COUNT(*) FROM {}", table),
                &[],
                &[ColTy::BigInt],
            )
            .await?;
        let count = rows.first().map(|r| r.bigint(0)).transpose()?.unwrap_or(0);
        println!("  {:<14} {}", table, count);
    }

    println!();
    println!("report networks:");
    let mut tx = archive.transaction().await?;
    for entry in tx.report_entries().await? {
        println!(
            "  {:>4}  {:<12} prio {:>5}  {}",
            entry.id, entry.memo, entry.prio, entry.description
        );
    }
    tx.rollback().await?;

    Ok(())
}
