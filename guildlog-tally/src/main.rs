//! guildlog-tally - command-line front end for the allocation engine
//!
//! Resolves names, splits hauls, runs refinery recipes and plans (and
//! optionally records) multi-session distributions against the guild
//! database. Every command prints its result as pretty JSON on stdout;
//! logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guildlog_common::aggregation::Strategy;
use guildlog_common::config::{TallyConfig, CONFIG_ENV_VAR};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Command-line arguments for guildlog-tally
#[derive(Parser, Debug)]
#[command(name = "guildlog-tally")]
#[command(about = "Fair-share allocation and distribution tool for guildlog")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Data folder holding guildlog.db
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Database file, overriding the data folder
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database
    Init,

    /// Resolve a free-text resource or participant name
    Resolve {
        name: String,

        /// Look the name up in the member directory instead of the catalog
        #[arg(long)]
        participant: bool,
    },

    /// Split a quantity by name=weight pairs (fraction, percent or relative)
    Allocate {
        #[arg(long)]
        total: u64,

        /// Recipient, optionally weighted: `paul=60`, `chani=0.4`, `stilgar`
        #[arg(long = "share", value_name = "NAME[=WEIGHT]", required = true)]
        shares: Vec<String>,

        /// Match names against the member directory
        #[arg(long)]
        resolve: bool,
    },

    /// Run input quantities through a refinery recipe
    Refine {
        /// Recipe name or output resource
        #[arg(long)]
        recipe: String,

        /// Quantity of the single input
        #[arg(long, conflicts_with = "ingredient")]
        input: Option<u64>,

        /// Named ingredient for multi-input recipes: `stravidium=9`
        #[arg(long, value_name = "NAME=QTY")]
        ingredient: Vec<String>,

        #[arg(long)]
        discounted: bool,
    },

    /// Parse and split quick-add text
    QuickAdd {
        text: String,

        /// Member credited for entries without names
        #[arg(long)]
        submitter: i64,
    },

    /// Plan a distribution for one or more sessions
    Distribute {
        /// Comma-separated session ids
        #[arg(long, value_delimiter = ',', required = true)]
        sessions: Vec<i64>,

        /// Collected resource
        #[arg(long)]
        resource: String,

        #[arg(long, default_value = "equal")]
        strategy: Strategy,

        /// Refine the collected total before splitting
        #[arg(long)]
        recipe: Option<String>,

        #[arg(long)]
        discounted: bool,

        /// Persist the plan
        #[arg(long)]
        record: bool,

        /// Replace an earlier distribution of the same sessions and resource
        #[arg(long, requires = "record")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildlog_tally=info,guildlog_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    info!("Starting guildlog-tally v{}", env!("CARGO_PKG_VERSION"));

    let config = TallyConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => config.database_path(args.root.as_deref()),
    };

    let output = match args.command {
        Command::Init => commands::init(&db_path).await?,
        Command::Resolve { name, participant } => commands::resolve(&db_path, &config, &name, participant).await?,
        Command::Allocate { total, shares, resolve } => {
            let db = (resolve || args.db.is_some()).then_some(db_path.as_path());
            commands::allocate(db, total, &shares).await?
        }
        Command::Refine {
            recipe,
            input,
            ingredient,
            discounted,
        } => commands::refine(&config, &recipe, input, &ingredient, discounted || config.refinery_discount)?,
        Command::QuickAdd { text, submitter } => commands::quick_add(&db_path, &config, &text, submitter).await?,
        Command::Distribute {
            sessions,
            resource,
            strategy,
            recipe,
            discounted,
            record,
            force,
        } => {
            let options = commands::DistributeOptions {
                sessions,
                resource,
                strategy,
                recipe,
                discounted: discounted || config.refinery_discount,
                record,
                force,
            };
            commands::distribute(&db_path, &config, options).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
