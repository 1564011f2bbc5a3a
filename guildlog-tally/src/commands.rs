//! Subcommand implementations
//!
//! Each command returns a JSON value; `main` prints it.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use guildlog_common::aggregation::Strategy;
use guildlog_common::allocation::allocate_raw_shares;
use guildlog_common::config::TallyConfig;
use guildlog_common::db;
use guildlog_common::distribution::{plan_distribution, DistributionRequest, EngineContext};
use guildlog_common::matcher::resolve_participant;
use guildlog_common::models::{
    CatalogSnapshot, DirectorySnapshot, RawShareInput, SessionId, UserId, Weight,
};
use guildlog_common::normalize::AliasRules;
use guildlog_common::quick_add::{parse_quick_add, plan_quick_add};
use guildlog_common::refinery::{convert_inputs, RecipeBook};
use guildlog_common::tax::TaxSnapshot;
use guildlog_common::Error;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Everything an engine call reads, fetched once per command
struct Snapshots {
    catalog: CatalogSnapshot,
    directory: DirectorySnapshot,
    tax: TaxSnapshot,
    aliases: AliasRules,
    recipes: RecipeBook,
}

impl Snapshots {
    async fn load(pool: &SqlitePool, config: &TallyConfig) -> Result<Self> {
        let mut tax = db::load_tax_snapshot(pool).await?;
        if config.tax.enabled {
            // Local config forces tax on with its own rate
            tax.config = config.tax;
        }
        Ok(Self {
            catalog: db::load_catalog(pool).await?,
            directory: db::load_directory(pool).await?,
            tax,
            aliases: config.alias_rules()?,
            recipes: config.recipe_book(),
        })
    }

    fn context(&self) -> EngineContext<'_> {
        EngineContext {
            catalog: &self.catalog,
            directory: &self.directory,
            tax: &self.tax,
            aliases: &self.aliases,
            recipes: &self.recipes,
        }
    }
}

async fn open(db_path: &Path) -> Result<SqlitePool> {
    info!("Database path: {}", db_path.display());
    db::init_database(db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}

/// `NAME` or `NAME=WEIGHT`; the split is at the last `=`
pub fn parse_share(raw: &str) -> Result<(String, Option<f64>)> {
    match raw.rsplit_once('=') {
        Some((name, weight)) => {
            let name = name.trim();
            if name.is_empty() {
                bail!("Missing name in share '{}'", raw);
            }
            let weight: f64 = weight
                .trim()
                .trim_end_matches('%')
                .parse()
                .with_context(|| format!("Invalid weight in share '{}'", raw))?;
            Ok((name.to_string(), Some(weight)))
        }
        None if raw.trim().is_empty() => Err(anyhow!("Empty share")),
        None => Ok((raw.trim().to_string(), None)),
    }
}

/// Shares as raw weights; an unweighted list becomes an even split
pub fn raw_shares(shares: &[String]) -> Result<RawShareInput> {
    let parsed = shares.iter().map(|s| parse_share(s)).collect::<Result<Vec<_>>>()?;
    let weighted = parsed.iter().filter(|(_, w)| w.is_some()).count();
    if weighted != 0 && weighted != parsed.len() {
        bail!("Either every share carries a weight or none does");
    }
    let mut input = RawShareInput::default();
    for (name, weight) in parsed {
        input.push(name, weight.unwrap_or(1.0));
    }
    Ok(input)
}

pub async fn init(db_path: &Path) -> Result<Value> {
    let pool = open(db_path).await?;
    let version = db::get_schema_version(&pool).await?;
    Ok(json!({
        "database": db_path.display().to_string(),
        "schema_version": version,
    }))
}

pub async fn resolve(db_path: &Path, config: &TallyConfig, name: &str, participant: bool) -> Result<Value> {
    let pool = open(db_path).await?;
    let snapshots = Snapshots::load(&pool, config).await?;
    let value = if participant {
        serde_json::to_value(resolve_participant(name, &snapshots.directory))?
    } else {
        serde_json::to_value(snapshots.context().resolve_resource(name))?
    };
    Ok(value)
}

/// Split by plain names, without a member directory
fn allocate_by_name(total: u64, input: &RawShareInput) -> Result<Value> {
    let weights: Vec<(String, Weight)> = input
        .entries
        .iter()
        .filter_map(|(name, raw)| raw.interpret().map(|w| (name.clone(), w)))
        .collect();
    let allocation = guildlog_common::allocation::allocate(total, &weights)?;
    let shares: Vec<Value> = allocation
        .iter()
        .map(|(name, share)| json!({ "name": name, "share": share }))
        .collect();
    Ok(json!({ "total": total, "shares": shares }))
}

pub async fn allocate(db_path: Option<&Path>, total: u64, shares: &[String]) -> Result<Value> {
    let input = raw_shares(shares)?;
    match db_path {
        None => allocate_by_name(total, &input),
        Some(path) => {
            let pool = open(path).await?;
            let directory = db::load_directory(&pool).await?;
            let split = allocate_raw_shares(total, &input, &directory)?;
            if !split.needs_attention.is_empty() {
                warn!("{} name(s) need manual resolution", split.needs_attention.len());
            }
            Ok(serde_json::to_value(split)?)
        }
    }
}

pub fn refine(
    config: &TallyConfig,
    recipe_name: &str,
    input: Option<u64>,
    ingredients: &[String],
    discounted: bool,
) -> Result<Value> {
    let book = config.recipe_book();
    let recipe = book
        .find(recipe_name)
        .ok_or_else(|| Error::AmbiguousRecipe(format!("Unknown recipe '{}'", recipe_name)))?;

    let available: Vec<(String, u64)> = match input {
        Some(quantity) => {
            if !recipe.is_single_input() {
                bail!(
                    "'{}' needs {} ingredients; pass them with --ingredient",
                    recipe.name,
                    recipe.inputs.len()
                );
            }
            vec![(recipe.inputs[0].resource.clone(), quantity)]
        }
        None => ingredients
            .iter()
            .map(|raw| {
                let (name, qty) = raw
                    .rsplit_once('=')
                    .ok_or_else(|| anyhow!("Expected NAME=QTY, got '{}'", raw))?;
                let qty: u64 = qty
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid quantity in '{}'", raw))?;
                Ok((name.trim().to_string(), qty))
            })
            .collect::<Result<_>>()?,
    };

    let outcome = convert_inputs(&available, recipe, discounted)?;
    Ok(json!({
        "recipe": recipe.name,
        "output": recipe.output,
        "discounted": discounted,
        "outcome": outcome,
    }))
}

pub async fn quick_add(db_path: &Path, config: &TallyConfig, text: &str, submitter: i64) -> Result<Value> {
    let items = parse_quick_add(text)?;
    let pool = open(db_path).await?;
    let snapshots = Snapshots::load(&pool, config).await?;
    let plan = plan_quick_add(&items, UserId(submitter), &snapshots.context())?;
    if plan.needs_attention() {
        warn!("Quick-add has entries that need manual resolution");
    }
    Ok(serde_json::to_value(plan)?)
}

#[derive(Debug)]
pub struct DistributeOptions {
    pub sessions: Vec<i64>,
    pub resource: String,
    pub strategy: Strategy,
    pub recipe: Option<String>,
    pub discounted: bool,
    pub record: bool,
    pub force: bool,
}

pub async fn distribute(db_path: &Path, config: &TallyConfig, options: DistributeOptions) -> Result<Value> {
    let pool = open(db_path).await?;
    let snapshots = Snapshots::load(&pool, config).await?;

    let request = DistributionRequest {
        session_ids: options.sessions.into_iter().map(SessionId).collect(),
        resource: options.resource,
        strategy: options.strategy,
        recipe: options.recipe,
        discounted: options.discounted,
    };
    let sessions = db::load_sessions(&pool, &request.session_ids).await?;
    let plan = plan_distribution(&request, &sessions, &snapshots.context())?;

    if !options.record {
        let exists = db::distribution_exists(&pool, &plan.key).await?;
        return Ok(json!({ "plan": plan, "already_recorded": exists }));
    }

    if plan.total_distributed == 0 {
        warn!("Not recorded: {} distributes nothing", plan.key);
        return Ok(json!({ "plan": plan, "recorded": null, "skipped": "nothing to distribute" }));
    }

    match db::record_distribution(&pool, &plan, options.force).await {
        Ok(recorded) => Ok(json!({ "plan": plan, "recorded": recorded })),
        Err(Error::DuplicateDistribution { key }) => {
            warn!("Not recorded: {} was already distributed (use --force to replace)", key);
            Ok(json!({ "plan": plan, "recorded": null, "duplicate_of": key }))
        }
        Err(e) => Err(e.into()),
    }
}
