//! lyceumd - gacha and progression engine tools

mod cli;

use anyhow::Result;
use clap::Parser;
use lyceum_shared::{GachaError, HistoryFilter, PoolCatalog, RarityTier};
use lyceumd::{Config, GachaService, MemoryStore, PullRequest};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cli::{Cli, Commands};

/// Experience granted per drawn philosopher in simulations
const SIMULATED_XP_PER_DRAW: u64 = 15;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match cli.command {
        Commands::Rates { pool } => print_rates(&config, &pool)?,
        Commands::Validate { catalog } => {
            if catalog.is_some() {
                config.catalog.path = catalog;
            }
            let catalog = config.catalog()?;
            println!(
                "catalog ok: {} pools, {} items",
                catalog.pools.len(),
                catalog.items.len()
            );
        }
        Commands::Simulate {
            user,
            pool,
            pulls,
            multi,
            seed,
            balance,
        } => simulate(&config, &user, &pool, pulls, multi, seed, balance).await?,
        Commands::InitConfig { path } => Config::save_default(&path)?,
    }

    Ok(())
}

fn print_rates(config: &Config, pool_id: &str) -> Result<()> {
    let catalog = config.catalog()?;
    let pool = catalog.get_pool(pool_id)?;
    println!("{} ({})", pool.name, pool.id);
    println!(
        "  cost {} | multi {} for {} | pity every {} (floor {})",
        pool.cost,
        pool.multi_count,
        pool.multi_pull_cost(),
        pool.pity_threshold,
        pool.pity_floor
    );
    for tier in RarityTier::ALL.iter().rev() {
        println!("  {:<10} {:>6.2}%", tier.as_str(), pool.rates.rate(*tier) * 100.0);
    }
    Ok(())
}

async fn simulate(
    config: &Config,
    user: &str,
    pool_id: &str,
    pulls: u32,
    multi: bool,
    seed: Option<u64>,
    balance: u64,
) -> Result<()> {
    let catalog = Arc::new(config.catalog()?);
    let mut service = GachaService::new(Arc::new(MemoryStore::new()), catalog, config)?;
    if let Some(seed) = seed {
        service = service.with_seed(seed);
    }
    service.progression().grant_currency(user, balance).await?;
    info!(user, pool = pool_id, pulls, multi, "simulation started");

    for n in 1..=pulls {
        let request = if multi {
            PullRequest::multi(user, pool_id)
        } else {
            PullRequest::single(user, pool_id)
        };
        let report = match service.pull(&request).await {
            Ok(report) => report,
            Err(e @ GachaError::InsufficientCurrency { .. }) => {
                println!("pull {}: {}", n, e.user_message());
                break;
            }
            Err(e) => return Err(e.into()),
        };

        for result in &report.outcome.results {
            println!(
                "pull {}: {:<10} {:<22}{}{}",
                n,
                result.tier.as_str(),
                result.item.name,
                if result.is_new { " new" } else { " dup" },
                if result.pity_forced { " (pity)" } else { "" }
            );
        }
        if let Some(incomplete) = &report.outcome.incomplete {
            println!(
                "pull {}: stopped after {} draws ({} remaining): {}",
                n, incomplete.completed, incomplete.remaining, incomplete.message
            );
        }
        for id in &report.unlocked_achievements {
            println!("pull {}: achievement {}", n, id);
        }

        let xp = SIMULATED_XP_PER_DRAW * report.outcome.results.len() as u64;
        service.outbox().enqueue(user, Uuid::new_v4(), xp).await?;
    }

    service.outbox().flush().await;
    let state = service.progression().state(user).await?;
    let pity = service.pity_status(user, pool_id).await?;
    let history = service.history(user, usize::MAX, &HistoryFilter::default()).await?;
    let owned = service.collection(user).await?;

    println!();
    println!("balance:    {}", state.currency_balance);
    println!("level:      {} ({} xp)", state.level, state.experience);
    println!("draws:      {}", history.len());
    println!("collection: {}/{}", owned.len(), service.catalog().items.len());
    println!(
        "pity:       {}/{} ({} until guaranteed)",
        pity.counter, pity.threshold, pity.draws_until_guarantee
    );
    Ok(())
}
