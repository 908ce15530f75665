//! shardcache - Administrative tool for the shared entity cache.
//!
//! Dumps cache contents and forces resyncs against the Redis instance
//! configured through the environment. Entities are handled as raw JSON
//! objects keyed by their `id` field.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shardcache::cache::{EntityCache, GuildCache, GuildIdentity, GuildKey, Identity, JsonCodec};
use shardcache::{Config, HashStore, RedisStore, ShardMaintenance, ShardedCache};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "shardcache")]
#[command(about = "Inspect and maintain the shared entity cache", long_about = None)]
struct Cli {
    /// Cache type, e.g. ROLES or USERS
    #[arg(short = 't', long = "type")]
    cache_type: String,

    /// Entities live in per-guild hashes
    #[arg(short, long)]
    guild_scoped: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every entity of the cache type as a JSON object keyed by id
    Dump {
        /// Only this guild (guild-scoped caches)
        #[arg(long)]
        guild: Option<u64>,

        /// Key the output by this JSON field instead of the id, e.g. `name`
        #[arg(long)]
        by: Option<String>,
    },

    /// Print one entity
    Get {
        id: String,

        /// Owning guild (guild-scoped caches)
        #[arg(long)]
        guild: Option<u64>,
    },

    /// Drop everything cached for one shard
    Invalidate { shard: u32 },

    /// Drop one guild's hash on one shard
    DeleteGuild { shard: u32, guild: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardcache=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!("Connecting to Redis...");
    let store: Arc<dyn HashStore> = Arc::new(RedisStore::connect(&config.store_config()).await?);

    if cli.guild_scoped {
        let cache = GuildCache::new(
            &cli.cache_type,
            store,
            GuildIdentity::new(json_id, String::clone, json_guild_id),
            JsonCodec::<Value>::new(),
            &config.cache_config(),
        )?;
        run_guild(&cache, cli.command).await
    } else {
        let cache = EntityCache::new(
            &cli.cache_type,
            store,
            Identity::new(json_id, String::clone),
            JsonCodec::<Value>::new(),
            &config.cache_config(),
        )?;
        run_flat(&cache, cli.command).await
    }
}

async fn run_flat(cache: &EntityCache<String, Value>, command: Commands) -> Result<()> {
    match command {
        Commands::Dump { guild: None, by: None } => print(&cache.as_view().await?),
        Commands::Dump { guild: None, by: Some(field) } => {
            print(&cache.as_named_view(&named_by(field)).await?)
        }
        Commands::Get { id, guild: None } => print(&cache.get(&id).await?),
        Commands::Invalidate { shard } => {
            cache.invalidate(shard).await?;
            info!("Invalidated {} on shard {}", ShardMaintenance::cache_type(cache), shard);
            Ok(())
        }
        Commands::Dump { .. } | Commands::Get { .. } => anyhow::bail!("--guild requires --guild-scoped"),
        Commands::DeleteGuild { .. } => anyhow::bail!("delete-guild requires --guild-scoped"),
    }
}

async fn run_guild(cache: &GuildCache<String, Value>, command: Commands) -> Result<()> {
    match command {
        Commands::Dump { guild: Some(guild), by: None } => print(&cache.guild_view(guild).await?),
        Commands::Dump { guild: Some(guild), by: Some(field) } => {
            print(&cache.guild_named_view(guild, &named_by(field)).await?)
        }
        Commands::Dump { guild: None, by: None } => print(&cache.as_view().await?),
        Commands::Dump { guild: None, by: Some(field) } => {
            print(&cache.as_named_view(&named_by(field)).await?)
        }
        Commands::Get { id, guild } => {
            let guild = guild.context("--guild is required for guild-scoped caches")?;
            print(&cache.get(&GuildKey::new(guild, id)).await?)
        }
        Commands::Invalidate { shard } => {
            cache.invalidate(shard).await?;
            info!("Invalidated {} on shard {}", ShardMaintenance::cache_type(cache), shard);
            Ok(())
        }
        Commands::DeleteGuild { shard, guild } => {
            cache.delete_guild(shard, guild).await?;
            Ok(())
        }
    }
}

fn print<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Names an entity by one of its JSON fields.
fn named_by(field: String) -> impl Fn(&Value) -> String + Send + Sync {
    move |entity: &Value| match entity.get(&field) {
        Some(Value::String(name)) => name.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn json_id(entity: &Value) -> String {
    match entity.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

fn json_guild_id(entity: &Value) -> u64 {
    match entity.get("guild_id") {
        Some(Value::String(id)) => id.parse().unwrap_or_default(),
        Some(Value::Number(id)) => id.as_u64().unwrap_or_default(),
        _ => 0,
    }
}
