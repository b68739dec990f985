//! kvmap CLI - Demo and admin command line interface
//!
//! Runs persistence scenarios against the in-memory store using the same
//! template stack an application would use against a live cluster.

mod model;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use kvmap_client::{MemoryStore, StoreClient};
use kvmap_common::{Config, Error, Filter, Query, Sort};
use kvmap_mapping::EntityRegistry;
use kvmap_template::AsyncTemplate;
use model::{Person, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kvmap-cli")]
#[command(about = "kvmap demo and admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "KVMAP_CONFIG", default_value = "kvmap.toml")]
    config: PathBuf,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration
    Config,
    /// Versioned save, stale save and duplicate insert walkthrough
    Demo,
    /// Race concurrent writers holding the same version
    Conflict {
        /// Number of concurrent writers
        #[arg(short, long, default_value_t = 8)]
        writers: usize,
        /// Simulated store latency per request (milliseconds)
        #[arg(long, default_value_t = 5)]
        latency_ms: u64,
    },
    /// Bulk insert and query people
    Load {
        /// Number of people to insert
        #[arg(short, long, default_value_t = 100)]
        count: u32,
        /// Minimum age for the query
        #[arg(long, default_value_t = 30)]
        min_age: i64,
        /// Page size for the query
        #[arg(long, default_value_t = 5)]
        limit: u64,
    },
    /// Show refresh-on-read sessions
    Touch,
}

fn build_template(config: &Config, store: MemoryStore) -> Result<(Arc<MemoryStore>, AsyncTemplate)> {
    let registry = EntityRegistry::builder()
        .register::<Person>()?
        .register::<Session>()?
        .build();
    let store = Arc::new(store);
    let client: Arc<dyn StoreClient> = store.clone();
    Ok((store, AsyncTemplate::new(client, registry, config)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // Initialize logging
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo => demo(&config).await?,
        Commands::Conflict {
            writers,
            latency_ms,
        } => conflict(&config, writers, latency_ms).await?,
        Commands::Load {
            count,
            min_age,
            limit,
        } => load(&config, count, min_age, limit).await?,
        Commands::Touch => touch(&config).await?,
    }

    Ok(())
}

async fn demo(config: &Config) -> Result<()> {
    let (store, template) = build_template(config, MemoryStore::new())?;

    let mut dave = Person::new("p1", "Dave", "Matthews", 42);
    template.insert(&mut dave).await?;
    println!("insert      -> version {:?}", dave.version);

    dave.age += 1;
    template.save(&mut dave).await?;
    println!("save        -> version {:?}", dave.version);

    let mut stale = Person {
        version: Some(1),
        firstname: "David".to_string(),
        ..dave.clone()
    };
    match template.save(&mut stale).await {
        Err(e @ Error::OptimisticLock { .. }) => println!("stale save  -> {e}"),
        other => warn!("Unexpected stale save result: {:?}", other),
    }

    let mut duplicate = Person::new("p1", "Carter", "Beauford", 60);
    match template.insert(&mut duplicate).await {
        Err(e @ Error::DuplicateKey { .. }) => println!("dup insert  -> {e}"),
        other => warn!("Unexpected duplicate insert result: {:?}", other),
    }

    let stored = template.find_by_id::<Person>("p1").await?;
    println!("find_by_id  -> {stored:?}");
    println!("requests    -> {}", store.request_count());
    Ok(())
}

async fn conflict(config: &Config, writers: usize, latency_ms: u64) -> Result<()> {
    let store = MemoryStore::new().with_latency(Duration::from_millis(latency_ms));
    let (_, template) = build_template(config, store)?;

    let mut seed = Person::new("contended", "Seed", "Record", 0);
    template.save(&mut seed).await?;

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let mut copy = Person {
                firstname: format!("writer-{i}"),
                ..seed.clone()
            };
            template.spawn(move |t| async move {
                t.save(&mut copy).await?;
                Ok::<_, Error>(copy)
            })
        })
        .collect();

    let (mut wins, mut conflicts) = (0, 0);
    for handle in handles {
        match handle.await {
            Ok(winner) => {
                wins += 1;
                println!("{} won with version {:?}", winner.firstname, winner.version);
            }
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => return Err(e.into()),
        }
    }
    info!("{} writers: {} won, {} conflicted", writers, wins, conflicts);
    println!("wins: {wins}, conflicts: {conflicts}");
    Ok(())
}

async fn load(config: &Config, count: u32, min_age: i64, limit: u64) -> Result<()> {
    let (_, template) = build_template(config, MemoryStore::new())?;

    let mut people: Vec<_> = (0..count)
        .map(|i| Person::new(format!("p{i:05}"), "Person", &format!("No{i}"), i64::from(i % 80)))
        .collect();
    template.insert_all(&mut people).await?;
    println!("stored: {}", template.count::<Person>().await?);

    let query = Query::new(Some(Filter::range("age", min_age, i64::MAX)))
        .with_sort(Sort::asc("age"))
        .with_limit(limit);
    let page: Vec<Person> = template.find(&query).await?.try_collect().await?;
    for person in page {
        println!("{} {} age {}", person.id, person.lastname, person.age);
    }
    Ok(())
}

async fn touch(config: &Config) -> Result<()> {
    let (store, template) = build_template(config, MemoryStore::new())?;

    let mut session = Session {
        id: "s1".to_string(),
        version: None,
        user: "dave".to_string(),
    };
    template.save(&mut session).await?;
    println!("saved       -> version {:?}", session.version);

    for _ in 0..3 {
        if let Some(read) = template.find_by_id::<Session>("s1").await? {
            println!("read        -> version {:?}", read.version);
        }
    }

    let key = kvmap_common::StoreKey::new(template.namespace(), "sessions", "s1");
    if let Some(record) = store.peek(&key) {
        println!("expires in  -> {}s", record.expiration);
    }
    Ok(())
}
