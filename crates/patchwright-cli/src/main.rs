mod config;
mod deadletter_cmd;
mod dispatch_cmd;
mod ingest_cmd;
mod retry_cmd;
mod serve_cmd;
mod status_cmd;

use clap::{Parser, Subcommand};

use patchwright_core::contract::AgentRegistry;
use patchwright_db::pool;

use config::PatchwrightConfig;

#[derive(Parser)]
#[command(name = "patchwright", about = "Durable task orchestrator for automated CI failure remediation")]
struct Cli {
    /// Database URL (overrides PATCHWRIGHT_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a patchwright config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/patchwright")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the patchwright database (requires config file or env vars)
    DbInit,
    /// Manually create a build (stand-in for the webhook adapter)
    Ingest {
        /// CI job name
        job: String,
        /// Build number within the job
        build_number: i64,
        /// Branch the build ran on
        branch: String,
        /// Commit SHA the build ran on
        commit_sha: String,
        /// Repository URL
        #[arg(long)]
        repository_url: Option<String>,
    },
    /// Run the worker pool against all pending builds until Ctrl-C
    Dispatch {
        /// Number of independent worker loops
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Per-task agent timeout in seconds
        #[arg(long, default_value_t = 45)]
        timeout: u64,
    },
    /// Show build status and task history (omit build-id to list all builds)
    Status {
        /// Build ID to show status for (omit to list all builds)
        build_id: Option<String>,
    },
    /// Enumerate dead-lettered tasks across all builds
    DeadLetters,
    /// Reset a dead-lettered task back to pending
    Retry {
        /// Task ID to retry
        task_id: String,
        /// Required: confirms the operator override of the retry budget
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP operational surface
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Execute the `patchwright init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `patchwright db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `patchwright db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = PatchwrightConfig::resolve(cli_db_url)?;

    println!("Initializing patchwright database...");

    pool::ensure_database_exists(&resolved.db_config).await?;

    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("patchwright db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Ingest {
            job,
            build_number,
            branch,
            commit_sha,
            repository_url,
        } => {
            let resolved = PatchwrightConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = ingest_cmd::run_ingest(
                &db_pool,
                &job,
                build_number,
                &branch,
                &commit_sha,
                repository_url.as_deref(),
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Dispatch { workers, timeout } => {
            let resolved = PatchwrightConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            // No production agent bodies ship in this repo (see crate docs);
            // an embedding operator registers real agents before dispatching.
            let registry = AgentRegistry::new();
            let result = dispatch_cmd::run_dispatch(&db_pool, registry, workers, timeout).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { build_id } => {
            let resolved = PatchwrightConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, build_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::DeadLetters => {
            let resolved = PatchwrightConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = deadletter_cmd::run_dead_letters(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Retry { task_id, force } => {
            let resolved = PatchwrightConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = retry_cmd::run_retry(&db_pool, &task_id, force).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = PatchwrightConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            serve_cmd::run_serve(db_pool, &bind, port).await?;
        }
    }

    Ok(())
}
