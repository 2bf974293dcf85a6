//! `ferry`: run a consumer or talk to a ferry database.
//!
//! Usage:
//!   ferry -c config/dev.yaml serve
//!   ferry -c config/dev.yaml push --app-id demo --url http://127.0.0.1:9000/hook
//!   ferry -c config/dev.yaml check --task-id <id> --token <token>
//!   ferry -c config/dev.yaml poisoned --limit 20

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use ferry_core::app::{CallbackVerifier, ConsumerBuilder, Producer};
use ferry_core::impls::SqliteStore;
use ferry_core::ports::{Clock, LeaseStore, SystemClock, UlidGenerator};
use ferry_core::typed::{HttpTask, TaskCodec, TaskRegistry, TypedTask};

use config::AppConfig;

/// ferry task queue.
#[derive(Parser, Debug)]
#[command(name = "ferry", about = "At-least-once task queue")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short = 'c', long = "config", default_value = "config/dev.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a consumer until ctrl-c.
    Serve,
    /// Submit an HTTP task.
    Push {
        #[arg(long)]
        app_id: String,
        #[arg(long)]
        url: String,
        #[arg(long, value_enum, default_value_t = Method::Get)]
        method: Method,
        /// Request body (POST only).
        #[arg(long, default_value = "")]
        body: String,
        /// Delay in seconds, or an absolute unix timestamp.
        #[arg(long, default_value_t = 0)]
        expect_time: i64,
    },
    /// Verify a callback token (consumes it).
    Check {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        token: String,
    },
    /// List tasks whose retry budget is exhausted.
    Poisoned {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Method {
    Get,
    Post,
}

fn registry() -> anyhow::Result<Arc<TaskRegistry>> {
    let mut registry = TaskRegistry::new();
    registry.register::<HttpTask>()?;
    Ok(Arc::new(registry))
}

fn open_store(config: &AppConfig, registry: Arc<TaskRegistry>) -> anyhow::Result<Arc<SqliteStore>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = SqliteStore::open(
        &config.database.path,
        TaskCodec::new(registry),
        clock,
        config.consumer.lease_window(),
    )
    .with_context(|| format!("open database {}", config.database.path.display()))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let registry = registry()?;
    let store = open_store(&config, registry.clone())?;

    match cli.command {
        Command::Serve => serve(&config, store).await,
        Command::Push {
            app_id,
            url,
            method,
            body,
            expect_time,
        } => {
            let task = match method {
                Method::Get => HttpTask::get(app_id, url),
                Method::Post => HttpTask::post(app_id, url, body),
            }
            .with_expect_time(expect_time);
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let producer = Producer::new(
                config.node_id.clone(),
                store,
                registry,
                Arc::new(UlidGenerator::new(SystemClock)),
                clock,
            );
            let task_id = producer.submit(TypedTask::boxed(task)).await?;
            println!("{task_id}");
            Ok(())
        }
        Command::Check { task_id, token } => {
            let verifier = CallbackVerifier::new(store);
            let verified = verifier.verify(&task_id, &token).await?;
            println!("ok {verified}");
            Ok(())
        }
        Command::Poisoned { limit } => {
            for record in store.poisoned(limit).await? {
                let line = serde_json::json!({
                    "task_id": record.task_id,
                    "app_id": record.app_id,
                    "content": record.content,
                    "error": record.error,
                    "attempts": record.attempts,
                    "max_attempts": record.max_attempts,
                    "owner_id": record.owner_id,
                    "updated_at": record.updated_at,
                });
                println!("{line}");
            }
            Ok(())
        }
    }
}

async fn serve(config: &AppConfig, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let consumer = ConsumerBuilder::new(config.node_id.clone())
        .config(config.consumer.clone())
        .store(store.clone())
        .build()?;
    consumer.start()?;
    info!(node_id = %config.node_id, db = %config.database.path.display(), "serving");

    // confirm されずに残った pop を定期的に戻す
    let stale_pop = config.stale_pop();
    let janitor_store = store.clone();
    let janitor = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stale_pop);
        loop {
            ticker.tick().await;
            match janitor_store.release_stale(stale_pop).await {
                Ok(0) => {}
                Ok(released) => info!(released, "released stale queue pops"),
                Err(e) => tracing::warn!(error = %e, "release of stale queue pops failed"),
            }
        }
    });

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("ctrl-c received, stopping");
    janitor.abort();

    let report = consumer.stop(config.shutdown_timeout()).await?;
    info!(drained = report.drained, reset = report.reset, "bye");
    Ok(())
}
