use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use conduit_core::ConduitConfig;
use conduit_store::{Database, JobRepository};
use tokio::sync::watch;
use tracing::info;

mod app;
mod http;
mod import;
mod services;

use services::Services;

#[derive(Parser)]
#[command(name = "conduitd", version, about = "On-premise job connector daemon")]
struct Cli {
    /// Path to conduit.toml (falls back to CONDUIT_CONFIG, then ~/.conduit/conduit.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, the remote reconciler and the admin API (default)
    Serve,
    /// Execute one job immediately and print its result
    Run {
        /// Job name
        job: String,
    },
    /// List configured jobs
    Jobs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conduitd=info,conduit_scheduler=info,conduit_remote=info,conduit_plugins=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > CONDUIT_CONFIG env > ~/.conduit/conduit.toml
    let config_path = cli.config.or_else(|| std::env::var("CONDUIT_CONFIG").ok());
    let config = ConduitConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        ConduitConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = Database::open(&db_path).with_context(|| format!("opening {db_path}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let services = Services::build(
        &config,
        db,
        services::default_registry(&config),
        shutdown_rx.clone(),
    )?;
    let imported = import::import_jobs(services.jobs.as_ref(), &config.jobs)?;
    if imported > 0 {
        info!(count = imported, "seed jobs imported from config");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, services, shutdown_tx, shutdown_rx).await,
        Command::Run { job } => {
            let cfg = services
                .jobs
                .find_by_name(&job)?
                .with_context(|| format!("no job named '{job}'"))?;
            let result = services.manager.run_job_now(&cfg).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                anyhow::bail!("job '{job}' finished with {}", result.outcome);
            }
            Ok(())
        }
        Command::Jobs => {
            for job in services.jobs.list()? {
                let every = job
                    .repeat_value
                    .map(|v| format!(" x{v}"))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {:<24} {:<12} {}{}  from {}{}",
                    job.id.unwrap_or_default(),
                    job.name,
                    job.plugin_type,
                    job.repeat_unit,
                    every,
                    job.start_date,
                    if job.active { "" } else { "  (inactive)" },
                );
            }
            Ok(())
        }
    }
}

async fn serve(
    config: ConduitConfig,
    services: Services,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let summary = services.manager.refresh_scheduled_jobs()?;
    info!(
        jobs = summary.jobs_scheduled,
        skipped = summary.jobs_skipped,
        remote = summary.remote_scheduled,
        failed = summary.failed,
        "triggers loaded"
    );

    // scheduler engine loop
    let engine = services.engine.clone();
    let engine_shutdown = shutdown_rx.clone();
    let engine_task = tokio::spawn(async move { engine.run(engine_shutdown).await });

    // remote reconciler, when [remote] is configured
    let reconciler_task = match services.reconciler(&config)? {
        Some(reconciler) => {
            let reconciler_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                reconciler.run(reconciler_shutdown).await
            }))
        }
        None => {
            info!("no [remote] section, remote reconciliation disabled");
            None
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    let state = Arc::new(app::AppState::new(config, &services));
    let router = app::build_router(state);

    info!("conduit admin API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // stop background loops and let in-flight retries notice
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    if let Some(task) = reconciler_task {
        let _ = task.await;
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
