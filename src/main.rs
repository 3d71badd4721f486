use caterer_core::config::CatererConfig;
use caterer_core::engine::ProcessEngine;
use caterer_core::front::{HttpFrontEnd, HttpServer};
use caterer_core::pipeline::{Pipeline, WorkerPools};
use caterer_core::session::{ActivityLog, Dispatcher, SessionContext, SessionLimits};
use caterer_rules::SqliteRuleStore;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Simulate cellular automata and serve the results as looping GIFs.
#[derive(Parser, Debug)]
#[command(name = "caterer", version, about)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, host:port
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory for per-request files
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Path of the simulation engine binary
    #[arg(long)]
    engine: Option<PathBuf>,

    /// SQLite database of uploaded rules
    #[arg(long)]
    rule_db: Option<PathBuf>,

    /// Seconds a finished session waits for extend/accelerate
    #[arg(long)]
    wait_secs: Option<u64>,

    /// Compute pool threads (0 = one per core)
    #[arg(long)]
    threads: Option<usize>,
}

impl Args {
    fn into_config(self) -> Result<CatererConfig, String> {
        let mut config = match &self.config {
            Some(path) => CatererConfig::load(path)
                .map_err(|e| format!("Failed to load {}: {}", path.display(), e))?,
            None => CatererConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(dir) = self.artifact_dir {
            config.artifact_dir = dir;
        }
        if let Some(engine) = self.engine {
            config.engine_binary = engine;
        }
        if let Some(db) = self.rule_db {
            config.rule_db = db;
        }
        if let Some(secs) = self.wait_secs {
            config.wait_secs = secs;
        }
        if let Some(threads) = self.threads {
            config.compute_threads = threads;
        }
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: CatererConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.artifact_dir)?;
    let store = SqliteRuleStore::open(&config.rule_db)?;
    let pools = Arc::new(WorkerPools::new(config.compute_threads)?);

    let ctx = SessionContext {
        engine: Arc::new(ProcessEngine::new(&config.engine_binary)),
        pipeline: Arc::new(Pipeline::new(pools)),
        front: Arc::new(HttpFrontEnd::new(config.delivery_limit, config.lookback)),
        activity: Arc::new(ActivityLog::new(config.activity_capacity)),
        limits: SessionLimits::from(&config),
        artifact_dir: config.artifact_dir.clone(),
    };
    let dispatcher = Arc::new(Dispatcher::new(ctx, Arc::new(store.clone())));
    let http = HttpServer::new(dispatcher, store);

    let server = Arc::new(
        tiny_http::Server::http(&config.listen)
            .map_err(|e| format!("Failed to listen on {}: {}", config.listen, e))?,
    );
    info!("Listening on http://{}", config.listen);

    let serving = server.clone();
    let worker = thread::spawn(move || http.serve(&serving));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.unblock();
    if worker.join().is_err() {
        error!("HTTP thread panicked");
    }
    Ok(())
}
