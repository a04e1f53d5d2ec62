use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use recall::embedding::{Embedder, HashEmbedder};
use recall::manager::SystemProfile;
use recall::model::DEFAULT_DIM;
use recall::server::MemoryServer;
use recall::MemoryStore;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[clap(long, default_value_t = 50051)]
    port: u16,

    /// Record store path (created if missing)
    #[clap(long, default_value = "memories.redb")]
    db: PathBuf,

    /// Embedding dimension
    #[clap(long, default_value_t = DEFAULT_DIM)]
    dim: usize,
}

fn main() {
    let profile = SystemProfile::detect();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .enable_all()
        .build()
        .expect("failed to build runtime")
        .block_on(async_main(profile));
}

async fn async_main(profile: SystemProfile) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        durability = if profile.strict_durability { "strict" } else { "eventual" },
        "recall starting"
    );

    let store = match MemoryStore::open(&args.db, args.dim, profile.strict_durability) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(db = %args.db.display(), error = %e, "failed to open store");
            std::process::exit(1);
        }
    };

    let loaded = store.size().unwrap_or(0);
    info!(db = %args.db.display(), dim = args.dim, memories = loaded, "store loaded");

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(args.dim));

    let addr = format!("127.0.0.1:{}", args.port);
    let server = match MemoryServer::bind(&addr, store, embedder).await {
        Ok(server) => server,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, "recall listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serving = tokio::spawn(server.serve(shutdown_rx));

    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received, shutting down");

    let _ = shutdown_tx.send(true);
    let _ = serving.await;
    info!("bye");
}
