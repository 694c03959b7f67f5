use std::net::SocketAddr;

use clap::Parser;
use registry_store::{Registry, DEFAULT_BLOCK_SIZE};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// An OCI/Docker Registry V2 server backed by a block-level deduplicating
/// object store.
#[derive(Parser, Debug)]
#[command(name = "registry-server", version, about)]
struct Cli {
    /// Root directory for blocks/, layers/, manifests/, and uploads/.
    #[arg(long, env = "REGISTRY_REPO_ROOT", default_value = "./data")]
    repo_root: std::path::PathBuf,

    /// Fixed block size, in bytes, used when chunking layer blobs.
    #[arg(long, env = "REGISTRY_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "REGISTRY_LISTEN_ADDRESS", default_value = "[::]:9000")]
    listen_address: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let registry = Registry::open(&cli.repo_root, cli.block_size).await?;
    let app = registry_service::gen_router(registry);

    tracing::info!(
        repo_root = %cli.repo_root.display(),
        block_size = cli.block_size,
        listen_address = %cli.listen_address,
        "starting registry-server"
    );

    let listener = tokio::net::TcpListener::bind(cli.listen_address).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
