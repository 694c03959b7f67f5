use clap::Parser;
use registry_store::{Defect, Registry, DEFAULT_BLOCK_SIZE};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Standalone, read-only integrity check over a registry's repository root:
/// every block every recipe references must actually be present on disk.
#[derive(Parser, Debug)]
#[command(name = "registry-scrub", version, about)]
struct Cli {
    /// Root directory for blocks/, layers/, manifests/, and uploads/.
    #[arg(long, env = "REGISTRY_REPO_ROOT", default_value = "./data")]
    repo_root: std::path::PathBuf,

    /// Fixed block size, in bytes; only affects index population, not the scrub itself.
    #[arg(long, env = "REGISTRY_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let registry = Registry::open(&cli.repo_root, cli.block_size).await?;

    let (ok, defects) = registry.scrubber.verify().await?;

    for defect in &defects {
        let Defect::BlockMissing { blob_id, fp } = defect;
        println!("BLOCK_MISSING blob={blob_id} fp={fp}");
    }

    if ok {
        println!("scrub clean: no defects");
        Ok(())
    } else {
        anyhow::bail!("scrub found {} defect(s)", defects.len());
    }
}
