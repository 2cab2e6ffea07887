use std::time::Instant;

use clap::Parser;
use galdf::config::{configure_thread_pool, Args};
use galdf::data::catalog::CatalogDataHandle;
use galdf::data::environment::EnvironmentDataHandle;
use galdf::data::tree::TreeDataHandle;
use galdf::error::Result;
use galdf::output::PairWriter;
use galdf::pipeline::count_pairs_all;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let start = Instant::now();
    let config = args.pipeline_config()?;

    configure_thread_pool(args.threads);

    let catalog = CatalogDataHandle::new(&args.catalog)?;
    let tree = if config.lineage { Some(TreeDataHandle::new(&args.tree)?) } else { None };
    let environment = EnvironmentDataHandle::new(&args.environment)?;
    let writer = PairWriter::new(&args.writepath, config.compress);

    let written = count_pairs_all(&catalog, tree.as_ref(), Some(&environment), &writer, &config)?;
    info!(
        snapshots = written,
        seconds = start.elapsed().as_secs_f64(),
        "finished counting pairs"
    );
    Ok(())
}
