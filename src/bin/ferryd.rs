use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ferry::cli::DaemonOpts;
use ferry::config::{Endpoint, ServerConfig};
use ferry::{logging, seed, server::Server};

fn build_config(opts: &DaemonOpts) -> Result<ServerConfig> {
    let mut config = match opts.config {
        Some(ref p) => ServerConfig::load(p)?,
        None => ServerConfig::default(),
    };
    if let Some(ref bind) = opts.bind {
        config.bind = Endpoint::parse(bind)?;
    }
    if let Some(ref root) = opts.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    logging::init_logging(opts.verbose.max(1))?;
    let config = build_config(&opts)?;

    if opts.seed {
        let written = seed::seed_samples(&config.root)?;
        for p in &written {
            info!(file = %p.display(), "seeded sample file");
        }
    }

    // Validate root directory exists and is a directory
    if !config.root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", config.root.display());
    }
    if !config.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", config.root.display());
    }

    if config.bind.host == "0.0.0.0" || config.bind.host == "::" {
        warn!("binding to all interfaces; the protocol is unencrypted and unauthenticated");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let server = Server::bind(config).await?;
        info!(addr = %server.local_addr()?, root = %server.root().display(), "serving");
        server
            .run_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    })
}
