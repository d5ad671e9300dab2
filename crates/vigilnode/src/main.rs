use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigilmesh_crypto::resolve_identity;
use vigilmesh_messaging::MemoryTlBus;
use vigilmesh_net::{MemoryDhtHub, MemoryHub};

use vigilnode::config::Config;
use vigilnode::node::Node;

#[derive(Parser)]
#[command(name = "vigilnode", about = "Vigilmesh overlay node")]
struct Args {
    /// Path to the configuration file.
    #[arg(long = "conf")]
    conf: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let conf_path = args.conf.unwrap_or_else(Config::default_path);
    let config = Config::load(&conf_path)?;
    config.check()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    vigilmesh_crypto::init().context("crypto initialisation failed")?;
    let identity = Arc::new(resolve_identity(
        config.identity.generate_new_key,
        config.identity.load_key_from_file.as_deref(),
        config.identity.save_key_to_file.as_deref(),
    )?);

    // This build runs on the in-process transport; a production
    // deployment plugs its own Host/ContentRouting/TlBus here.
    let hub = MemoryHub::new();
    let host = hub.create_host(identity.peer_id()).await;
    let dht = MemoryDhtHub::new().handle_for(identity.peer_id()).await;
    let bus = MemoryTlBus::new();

    let mut node = Node::new(config, identity, host, dht, bus).await?;
    node.start().await?;

    info!(
        peer = %node.local_peer(),
        port = node.listen_port(),
        "connection string: '127.0.0.1:{} {}'",
        node.listen_port(),
        node.local_peer()
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.stop();
    Ok(())
}
