use clap::Parser;
use getbatch_cluster::config::NodeConfig;
use getbatch_cluster::node::NodeContext;
use getbatch_cluster::store::memory::MemStore;
use getbatch_cluster::transport::TcpTransport;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "getbatch-node", about = "Storage node serving get-batch requests")]
struct Args {
    /// Path to the node configuration (TOML).
    #[arg(short, long)]
    config: PathBuf,

    /// Overrides `node.id` from the configuration file.
    #[arg(long)]
    node_id: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    // 1. Configuration:
    let mut config = NodeConfig::from_toml_file(&args.config)?;
    if let Some(node_id) = args.node_id {
        config.node.id = node_id;
        config.validate()?;
    }
    let local = config
        .local_node()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("node {} is not in the cluster map", config.node.id))?;

    tracing::info!("Starting node {} (http={}, data={})", local.id, local.http_addr, local.data_addr);

    // 2. Data mover:
    let transport = TcpTransport::new(
        local.id.clone(),
        config.transport.channel_depth,
        config.transport.max_frame_size,
        config.transport.connect_timeout(),
    );
    let data_listener = TcpTransport::bind(local.data_addr).await?;
    transport.serve(data_listener);
    tracing::info!("Data mover listening on {}", local.data_addr);

    // 3. Node components:
    let node = NodeContext::build(config, transport, Arc::new(MemStore::new()))?;
    node.spawn_housekeeping();

    // 4. HTTP server:
    let app = node.app();
    tracing::info!("HTTP server listening on {}", local.http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(local.http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
