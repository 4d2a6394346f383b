use anyhow::{Context, Result};
use hashroute::{Closer, FnRunner, Router, RouterConfig, RouterOptions, Runner};
use std::sync::Arc;
use tracing::info;

/// Run a node answering every request with `<addr>: <payload>`
pub async fn run_serve(config: &RouterConfig, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.node_addr.clone());
    let options = RouterOptions::from_config(config).context("Invalid router configuration")?;

    let node = addr.clone();
    let handler: Arc<dyn Runner> = Arc::new(FnRunner::new(move |hash, input: Vec<u8>| {
        let node = node.clone();
        async move {
            info!(hash, bytes = input.len(), "Handling request");
            let mut output = format!("{}: ", node).into_bytes();
            output.extend_from_slice(&input);
            Ok(output)
        }
    }));

    let router = Router::new(addr.clone(), Some(handler), options)
        .await
        .with_context(|| format!("Failed to start node at {}", addr))?;
    info!(addr = %addr, "Node running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    router
        .close()
        .await
        .context("Node did not shut down cleanly")?;
    Ok(())
}
