use anyhow::{Context, Result};
use hashroute::{Closer, Router, RouterConfig, RouterOptions, Runner};

/// Route one request with a client-only router and print the reply
pub async fn run_route(config: &RouterConfig, hash: u64, payload: &str) -> Result<()> {
    let options = RouterOptions::from_config(config).context("Invalid router configuration")?;
    let router = Router::new(config.node_addr.clone(), None, options).await?;

    let result = router.run(hash, payload.as_bytes().to_vec()).await;
    let closed = router.close().await;

    let output = match result {
        Ok(output) => output,
        Err(e) if e.is_retryable() => {
            anyhow::bail!("Routing hash {} failed, retry later: {}", hash, e)
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to route hash {}", hash)),
    };
    closed.context("Failed to close router")?;

    println!("{}", String::from_utf8_lossy(&output));
    Ok(())
}
