use anyhow::{Context, Result};
use hashroute::RouterConfig;

/// Print the owner of `hash` under the current membership
pub async fn run_owner(config: &RouterConfig, hash: u64) -> Result<()> {
    let registry = config
        .registry
        .create_registry()
        .context("Invalid registry configuration")?;
    let picker = config.picker.create_picker();

    let endpoints = registry
        .list_endpoints(true)
        .await
        .context("Failed to list endpoints")?;

    let Some(owner) = picker.pick(&endpoints, hash) else {
        anyhow::bail!("No endpoints registered");
    };

    println!("Hash:      {}", hash);
    println!("Owner:     {}", owner);
    println!("Picker:    {}", picker.name());
    println!("Endpoints: {}", endpoints.len());
    for endpoint in &endpoints {
        let marker = if *endpoint == owner { "*" } else { " " };
        println!("  {} {}", marker, endpoint);
    }
    Ok(())
}
