//! Tests for loading router configuration from disk

use hashroute::{
    Closer, PickerConfig, RegistryConfig, Router, RouterConfig, RouterOptions, Runner,
    TransportConfig,
};
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_load_from_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("hashroute.toml");
    std::fs::write(
        &path,
        r#"
node_addr = "127.0.0.1:7100"
connect_timeout_ms = 750

[picker]
algorithm = "hash_ring"

[registry]
backend = "static"
nodes = ["127.0.0.1:7100", "127.0.0.1:7101"]
"#,
    )
    .unwrap();

    let config = RouterConfig::load(&path).unwrap();
    assert_eq!(config.node_addr, "127.0.0.1:7100");
    assert_eq!(config.connect_timeout(), Duration::from_millis(750));
    assert_eq!(config.picker, PickerConfig::HashRing { factor: 1000 });
    assert_eq!(config.transport, TransportConfig::Tcp);
    assert_eq!(
        config.registry,
        RegistryConfig::static_nodes(vec!["127.0.0.1:7100", "127.0.0.1:7101"])
    );
}

#[test]
fn test_invalid_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[registry]\nbackend = \"zookeeper\"\n").unwrap();

    let err = RouterConfig::load(&path).unwrap_err();
    assert_eq!(err.error_type(), "config");
}

#[test]
fn test_oversized_ring_factor_rejected() {
    let err = RouterConfig::from_toml(
        r#"
[picker]
algorithm = "hash_ring"
factor = 100000

[registry]
backend = "static"
nodes = ["10.1.0.1:9090"]
"#,
    )
    .unwrap_err();
    assert_eq!(err.error_type(), "config");
}

#[tokio::test]
async fn test_router_from_static_config() {
    let config = RouterConfig::from_toml(
        r#"
[picker]
algorithm = "hash_ring"
factor = 16

[registry]
backend = "static"
nodes = ["10.1.0.1:9090", "10.1.0.2:9090"]
"#,
    )
    .unwrap();

    let options = RouterOptions::from_config(&config).unwrap();
    assert_eq!(options.picker.name(), "hash_ring");

    // Client-only: nothing to serve, owners come from the static list
    let router = Router::new("client:0", None, options).await.unwrap();
    let owner = router.owner(99).await.unwrap().unwrap();
    assert!(owner.starts_with("10.1.0."));

    router.close().await.unwrap();
    assert!(router.run(99, vec![]).await.is_err());
}
