//! Configuration files driving real endpoints.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::*;
use wccp_core::config::{Level, Role};
use wccp_core::{load_services, WccpConfig};

const CONFIG: &str = r#"
routers = ["10.0.0.1"]
security = { option = "md5", key = "lab-key" }

[daemon]
role = "cache"
address = "10.0.0.2"

[[services]]
id = 80
type = "dynamic"
protocol = 6
primary-hash = "src_ip"
ports = [80, 8080]

[[services]]
id = 91
type = "dynamic"
primary-hash = "dst_ip"
ports = [443]
"#;

/// Write `text` to a fresh file under the temp dir.
fn write_config(name: &str, text: &str) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("wccp-it-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.toml");
    std::fs::write(&path, text)?;
    Ok(path)
}

#[test]
fn test_config_file_defines_cache_groups() -> Result<()> {
    let path = write_config("groups", CONFIG)?;
    let (config, doc) = WccpConfig::load_from(&path)?;
    assert_eq!(config.daemon.role, Role::Cache);
    assert_eq!(config.daemon.address, CACHE_A);
    assert_eq!(config.daemon.port, 2048);

    let load = load_services(&doc);
    assert_eq!(load.services.len(), 1, "service without a protocol is dropped");
    assert_eq!(load.diagnostics.max_level(), Some(Level::Fatal));
    assert!(load.diagnostics.contains_code(23));
    assert!(load.diagnostics.contains_code(8), "missing protocol reported");

    let mut cache = CacheEndpoint::new(config.daemon.address, Default::default());
    assert_eq!(cache.load_services(&load), 1);
    let g = cache.group(80).context("group 80 not defined")?;
    assert_eq!(g.seeds.len(), 1);
    assert_eq!(g.seeds[0].addr, ROUTER);
    assert_eq!(&g.data.svc.ports()[..2], &[80, 8080]);
    assert!(cache.group(91).is_none());

    let _ = std::fs::remove_dir_all(path.parent().context("no parent")?);
    Ok(())
}

#[test]
fn test_config_loaded_endpoints_converge() -> Result<()> {
    let path = write_config("converge", CONFIG)?;
    let (_, doc) = WccpConfig::load_from(&path)?;
    let load = load_services(&doc);

    let mut cache = CacheEndpoint::new(CACHE_A, Default::default());
    cache.load_services(&load);
    let mut router = RouterEndpoint::new(ROUTER, Default::default());
    assert_eq!(router.load_services(&load), 1);

    let mut net = Net::new(T0);
    net.caches.push(cache);
    net.routers.push(router);
    net.run(40);
    assert!(net.rejected.is_empty(), "rejected: {:?}", net.rejected);

    let stored = &net.router(ROUTER).group(80).context("no group")?.data.assignment;
    assert!(stored.is_active());
    assert_eq!(stored.hash().caches, vec![CACHE_A]);

    let _ = std::fs::remove_dir_all(path.parent().context("no parent")?);
    Ok(())
}

#[test]
fn test_missing_config_yields_defaults_and_malformed_fails() -> Result<()> {
    let missing = std::env::temp_dir().join("wccp-it-does-not-exist/config.toml");
    let (config, doc) = WccpConfig::load_from(&missing)?;
    assert_eq!(config.daemon.role, Role::Cache);
    assert!(doc.is_empty());

    let path = write_config("malformed", "[daemon\nrole = ")?;
    assert!(WccpConfig::load_from(&path).is_err());
    let _ = std::fs::remove_dir_all(path.parent().context("no parent")?);
    Ok(())
}
