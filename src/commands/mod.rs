//! CLI command implementations

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::server::PoolServer;
use crate::snapshot::SnapshotSlot;
use crate::spider::probe::HttpNodeProbe;
use crate::spider::resolve::{DnsCountryResolver, SystemResolver};
use crate::spider::{run_crawl, SpiderDeps};

/// Build the spider's production collaborators from configuration
fn build_deps(config: &Config) -> Result<SpiderDeps> {
    let probe = HttpNodeProbe::new(&config.spider).context("Failed to create node probe")?;
    let resolver = SystemResolver::from_system_conf().context("Failed to create DNS resolver")?;
    let countries = DnsCountryResolver::from_system_conf(config.spider.country_zone.clone())
        .context("Failed to create country resolver")?;

    Ok(SpiderDeps {
        probe: Arc::new(probe),
        resolver: Arc::new(resolver),
        countries: Arc::new(countries),
    })
}

fn effective_seeds(config: &Config, seeds_override: Vec<String>) -> Result<Vec<String>> {
    let seeds = if seeds_override.is_empty() {
        config.spider.seeds.clone()
    } else {
        seeds_override
    };
    if seeds.is_empty() {
        bail!("no seed hostnames configured; set KEYMESH_SEEDS or pass --seed");
    }
    Ok(seeds)
}

/// Run one crawl and print the resulting host listing
pub async fn crawl(config: Config, seeds_override: Vec<String>) -> Result<()> {
    let seeds = effective_seeds(&config, seeds_override)?;
    let deps = build_deps(&config)?;

    let snapshot = run_crawl(deps, &seeds).await?;

    for name in &snapshot.sorted {
        let Some(node) = snapshot.get(name) else {
            continue;
        };
        let version = node
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| String::from("-"));
        println!("{name} keys={} version={version}", node.keycount);
    }
    println!(
        "{} hosts, {} addresses",
        snapshot.host_count(),
        snapshot.ip_country_map.len()
    );
    Ok(())
}

/// Run the periodic crawl loop and the query service
pub async fn serve(config: Config, seeds_override: Vec<String>) -> Result<()> {
    let seeds = effective_seeds(&config, seeds_override)?;
    let slot = Arc::new(SnapshotSlot::new());
    let server = PoolServer::new(&config, slot.clone())?;

    let interval = config.crawl_interval();
    let crawl_config = config.clone();
    tokio::spawn(async move {
        loop {
            match build_deps(&crawl_config) {
                Ok(deps) => match run_crawl(deps, &seeds).await {
                    Ok(snapshot) => {
                        info!(hosts = snapshot.host_count(), "publishing snapshot");
                        slot.publish(snapshot);
                    }
                    Err(err) => error!(error = %err, "crawl failed"),
                },
                Err(err) => error!(error = %err, "could not build crawl collaborators"),
            }
            tokio::time::sleep(interval).await;
        }
    });

    server.run().await?;
    Ok(())
}
