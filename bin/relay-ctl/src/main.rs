use anyhow::{Context, Result};
use clap::Parser;
use hyper::Method;
use relay_control::{CloudflareClient, RelayConfig};
use relay_core::{EndpointRegistry, EndpointStore};
use relay_proxy::{EndpointProber, ProxyDispatcher};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::init as tracing_init;

mod args;

use args::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let args = Args::parse();

    if let Command::Config = args.cmd {
        return show_config(args.config.as_deref());
    }

    let config = RelayConfig::load(args.config.as_deref())?;
    let client = Arc::new(CloudflareClient::new(&config)?);
    let store = EndpointStore::new(config.store_path());
    let registry = Arc::new(EndpointRegistry::new(client, store)?);

    match args.cmd {
        Command::Create { count } => {
            let created = registry.create(count).await?;
            println!("Created {} endpoints:", created.len());
            for endpoint in created {
                println!("  {}  {}", endpoint.id, endpoint.public_url);
            }
        }
        Command::List => {
            let endpoints = registry.list().await;
            if endpoints.is_empty() {
                println!("No endpoints. Run `relay-ctl create` first.");
            } else {
                println!("{} endpoints:", endpoints.len());
                for endpoint in endpoints {
                    println!(
                        "  {}  {}  {:?}  created {}",
                        endpoint.id,
                        endpoint.public_url,
                        endpoint.status,
                        endpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    );
                }
            }
        }
        Command::Sync => {
            let report = registry.sync().await?;
            if report.is_empty() {
                println!("Registry already in sync.");
            } else {
                println!(
                    "Sync: {} added, {} removed, {} updated",
                    report.added.len(),
                    report.removed.len(),
                    report.updated.len()
                );
                for id in &report.added {
                    println!("  + {}", id);
                }
                for id in &report.removed {
                    println!("  - {}", id);
                }
                for id in &report.updated {
                    println!("  ~ {}", id);
                }
            }
        }
        Command::Test { url, method, timeout } => {
            let method = Method::try_from(method.as_str())
                .with_context(|| format!("invalid HTTP method: {}", method))?;
            let dispatcher = ProxyDispatcher::new(registry.clone());
            let prober = EndpointProber::new(dispatcher, Duration::from_secs(timeout));

            let results = prober.probe_all(&url, method).await;
            if results.is_empty() {
                println!("No endpoints to test. Run `relay-ctl create` first.");
                return Ok(());
            }

            let mut origins: HashSet<String> = HashSet::new();
            for result in &results {
                match (&result.status, &result.error) {
                    (Some(status), None) => {
                        println!("  {}  {}", result.endpoint_id, status);
                        if let Some(body) = &result.body {
                            if let Ok(text) = std::str::from_utf8(body) {
                                origins.insert(text.trim().to_string());
                            }
                        }
                    }
                    (_, Some(error)) => println!("  {}  FAILED: {}", result.endpoint_id, error),
                    _ => {}
                }
            }

            let ok = results.iter().filter(|r| r.is_success()).count();
            println!("{}/{} endpoints reachable", ok, results.len());
            if origins.len() > 1 {
                println!("{} distinct origin responses observed", origins.len());
            }
        }
        Command::Cleanup => {
            let deleted = registry.cleanup().await?;
            println!("Deleted {} endpoints.", deleted);
        }
        Command::Config => unreachable!("handled above"),
    }

    Ok(())
}

fn show_config(explicit: Option<&std::path::Path>) -> Result<()> {
    match RelayConfig::load(explicit) {
        Ok(config) => {
            match &config.source {
                Some(path) => println!("Credentials loaded from {}", path.display()),
                None => println!("Credentials loaded from environment"),
            }
            println!("Account: {}", config.account_id);
            println!("Registry file: {}", config.store_path().display());
        }
        Err(e) => {
            println!("No usable credentials: {}", e);
            println!();
            println!("Either set RELAY_API_TOKEN and RELAY_ACCOUNT_ID, or create");
            println!("edgerelay.json with:");
            println!("  {{\"cloudflare\": {{\"api_token\": \"...\", \"account_id\": \"...\"}}}}");
        }
    }
    Ok(())
}
