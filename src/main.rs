//! CLI entry point: `serve` loads one node configuration and runs until
//! signal; `call` issues one RPC and prints the JSON reply (spec §6).
//! Argument parsing is a hand-rolled loop, not a CLI framework, matching
//! the teacher's `parse_args`/`print_usage` style in spirit and spec §1's
//! CLI-parsing non-goal.
//!
//! Library code below this boundary reports typed `thiserror` errors
//! (`error.rs`); here at the binary boundary those are chained through
//! `anyhow::Context` so a startup failure prints its full cause chain,
//! mirroring the teacher's split between its library error types and the
//! `anyhow`-wrapped `main`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use market_node_rt::bootstrap::{register_adapters, register_node_types};
use market_node_rt::bus::EventBus;
use market_node_rt::config::load_node_config;
use market_node_rt::deployer::NodeDeployer;
use market_node_rt::pubsub::InProcessPubSub;
use market_node_rt::registry::NodeRegistry;
use market_node_rt::ws::multiplex::MultiplexClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let code = run(&args).await;
    std::process::exit(code);
}

async fn run(args: &[String]) -> i32 {
    match args.get(1).map(String::as_str) {
        Some("serve") => match args.get(2) {
            Some(config_path) => run_serve(config_path).await,
            None => {
                print_usage();
                1
            }
        },
        Some("call") => match (args.get(2), args.get(3)) {
            (Some(service), Some(rpc)) => run_call(service, rpc).await,
            _ => {
                print_usage();
                1
            }
        },
        _ => {
            print_usage();
            1
        }
    }
}

fn print_usage() {
    println!("market-node-rt - distributed node runtime for trading-data pipelines");
    println!();
    println!("USAGE:");
    println!("    market-node-rt serve <config.yaml>");
    println!("    market-node-rt call <subject> <req_metadata|req_parameters|req_status>");
}

async fn run_serve(config_path: &str) -> i32 {
    match try_run_serve(config_path).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "node runtime failed to start");
            1
        }
    }
}

/// Startup path, chained through `anyhow::Context` so a failure two or
/// three layers down (bad YAML, unregistered node type, node construction)
/// prints with its full cause chain instead of just the innermost error.
async fn try_run_serve(config_path: &str) -> anyhow::Result<()> {
    let config = load_node_config(config_path)
        .with_context(|| format!("loading node config from {config_path}"))?;

    let bus = Arc::new(EventBus::new(Arc::new(InProcessPubSub::new())));
    let multiplex = MultiplexClient::new("wss://stream.example.com", 10);

    register_adapters();
    register_node_types(multiplex).context("registering node types")?;

    let node = NodeRegistry::global()
        .build(config, bus)
        .context("constructing node from config")?;

    let mut deployer = NodeDeployer::new();
    deployer.deploy(node).await.context("starting node")?;

    tracing::info!("node running, waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    tracing::info!("shutting down");
    if let Err(e) = deployer.shutdown().await {
        tracing::warn!(error = %e, "shutdown completed with errors");
    }

    Ok(())
}

async fn run_call(subject: &str, _rpc: &str) -> i32 {
    let bus = EventBus::new(Arc::new(InProcessPubSub::new()));
    let request = serde_json::json!({ "id": 1 });
    match bus
        .call_rpc::<serde_json::Value, serde_json::Value>(subject, &request, Duration::from_secs(5))
        .await
    {
        Ok(response) => {
            println!("{}", response);
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "rpc call failed");
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_args_prints_usage_and_returns_exit_code_1() {
        let args = vec!["market-node-rt".to_string()];
        assert_eq!(run(&args).await, 1);
    }

    #[tokio::test]
    async fn serve_with_missing_config_file_returns_exit_code_1() {
        let args = vec![
            "market-node-rt".to_string(),
            "serve".to_string(),
            "/nonexistent/config.yaml".to_string(),
        ];
        assert_eq!(run(&args).await, 1);
    }
}
