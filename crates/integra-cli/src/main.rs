//! Integra CLI - share a demo object, browse and call services on the LAN.

mod demo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use integra::{Integra, Value};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "integra")]
#[command(about = "Share objects by name on the local network and call them remotely")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Share the demo object until interrupted
    Serve {
        /// Service name to register the demo object under
        #[arg(short, long, default_value = demo::DEFAULT_NAME)]
        name: String,

        /// Only share with processes on this host
        #[arg(long)]
        local_only: bool,

        /// Call server port (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,
    },

    /// Call a method on a named service and print the result as JSON
    Call {
        name: String,
        method: String,

        /// Arguments as JSON values; anything that is not valid JSON is sent as a string
        args: Vec<String>,

        /// Seconds to wait for the call to complete
        #[arg(short, long, default_value = "5")]
        timeout_secs: u64,

        /// Seconds to wait for the service to appear
        #[arg(short, long, default_value = "3")]
        wait_secs: u64,
    },

    /// List services visible on the network
    Browse {
        /// Seconds to listen for announcements
        #[arg(short, long, default_value = "3")]
        wait_secs: u64,
    },

    /// Measure call throughput against a service
    Bench {
        #[arg(default_value = demo::DEFAULT_NAME)]
        name: String,

        #[arg(short, long, default_value = "awesome_method")]
        method: String,

        #[arg(short, long, default_value = "10000")]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides the level chosen by --debug.
    let log_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            name,
            local_only,
            port,
        } => serve(&name, local_only, port).await,
        Command::Call {
            name,
            method,
            args,
            timeout_secs,
            wait_secs,
        } => {
            call(
                &name,
                &method,
                &args,
                Duration::from_secs(timeout_secs),
                Duration::from_secs(wait_secs),
            )
            .await
        }
        Command::Browse { wait_secs } => browse(Duration::from_secs(wait_secs)).await,
        Command::Bench {
            name,
            method,
            count,
        } => bench(&name, &method, count).await,
    }
}

async fn serve(name: &str, local_only: bool, port: u16) -> Result<()> {
    let integra = Integra::builder()
        .local_only(local_only)
        .port(port)
        .build()
        .await
        .context("Failed to start Integra")?;

    integra.register(name, demo::demo_object(name))?;
    info!(
        "Sharing '{}' at {} (Ctrl-C to stop)",
        name,
        integra.advertised_addr()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, withdrawing services");
    integra.shutdown().await;
    Ok(())
}

async fn call(
    name: &str,
    method: &str,
    raw_args: &[String],
    timeout: Duration,
    wait: Duration,
) -> Result<()> {
    let integra = Integra::new().await.context("Failed to start Integra")?;

    let result = async {
        let proxy = integra
            .wait_for_service(name, wait)
            .await?
            .with_timeout(timeout);
        proxy.call(method, parse_args(raw_args)).await
    }
    .await;
    integra.shutdown().await;

    let value = result.with_context(|| format!("Call {}.{} failed", name, method))?;
    println!("{}", serde_json::to_string_pretty(&serde_json::Value::from(value))?);
    Ok(())
}

async fn browse(wait: Duration) -> Result<()> {
    let integra = Integra::new().await.context("Failed to start Integra")?;

    info!("Listening for {:?}...", wait);
    tokio::time::sleep(wait).await;

    let records = integra.remote_services();
    if records.is_empty() {
        println!("No services found");
    }
    for record in records {
        println!(
            "{:<40} {:<22} node {}",
            record.name.as_str(),
            record.socket_addr(),
            record.node
        );
    }

    integra.shutdown().await;
    Ok(())
}

async fn bench(name: &str, method: &str, count: u32) -> Result<()> {
    let integra = Integra::new().await.context("Failed to start Integra")?;
    let proxy = integra.wait_for_service(name, Duration::from_secs(3)).await?;

    let start = Instant::now();
    let mut last = Value::Null;
    for _ in 0..count {
        last = proxy.call(method, vec![]).await?;
    }
    let elapsed = start.elapsed();

    info!("Last {} result: {}", method, last);
    println!(
        "{} calls in {:.2?} ({:.0} calls/s)",
        count,
        elapsed,
        count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    integra.shutdown().await;
    Ok(())
}

/// Interpret each argument as JSON, falling back to a plain string.
fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| match serde_json::from_str::<serde_json::Value>(arg) {
            Ok(json) => Value::from(json),
            Err(_) => Value::from(arg.as_str()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let raw = vec![
            "2".to_string(),
            "2.5".to_string(),
            "\"quoted\"".to_string(),
            "bare".to_string(),
            "[1, true]".to_string(),
        ];
        assert_eq!(
            parse_args(&raw),
            vec![
                Value::Int(2),
                Value::Float(2.5),
                Value::from("quoted"),
                Value::from("bare"),
                Value::List(vec![Value::Int(1), Value::Bool(true)]),
            ]
        );
    }

    #[test]
    fn test_cli_parses_call() {
        let args = Args::parse_from(["integra", "call", "calc", "add", "2", "3", "-t", "1"]);
        match args.command {
            Command::Call {
                name,
                method,
                args,
                timeout_secs,
                ..
            } => {
                assert_eq!(name, "calc");
                assert_eq!(method, "add");
                assert_eq!(args, vec!["2", "3"]);
                assert_eq!(timeout_secs, 1);
            }
            other => panic!("Expected Call, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_serve_defaults() {
        let args = Args::parse_from(["integra", "--debug", "serve", "--local-only"]);
        assert!(args.debug);
        match args.command {
            Command::Serve {
                name,
                local_only,
                port,
            } => {
                assert_eq!(name, demo::DEFAULT_NAME);
                assert!(local_only);
                assert_eq!(port, 0);
            }
            other => panic!("Expected Serve, got: {:?}", other),
        }
    }
}
