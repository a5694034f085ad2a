//! Real-time market subscription client entry point.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_realtime::api::{create_router, AppState};
use market_realtime::config::Config;
use market_realtime::metrics;
use market_realtime::subscription::payloads::{LiquidityData, MarketStatus, MarketUpdate, OddsUpdate};
use market_realtime::subscription::SubscriptionHandle;
use market_realtime::transport::{ConnectionState, LifecycleEvent};
use market_realtime::utils::shutdown_signal;
use market_realtime::RealtimeClient;

/// Real-time market subscription client.
#[derive(Parser, Debug)]
#[command(name = "market-realtime")]
#[command(about = "Subscribe to live market topics over WebSocket or SSE")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to topics and print updates until Ctrl-C (default).
    Listen {
        /// Topic to subscribe to, e.g. odds.7 (repeatable).
        #[arg(short, long = "topic")]
        topics: Vec<String>,

        /// Use the SSE transport regardless of USE_SSE.
        #[arg(long)]
        sse: bool,

        /// HTTP server port for health/status/metrics.
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Connect, subscribe for a while, and report what arrived.
    WsTest {
        /// Topic to subscribe to (repeatable).
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,

        /// How long to listen.
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("market_realtime=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::WsTest { topics, seconds }) => cmd_ws_test(topics, seconds).await,
        Some(Command::Listen { topics, sse, port }) => cmd_listen(topics, sse, port).await,
        None => cmd_listen(Vec::new(), false, None).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("MARKET REALTIME - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Transport: {}", if config.use_sse { "SSE" } else { "WebSocket" });
    println!("  WebSocket URL: {}", config.realtime_ws_url);
    println!("  SSE URL: {}", config.sse_url());
    println!(
        "  Reconnect: base {}ms, max {}ms, jitter {}ms, {} attempts",
        config.ws_reconnect_base_delay_ms,
        config.ws_reconnect_max_delay_ms,
        config.ws_reconnect_jitter_ms,
        config.ws_reconnect_max_attempts
    );
    println!("  Heartbeat: {}s", config.ws_heartbeat_interval_s);
    println!("  HTTP Port: {}", config.port);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run the client with the HTTP status surface until a shutdown signal.
async fn cmd_listen(topics: Vec<String>, sse: bool, port: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = load_config()?;
    if sse {
        config.use_sse = true;
    }
    if let Some(port) = port {
        config.port = port;
    }

    if metrics::install_prometheus().is_none() {
        metrics::init_metrics();
    }

    let client = RealtimeClient::from_config(&config);
    info!(mode = %client.mode(), "Real-time client started");
    tokio::spawn(log_lifecycle(client.events()));

    let handles: Vec<SubscriptionHandle> = topics
        .iter()
        .map(|topic| subscribe_printer(&client, topic))
        .collect();
    if handles.is_empty() {
        warn!("No topics given; only the HTTP surface is useful. Pass --topic odds.<id>");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(AppState::new(client.clone()));
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;

    for handle in &handles {
        handle.unsubscribe();
    }
    client.shutdown();
    stop_tx.send_replace(true);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Connect, subscribe, and summarise what arrived.
async fn cmd_ws_test(topics: Vec<String>, seconds: u64) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("MARKET REALTIME - TRANSPORT TEST");
    println!("======================================================================");

    let config = load_config()?;
    let client = RealtimeClient::from_config(&config);
    println!("\n1. Connecting ({})...", client.mode());

    let mut state = client.watch_state();
    let connected = tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .map_or(false, |r| r.is_ok());
    if !connected {
        client.shutdown();
        return Err(anyhow::anyhow!("Could not connect within 10 seconds"));
    }
    println!("   Connected!");

    let counter = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let start = Instant::now();
    let handles: Vec<SubscriptionHandle> = topics
        .iter()
        .map(|topic| {
            let counter = std::sync::Arc::clone(&counter);
            let channel = topic.clone();
            client.subscribe(topic, move |data: &Value| {
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                println!(
                    "   [{:.1}s] {}: {}",
                    start.elapsed().as_secs_f64(),
                    channel,
                    data
                );
            })
        })
        .collect();

    println!("\n2. Listening on {} topic(s) for {} seconds...", handles.len(), seconds);
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let final_state = client.state();
    for handle in &handles {
        handle.unsubscribe();
    }
    client.shutdown();

    println!("\n======================================================================");
    println!("TRANSPORT TEST COMPLETE");
    println!(
        "  Messages received: {}",
        counter.load(std::sync::atomic::Ordering::Relaxed)
    );
    println!("  Connection status: {}", final_state);
    println!("======================================================================");

    Ok(())
}

/// Subscribe with a typed printer for known topic families.
fn subscribe_printer(client: &RealtimeClient, topic: &str) -> SubscriptionHandle {
    let channel = topic.to_string();
    let family = topic.split('.').next().unwrap_or_default();

    match family {
        "odds" => client.subscribe_typed(topic, move |updates: Vec<OddsUpdate>| {
            for update in updates {
                info!(
                    channel = %channel,
                    outcome = %update.outcome_id,
                    odds = %update.odds,
                    "Odds update"
                );
            }
        }),
        "liquidity" => client.subscribe_typed(topic, move |data: LiquidityData| {
            let levels = data.depth.as_ref().map(Vec::len).unwrap_or(0);
            info!(channel = %channel, total = %data.total, levels = levels, "Liquidity update");
        }),
        "status" => client.subscribe_typed(topic, move |status: MarketStatus| {
            info!(channel = %channel, status = %status, "Status update");
        }),
        "market" => client.subscribe_typed(topic, move |market: MarketUpdate| {
            info!(
                channel = %channel,
                market = %market.id,
                status = %market.status,
                outcomes = market.outcomes.len(),
                "Market update"
            );
        }),
        _ => client.subscribe(topic, move |data: &Value| {
            info!(channel = %channel, payload = %data, "Update");
        }),
    }
}

async fn log_lifecycle(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::ReconnectsExhausted { attempts }) => {
                error!(attempts = attempts, "Push updates stopped; reconnect budget exhausted");
            }
            Ok(LifecycleEvent::Stopped) => break,
            Ok(event) => info!(event = ?event, "Transport lifecycle"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Lifecycle log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
