// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! PulseCat - coding-assistant activity monitor
//!
//! Runs the detection plugins, fuses their votes and pushes the result to
//! WebSocket, HTTP, MQTT and console sinks until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pulsecat::middleware::PrivacyLevel;
use pulsecat::{adapters_from_config, build_info, registry_from_config, Config, Engine, VERSION};

/// PulseCat - coding-assistant activity monitor
#[derive(Parser, Debug)]
#[command(name = "pulsecat")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Fuses coding-assistant activity signals into one live status")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with a simulated plugin
    #[arg(long)]
    demo: bool,

    /// WebSocket server port
    #[arg(long)]
    ws_port: Option<u16>,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Privacy level: public, internal or full
    #[arg(long)]
    privacy: Option<String>,

    /// Disable privacy filtering entirely
    #[arg(long)]
    dev_mode: bool,

    /// Print fused events to stdout
    #[arg(long)]
    stdout: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    apply_overrides(&mut config, &args)?;

    // Initialize logging
    let log_level = if args.trace {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("PulseCat v{} - coding-assistant activity monitor", VERSION);
    let build = build_info();
    info!("   Built for {}/{} (features: {})", build.os, build.target, build.features.join(", "));
    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(port) = args.ws_port {
        config.adapters.websocket.port = port;
    }
    if let Some(port) = args.http_port {
        config.adapters.http.port = port;
    }
    if let Some(level) = &args.privacy {
        config.privacy.level = level.parse::<PrivacyLevel>()?;
    }
    if args.dev_mode {
        config.privacy.dev_mode = true;
    }
    if args.stdout {
        config.adapters.stdout.enabled = true;
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let registry = registry_from_config(&config)?;
    info!("Plugins: {}", registry.names().join(", "));

    let mut engine = Engine::new(config.clone(), registry);
    for adapter in adapters_from_config(&config, &engine.handle()) {
        engine.add_adapter(adapter)?;
    }

    engine.start().await?;
    info!("PulseCat running, press Ctrl+C to shutdown");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    engine.stop().await?;
    info!("PulseCat shutdown complete");

    Ok(())
}
