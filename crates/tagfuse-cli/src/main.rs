//! `tagfuse-cli` – process entry point for the onboard pose estimator.
//!
//! 1. Loads `~/.tagfuse/config.toml`, writing the defaults on first run.
//! 2. Builds the field map, the event bus, and the WebSocket bridge that
//!    feeds detector batches and odometry onto the bus.
//! 3. Drives the estimator at the configured cadence until **Ctrl-C**.

mod config;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use tagfuse_middleware::{BusTransport, EventBus, NetBridge};
use tagfuse_perception::FieldMap;
use tagfuse_runtime::{Driver, PoseEstimator};
use tagfuse_types::LocError;

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); TAGFUSE_LOG_FORMAT=json switches to
    // newline-delimited JSON. User-facing output stays on println!.
    let telemetry = tagfuse_runtime::init_tracing("tagfuse");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the estimator …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the process must be killed to stop");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };

    let code = match run(cfg, shutdown) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}: {}", "Fatal".red().bold(), e);
            1
        }
    };
    // Flush spans before exiting; process::exit skips destructors.
    drop(telemetry);
    std::process::exit(code);
}

fn run(cfg: config::Config, shutdown: Arc<AtomicBool>) -> Result<(), LocError> {
    let field_map = Arc::new(cfg.field_map()?);
    let estimator_config = cfg.estimator_config();
    let addr = cfg.listen_addr()?;
    let odometry_topic = cfg.odometry_topic();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| LocError::Transport(format!("failed to start runtime: {e}")))?;

    runtime.block_on(async move {
        let bus = EventBus::new(cfg.bus_capacity);
        let transport = BusTransport::connect(
            bus.clone(),
            &estimator_config.topics(),
            &cfg.pose_topic,
            odometry_topic.as_deref(),
        )?;

        let listener = NetBridge::bind(addr).await?;
        let bridge = NetBridge::new(bus, cfg.pose_topic.clone());
        let server = tokio::spawn(bridge.serve(listener));

        print_summary(&cfg, &field_map);
        info!(
            markers = field_map.len(),
            cameras = cfg.cameras.len(),
            odometry = cfg.odometry,
            "estimator ready"
        );

        let mut driver = Driver::new(PoseEstimator::new(field_map, transport, estimator_config)?);
        let stats = driver.run(cfg.tick_period(), shutdown).await;
        server.abort();

        let counters = driver.estimator().stats();
        println!();
        println!("  {} ticks, {} poses published", stats.ticks, stats.published);
        println!(
            "  {} observations, {} unknown markers, {} degenerate, {} dropped",
            counters.observations, counters.unknown_markers, counters.degenerate, counters.dropped
        );
        if stats.overruns > 0 || counters.publish_failures > 0 {
            println!(
                "  {} overruns (slowest {:?}), {} publish failures",
                stats.overruns.to_string().yellow(),
                stats.slowest_tick,
                counters.publish_failures.to_string().yellow()
            );
        }
        println!("{}", "  ✓ Estimator stopped.".green());
        Ok(())
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn first_run() -> config::Config {
    let cfg = config::Config::default();
    let path = config::config_path();
    println!();
    println!("  No configuration found; using the bench camera and marker.");
    match config::save_to(&cfg, &path) {
        Ok(()) => println!(
            "  {} Defaults written to {}\n",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  __                ____              "#.bold().cyan());
    println!("{}", r#" / /_ ___ _ ___ _  / __/__ __ ___ ___ "#.bold().cyan());
    println!("{}", r#"/ __// _ `// _ `/ / _/ / // /(_-</ -_)"#.bold().cyan());
    println!("{}", r#"\__/ \_,_/ \_, / /_/   \_,_//___/\__/ "#.bold().cyan());
    println!("{}", r#"          /___/                       "#.bold().cyan());
    println!();
    println!("  {} {}",
        "tagfuse".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Fiducial pose estimator");
    println!();
}

fn print_summary(cfg: &config::Config, field_map: &FieldMap) {
    println!("  Bridge      {}", format!("ws://{}", cfg.listen_addr).bold());
    println!("  Publishing  {}", cfg.pose_topic.bold());
    for topic in cfg.source_topics() {
        println!("  Watching    {}", topic.dimmed());
    }
    if let Some(topic) = cfg.odometry_topic() {
        println!("  Odometry    {}", topic.dimmed());
    }
    let ids: Vec<String> = field_map.ids().iter().map(u32::to_string).collect();
    println!("  Field map   marker(s) {}", ids.join(", ").bold());
    println!("  Tick        {} ms", cfg.tick_period().as_millis());
    println!();
}
