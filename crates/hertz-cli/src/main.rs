//! `hertz` – runs a built-in declaration against the simulated controller.
//!
//! The binary:
//!
//! 1. Installs structured logging (`RUST_LOG`, `HERTZ_LOG_FORMAT=json`,
//!    optional OTLP export via `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.hertz/config.toml` (defaults when absent) plus `HERTZ_*`
//!    overrides.  `hertz <demo>` picks the demo for this run;
//!    `hertz --save-config` writes the effective config back to disk.
//! 3. Mounts the chosen demo tree, prints every lifecycle event, and on
//!    **Ctrl-C** tears the whole tree down children-first before exiting.

mod config;
mod demo;

use anyhow::{Context, anyhow};
use colored::Colorize;
use hertz_hal::{PeripheralCatalog, SimDriver};
use hertz_runtime::{Reconciler, init_tracing};
use hertz_types::{NodeEvent, NodePayload};
use tokio::sync::{broadcast, watch};
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Kept alive until exit so buffered spans are flushed.
    let _telemetry = init_tracing("hertz");

    print_banner();

    let mut cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    for arg in std::env::args().skip(1) {
        if arg == "--save-config" {
            let path = config::save(&cfg).map_err(|e| anyhow!(e))?;
            println!("  {} Config saved to {}", "✓".green().bold(), path.display());
            return Ok(());
        }
        cfg.demo = config::DemoKind::parse(&arg)
            .ok_or_else(|| anyhow!("unknown demo `{arg}` (expected blink, follow or motor-velocity)"))?;
    }

    println!(
        "  Demo {} · poll every {} ms · simulated latency {} ms",
        cfg.demo.to_string().bold(),
        cfg.poll_interval_ms,
        cfg.sim_latency_ms
    );
    println!("  Press {} to tear down and exit.\n", "Ctrl-C".bold().cyan());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (stop, shutdown) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – tearing down …".yellow().bold());
        let _ = stop.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful teardown on Ctrl-C will not be available");
    }

    let driver = SimDriver::builder().with_latency(cfg.sim_latency()).build();
    let reconciler = Reconciler::new(
        driver.clone(),
        PeripheralCatalog::with_builtin(),
        cfg.reconciler(),
    );

    let printer = tokio::spawn(print_events(reconciler.events().subscribe()));

    let source = demo::source(cfg.demo, driver, demo::DEMO_PERIOD);
    reconciler
        .run(source, shutdown)
        .await
        .context("reconciliation stopped")?;

    printer.abort();
    println!("{}", "  ✓ All peripherals disposed.".green());
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<NodeEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("  {}", format!("… {skipped} event(s) skipped").dimmed());
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &NodeEvent) {
    let node = format!("{}{}", event.kind, event.node);
    let time = event.timestamp.format("%H:%M:%S%.3f").to_string();
    let line = match &event.payload {
        NodePayload::Ready => format!("{} ready", node.bold()).green(),
        NodePayload::Updated => format!("{} updated", node.bold()).normal(),
        NodePayload::CommandCompleted(name) => format!("{} ran `{name}`", node.bold()).cyan(),
        NodePayload::Failed { stage, error } => {
            format!("{} {stage} failed: {error}", node.bold()).red()
        }
        NodePayload::Disposed => format!("{} disposed", node.bold()).dimmed(),
    };
    println!("  {} {}", time.dimmed(), line);
}

fn print_banner() {
    println!();
    println!("{}", r#"   __ __         __    "#.bold().cyan());
    println!("{}", r#"  / // /__ ____ / /____"#.bold().cyan());
    println!("{}", r#" / _  / -_) __// __/_ /"#.bold().cyan());
    println!("{}", r#"/_//_/\__/_/   \__//__/"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Hertz".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Declarative hardware reconciliation");
    println!();
}
