//! `liftlink-cli` – liftlink Command Line Interface
//!
//! The `liftlink` binary brings the whole stack up in one process:
//!
//! 1. Checks for `~/.liftlink/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Starts one connection supervisor per configured device, the elevator
//!    controller, the transit orchestrator and the operator gateway.
//! 3. Drops the operator into an **interactive REPL** (`/help` lists the
//!    commands).
//! 4. Intercepts **Ctrl-C** to publish an operator alert and shut down.

mod app;
mod config;
mod repl;

use std::sync::{Arc, mpsc};
use std::time::Duration;

use colored::Colorize;
use liftlink_middleware::Topic;
use liftlink_runtime::init_tracing;
use liftlink_types::{Event, EventPayload};
use tracing::warn;

use crate::app::App;
use crate::config::{Config, RobotConfig};

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "liftlink failed".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let runtime =
        tokio::runtime::Runtime::new().map_err(|e| format!("failed to start runtime: {e}"))?;
    let _otel = {
        let _guard = runtime.enter();
        init_tracing("liftlink")
    };

    print_banner();

    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    let app = {
        let _guard = runtime.enter();
        Arc::new(App::start(&cfg).map_err(|e| e.to_string())?)
    };

    println!(
        "  Elevator relay board at {}",
        cfg.elevator_record().ws_url().bold()
    );
    println!("  {} robot(s) registered", cfg.robots.len());
    println!(
        "  Gateway on {}  (relay: {}, events: {})",
        format!("http://0.0.0.0:{}", cfg.gateway_port).bold(),
        "/?robotId=<id>".dimmed(),
        "/events".dimmed()
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Shutdown triggers: Ctrl-C or the REPL ending ─────────────────────
    let (quit_tx, quit_rx) = mpsc::channel::<()>();

    let bus = Arc::clone(&app.bus);
    let ctrlc_tx = quit_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        bus.emit(
            Topic::Alerts,
            Event::new(
                "liftlink-cli",
                EventPayload::OperatorAlert("operator interrupted liftlink (Ctrl-C)".into()),
            ),
        );
        println!("{}", "  ✓ Operator alert published to Event Bus.".green());
        let _ = ctrlc_tx.send(());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let repl_app = Arc::clone(&app);
    let handle = runtime.handle().clone();
    std::thread::spawn(move || {
        repl::run(&repl_app, &handle);
        let _ = quit_tx.send(());
    });

    let _ = quit_rx.recv();
    runtime.block_on(app.shutdown());
    runtime.shutdown_timeout(Duration::from_secs(1));
    println!("{}", "  ✓ Exiting liftlink.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      liftlink First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up liftlink.\n");

    let mut cfg = Config::default();

    cfg.elevator.address = prompt_line(
        &format!("  Elevator relay board address [{}]: ", cfg.elevator.address),
        &cfg.elevator.address,
    );
    let port = prompt_line(
        &format!("  Elevator relay board port [{}]: ", cfg.elevator.port),
        &cfg.elevator.port.to_string(),
    );
    if let Ok(p) = port.trim().parse::<u16>() {
        cfg.elevator.port = p;
    }

    let port = prompt_line(
        &format!("  Gateway port [{}]: ", cfg.gateway_port),
        &cfg.gateway_port.to_string(),
    );
    if let Ok(p) = port.trim().parse::<u16>() {
        cfg.gateway_port = p;
    }

    let id = prompt_line("  Register a robot now? Robot id (empty to skip): ", "");
    if !id.is_empty() {
        let public_address = prompt_line("    Public address: ", "");
        let private_address = prompt_line("    Private (LAN) address: ", &public_address);
        let secret = prompt_line("    Shared secret: ", "");
        let map_id = prompt_line("    Map id: ", "");
        cfg.robots.push(RobotConfig {
            id,
            public_address,
            private_address,
            port: liftlink_types::DEFAULT_ROBOT_PORT,
            secret,
            map_id,
            points: Default::default(),
        });
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
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
    println!("{}", r#"   ___ ______  __    _      __  "#.bold().cyan());
    println!("{}", r#"  / (_) _/ /_/ /   (_)__  / /__"#.bold().cyan());
    println!("{}", r#" / / / _/ __/ /__ / / _ \/  '_/"#.bold().cyan());
    println!("{}", r#"/_/_/_/ \__/____//_/_//_/_/\_\ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "liftlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot ↔ elevator connection gateway");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
