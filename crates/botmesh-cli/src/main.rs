//! `botmesh` – BotMesh Command Line Interface
//!
//! Entry point for a BotMesh deployment:
//!
//! * `botmesh registry` – run the central registry daemon.
//! * `botmesh component <type> <name>` – run a demo drive-base component
//!   that registers with the registry and serves velocity commands.
//!
//! Configuration comes from `~/.botmesh/config.toml` plus `BOTMESH_*`
//! environment overrides. Ctrl-C deregisters cleanly before exiting.

mod config;
mod telemetry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use tracing::{info, warn};

use botmesh_broker::{ComponentContext, HookRunner, NotificationHooks};
use botmesh_dispatch::{Catalog, Dispatcher};
use botmesh_net::{ComponentSession, RegistryServer, SessionConfig};
use botmesh_registry::Registry;
use botmesh_types::{
    ComponentIdentity, ComponentInfo, Constraint, Credentials, MeshError, TypeTag, Value,
};

fn main() {
    // Hold the guard for the entire process; dropping it flushes spans.
    let _telemetry = telemetry::init_tracing("botmesh");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!("  No config file found; using defaults.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Shared shutdown flag, set from the Ctrl-C handler ─────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start runtime".red());
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("registry") | None => runtime.block_on(run_registry(cfg, shutdown)),
        Some("component") => {
            let (component_type, name) = match (args.get(1), args.get(2)) {
                (Some(t), Some(n)) => (t.clone(), n.clone()),
                _ => {
                    print_usage();
                    std::process::exit(2);
                }
            };
            runtime.block_on(run_component(cfg, component_type, name, shutdown))
        }
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {e}", "Error".red().bold());
        std::process::exit(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry daemon
// ─────────────────────────────────────────────────────────────────────────────

async fn run_registry(cfg: config::Config, shutdown: Arc<AtomicBool>) -> Result<(), MeshError> {
    let registry = Registry::new(cfg.liveness());
    let server = RegistryServer::new(Arc::clone(&registry));
    let bind_addr = format!("{}:{}", cfg.registry_host, cfg.registry_port);
    let (listener, addr) = RegistryServer::bind(&bind_addr).await?;

    println!(
        "  {} registry listening on {}",
        "✓".green().bold(),
        format!("ws://{addr}").bold()
    );
    println!(
        "  probe interval {} ms, down after {} missed probes\n",
        cfg.heartbeat_interval_ms, cfg.missed_probe_limit
    );

    let server_task = tokio::spawn(server.serve(listener));

    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    server_task.abort();
    registry.shutdown();
    println!("  {} registry stopped.", "✓".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo drive-base component
// ─────────────────────────────────────────────────────────────────────────────

/// Commanded velocities of the demo drive base. Shared between handlers
/// through the dispatcher's closures; there is no global state.
#[derive(Debug, Default, Clone, Copy)]
struct DriveState {
    forward: f64,
    turn: f64,
}

fn drive_dispatcher(component_type: &str) -> Result<Dispatcher, MeshError> {
    let state = Arc::new(std::sync::Mutex::new(DriveState::default()));
    let catalog = Catalog::new()
        .method("setVels", vec![TypeTag::Float, TypeTag::Float])
        .method("getVels", vec![])
        .method("stop", vec![]);
    let mut dispatcher = Dispatcher::new(component_type, catalog);

    let set_state = Arc::clone(&state);
    dispatcher.bind(
        "setVels",
        &[TypeTag::Float, TypeTag::Float],
        Arc::new(move |args| match (&args[0], &args[1]) {
            (Value::Float(forward), Value::Float(turn)) => {
                let mut s = set_state.lock().map_err(|_| "drive state lock poisoned")?;
                s.forward = *forward;
                s.turn = *turn;
                info!(forward, turn, "drive command");
                Ok(Value::Null)
            }
            _ => Err("setVels expects two floats".to_string()),
        }),
    )?;

    let get_state = Arc::clone(&state);
    dispatcher.bind(
        "getVels",
        &[],
        Arc::new(move |_| {
            let s = get_state.lock().map_err(|_| "drive state lock poisoned")?;
            Ok(Value::Array(vec![
                Value::Float(s.forward),
                Value::Float(s.turn),
            ]))
        }),
    )?;

    let stop_state = Arc::clone(&state);
    dispatcher.bind(
        "stop",
        &[],
        Arc::new(move |_| {
            let mut s = stop_state.lock().map_err(|_| "drive state lock poisoned")?;
            *s = DriveState::default();
            info!("drive stopped");
            Ok(Value::Null)
        }),
    )?;

    Ok(dispatcher)
}

/// Hooks that narrate mesh events for the operator.
struct CliHooks;

#[async_trait::async_trait]
impl NotificationHooks for CliHooks {
    async fn on_client_connect(&self, client_key: &str) {
        info!(client = %client_key, "client attached");
    }

    async fn on_client_disconnect(&self, client_key: &str) -> bool {
        info!(client = %client_key, "client detached");
        true
    }

    async fn on_dependency_down(&self, server_key: &str, constraints: &[Constraint]) {
        warn!(dependency = %server_key, ?constraints, "dependency down, degrading");
    }

    async fn on_dependency_up(
        &self,
        server_key: &str,
        _handle: &ComponentInfo,
        _constraints: &[Constraint],
    ) {
        info!(dependency = %server_key, "dependency back up");
    }
}

async fn run_component(
    cfg: config::Config,
    component_type: String,
    name: String,
    shutdown: Arc<AtomicBool>,
) -> Result<(), MeshError> {
    let identity = ComponentIdentity::new(&component_type, &name)?;
    let context = ComponentContext::new(
        identity,
        Credentials::new(cfg.shutdown_secret.clone()),
        Arc::new(CliHooks),
    );

    let session_cfg = SessionConfig {
        registry_url: cfg.registry_url(),
        advertised_host: cfg.registry_host.clone(),
        advertised_port: 0,
        heartbeat_interval_ms: cfg.heartbeat_interval_ms,
        reconnect_interval_ms: cfg.reconnect_interval_ms,
    };

    let dispatcher = drive_dispatcher(&component_type)?;
    let hooks = Arc::clone(context.hooks());
    let (client, session_task) = ComponentSession::start(session_cfg, context, dispatcher).await?;
    let hook_task = HookRunner::spawn(
        client.key().to_string(),
        hooks,
        client.subscribe_events(),
    );

    println!(
        "  {} component {} registered with {}",
        "✓".green().bold(),
        client.key().bold(),
        cfg.registry_url().bold()
    );

    let signal = client.shutdown_signal();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            println!("  deregistering {} …", client.key().bold());
            client.deregister();
            tokio::time::sleep(Duration::from_millis(200)).await;
            break;
        }
        if *signal.borrow() {
            println!(
                "  {} shutdown requested remotely; exiting.",
                "✓".green().bold()
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    hook_task.abort();
    session_task.abort();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner & usage
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___       __  __  ___        __   "#.bold().cyan());
    println!("{}", r#"  / _ )___  / /_/  |/  /__ ___ / /   "#.bold().cyan());
    println!("{}", r#" / _  / _ \/ __/ /|_/ / -_|_-</ _ \  "#.bold().cyan());
    println!("{}", r#"/____/\___/\__/_/  /_/\__/___/_//_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "BotMesh".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Distributed robot component mesh");
    println!();
}

fn print_usage() {
    println!("Usage:");
    println!("  {}                      run the registry daemon", "botmesh registry".bold());
    println!(
        "  {}   run a demo drive-base component",
        "botmesh component <type> <name>".bold()
    );
}
