use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use tidings::{ClientRecord, ClientRoster, Config, EventHub, config_manager};
use tidings_types::ClientStatus;

struct Args {
    config_path: Option<PathBuf>,
    clients_path: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let config = load_config(args.config_path);
    tidings::logging::init(&config.log_level);

    // The hub is owned here and handed to every consumer explicitly.
    let (event_hub, dispatcher) = EventHub::with_config(&config.bus);
    let dispatcher_task = dispatcher.spawn();

    let roster = ClientRoster::attach(&event_hub);

    let clients = match args.clients_path.or(config.clients_fixture) {
        Some(path) => {
            log::info!("Loading clients from {}", path.display());
            tidings::load_clients(&path)?
        }
        None => tidings::sample_clients()?,
    };
    let first_id = clients.first().map(|client| client.id.clone());
    event_hub.publish_clients_loaded(clients);

    // A couple of live updates, as a remote feed would send them
    let mut newcomer = ClientRecord::new("c-2001", "Alan Turing");
    newcomer.company = Some("Bletchley Consulting".to_string());
    newcomer.status = ClientStatus::Prospect;
    newcomer.updated_at = Some(Utc::now());
    event_hub.publish_client_upserted(newcomer);

    if let Some(first_id) = first_id {
        event_hub.publish_client_removed(first_id);
    }

    for (event, count) in event_hub.stats() {
        log::debug!("{} has {} subscriber(s)", event, count);
    }

    // Dropping the last hub handle lets the dispatcher drain and stop.
    drop(event_hub);
    let metrics = dispatcher_task
        .await
        .context("dispatcher task failed")?;

    println!("{} clients:", roster.len());
    for client in roster.clients() {
        println!(
            "  {:<8} {:<20} {:<24} {:?}",
            client.id,
            client.name,
            client.company.as_deref().unwrap_or("-"),
            client.status
        );
    }
    tracing::info!(
        emitted = metrics.events_emitted,
        deliveries = metrics.deliveries,
        failures = metrics.failures,
        "event bus finished"
    );

    Ok(())
}

/// Parse `--config <path>` and `--clients <path>` from the command line
fn parse_args() -> Args {
    let mut parsed = Args {
        config_path: None,
        clients_path: None,
    };
    let mut args = std::env::args().skip(1);

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--config" => parsed.config_path = args.next().map(PathBuf::from),
            "--clients" => parsed.clients_path = args.next().map(PathBuf::from),
            other => eprintln!("Ignoring unknown argument: {}", other),
        }
    }

    parsed
}

/// Load the config from `path`, or from the per-user location.
/// Falls back to the embedded default when nothing usable is found.
fn load_config(path: Option<PathBuf>) -> Config {
    let path = match path {
        Some(path) => Ok(path),
        None => config_manager::resolve_config_path(),
    };

    match path.and_then(|path| config_manager::load_config(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {:#}", e);
            config_manager::default_config().unwrap_or_default()
        }
    }
}
