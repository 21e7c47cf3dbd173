//! Armada Server - runs one or more fleet sessions until interrupted.
//!
//! ```bash
//! armada_server --config server.ron --sessions 2 --events
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armada_core::components::{Fleet, SessionId, ShipGroup, ShipType};
use armada_core::factions::Faction;
use armada_core::pathfinding::{GridCell, NavGrid};
use armada_core::terrain::SectorTerrain;
use armada_server::{FleetEngine, InMemoryStore, ServerConfig, SessionRegistry};

#[derive(Parser)]
#[command(name = "armada_server")]
#[command(about = "Authoritative fleet session server")]
#[command(version)]
struct Cli {
    /// Configuration file (RON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of demo sessions to start
    #[arg(short, long, default_value = "1")]
    sessions: u64,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,

    /// Write every engine event to stdout as a JSON line
    #[arg(long)]
    events: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging goes to stderr so stdout stays clean for --events.
    // RUST_LOG wins over --verbose when set.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    tracing::info!(
        tick_rate_hz = config.tick_rate_hz,
        grid_width = config.grid_width,
        grid_height = config.grid_height,
        "Starting Armada server"
    );

    let grid = Arc::new(NavGrid::new(config.grid_width, config.grid_height));
    let engine = FleetEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::clone(&grid),
        Arc::new(SectorTerrain::new(grid)),
        config.rules.clone(),
    );
    let registry = SessionRegistry::new(engine, config);

    for session in 1..=cli.sessions {
        seed_session(&registry, session).await?;
        if cli.events {
            spawn_event_printer(&registry, session).await;
        }
        registry.start(session).await;
    }

    match cli.seconds {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    tracing::info!("Shutting down");
    registry.stop_all().await;
    for session in 1..=cli.sessions {
        if let Some(status) = registry.status(session).await? {
            tracing::info!(
                session,
                ticks = status.tick,
                active_encounters = status.active_encounters,
                "Session summary"
            );
        }
    }
    Ok(())
}

/// Two opposing squadrons in opposite corners, both ordered to the centre.
async fn seed_session(
    registry: &SessionRegistry,
    session: SessionId,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = registry.engine();
    let (width, height) = (engine.grid().width() as i32, engine.grid().height() as i32);
    let centre = GridCell::new(width / 2, height / 2);
    let corners = [
        (Faction::Empire, GridCell::new(0, 0)),
        (Faction::Empire, GridCell::new(0, height - 1)),
        (Faction::Alliance, GridCell::new(width - 1, 0)),
        (Faction::Alliance, GridCell::new(width - 1, height - 1)),
    ];

    let scheduler = registry.scheduler(session).await;
    let mut scheduler = scheduler.lock().await;
    for (id, (faction, cell)) in (1..).zip(corners) {
        let fleet = Fleet::new(id, session, faction, cell)
            .with_group(ShipGroup::new(ShipType::Destroyer, 12))
            .with_group(ShipGroup::new(ShipType::Cruiser, 6))
            .with_group(ShipGroup::new(ShipType::Battleship, 2));
        engine.spawn_fleet(fleet).await?;
        scheduler.set_fleet_destination(id, centre).await?;
    }
    tracing::info!(session, fleets = corners.len(), ?centre, "Session seeded");
    Ok(())
}

async fn spawn_event_printer(registry: &SessionRegistry, session: SessionId) {
    let mut events = registry.subscribe(session).await;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{{\"session\":{session},\"event\":{line}}}"),
                    Err(err) => tracing::warn!(error = %err, "Failed to encode event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(session, skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
