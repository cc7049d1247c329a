//! # Cardify Demo
//!
//! A CLI walkthrough of shared AR card sessions built on `cardify-sync`.
//! Every device is a real replica task wired to its peers with in-memory
//! transports and driven by a simulated tracking session.
//!
//! ## Message flow
//!
//! ```text
//! share map:  WorldMapSnapshot { frame, anchors }  → peers replace their store
//! place:      AnchorDelta::Add(anchor)             → peers add
//! remove:     AnchorDelta::Remove(id)              → peers remove
//! drag:       Remove(old) then Add(new, fresh id)
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use cardify_sync::{
    create_network, LimitedReason, MappingStatus, MemoryTransport, PeerIdentity, Pose, Replica,
    ReplicaConfig, ReplicaHandle, ReplicaView, Result, SimulatedTracking, SyncState,
    TrackingQuality,
};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cardify-demo")]
#[command(about = "Shared AR card sessions over peer replication")]
#[command(version)]
struct Cli {
    /// Label given to placed cards
    #[arg(long, default_value = "card")]
    label: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Two devices: share a map, place a card, watch it appear on the peer
    Place,
    /// Snapshot semantics: adopting a map replaces local cards, last map wins
    Snapshot,
    /// Drag-to-move replicates as remove + add with a fresh id
    Drag,
    /// Walk the status line through tracking and peer states
    Status,
    /// Local intent survives a dead transport; nothing is retried
    Offline,
}

// ─── Devices ───────────────────────────────────────────────────────────────

struct Device {
    name: String,
    replica: ReplicaHandle,
    transport: Arc<MemoryTransport>,
    tracking: Arc<SimulatedTracking>,
}

impl Device {
    fn spawn(config: &ReplicaConfig, transport: Arc<MemoryTransport>, tracking: SimulatedTracking) -> Self {
        let tracking = Arc::new(tracking);
        let replica = Replica::spawn(config.clone(), transport.clone(), tracking.clone());
        Self {
            name: replica.local_peer().display_name.clone(),
            replica,
            transport,
            tracking,
        }
    }

    fn standalone(config: &ReplicaConfig, id: &str, name: &str) -> Self {
        Self::spawn(
            config,
            Arc::new(MemoryTransport::new(PeerIdentity::new(id, name))),
            SimulatedTracking::mapped(),
        )
    }
}

fn mesh(config: &ReplicaConfig, names: &[&str]) -> Vec<Device> {
    create_network(names)
        .into_iter()
        .map(|t| Device::spawn(config, t, SimulatedTracking::mapped()))
        .collect()
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn send_arrow(from: &str, what: &str, to: &str) {
    println!(
        "  {} {} {}",
        from.bright_magenta(),
        format!("──{}──▶", what).bright_cyan(),
        to.bright_magenta()
    );
}

fn show_status(name: &str, view: &ReplicaView) {
    let status = if view.status.is_empty() {
        "(no message)".dimmed().to_string()
    } else {
        view.status.to_string()
    };
    println!("  {} {:<8} {}", "»".bright_blue(), name, status);
}

fn show_device(name: &str, view: &ReplicaView) {
    let border = "─".repeat(50);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^48} │",
        format!("Device: {}", name).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);

    let sync = match &view.sync {
        SyncState::Synced {
            provider,
            fingerprint,
        } => format!("synced to {} [{}]", provider.display_name, fingerprint.short()),
        SyncState::Unsynced => "unsynced".to_string(),
    };
    println!("  │ {:<48} │", format!("map: {}", sync));
    println!(
        "  │ {:<48} │",
        format!("tracking: {} / {}", view.quality, view.mapping_status)
    );

    if view.anchors.is_empty() {
        println!("  │ {:^48} │", "(no cards)".dimmed().to_string());
    } else {
        for anchor in &view.anchors {
            let [x, y, z] = anchor.pose.translation();
            let id = anchor.id.as_str();
            let short: String = id.chars().skip(id.chars().count().saturating_sub(8)).collect();
            let line = format!("{:<8} …{}  ({:+.2}, {:+.2}, {:+.2})", anchor.label, short, x, y, z);
            println!("  │ {:<48} │", line);
        }
    }
    println!("  └{}┘", border);
}

fn convergence_result(views: &[ReplicaView]) -> bool {
    let converged = views
        .windows(2)
        .all(|w| w[0].anchor_ids() == w[1].anchor_ids());
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL DEVICES AGREE: same cards, same order".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: devices show different cards"
                .bright_red()
                .bold()
        );
    }
    converged
}

async fn settle_all(devices: &[Device]) -> Result<Vec<ReplicaView>> {
    let mut views = Vec::with_capacity(devices.len());
    for d in devices {
        views.push(d.replica.settle().await?);
    }
    Ok(views)
}

// ─── Place ─────────────────────────────────────────────────────────────────

async fn run_place(config: &ReplicaConfig) -> Result<()> {
    header("PLACE: Shared Map, Then Incremental Cards");

    section("Phase 1: Alice shares her world map with Bob");
    let devices = mesh(config, &["Alice", "Bob"]);
    let (alice, bob) = (&devices[0], &devices[1]);

    let shared = alice.replica.share_map().await?;
    send_arrow(&alice.name, "WorldMapSnapshot", &bob.name);
    step(&format!(
        "map {} with {} cards",
        shared.value.fingerprint().short(),
        shared.value.anchors.len()
    ));

    section("Phase 2: Alice taps to place two cards");
    for (i, x) in [-0.2, 0.2].into_iter().enumerate() {
        let placed = alice.replica.place(Pose::from_translation(x, 0.0, -0.5)).await?;
        send_arrow(&alice.name, "AnchorDelta::Add", &bob.name);
        step(&format!("card {} placed at x = {:+.1}", i + 1, x));
        if let Err(e) = placed.broadcast {
            step(&format!("broadcast failed: {}", e));
        }
    }

    section("Phase 3: Bob removes the first card");
    let view = bob.replica.settle().await?;
    match view.anchors.first() {
        Some(first) => {
            bob.replica.remove(&first.id).await?;
            send_arrow(&bob.name, "AnchorDelta::Remove", &alice.name);
        }
        None => step("no cards to remove"),
    }

    section("Result");
    let views = settle_all(&devices).await?;
    for (d, view) in devices.iter().zip(&views) {
        show_device(&d.name, view);
    }
    convergence_result(&views);
    Ok(())
}

// ─── Snapshot ──────────────────────────────────────────────────────────────

async fn run_snapshot(config: &ReplicaConfig) -> Result<()> {
    header("SNAPSHOT: Adoption Replaces Local Cards, Last Map Wins");

    section("Phase 1: Three devices work alone before connecting");
    let alice = Device::standalone(config, "peer-a", "Alice");
    let bob = Device::standalone(config, "peer-b", "Bob");
    let carol = Device::standalone(config, "peer-c", "Carol");

    bob.replica.place(Pose::from_translation(0.0, 0.0, -1.0)).await?;
    step("Bob: placed x");
    alice.replica.place(Pose::from_translation(0.5, 0.0, -1.0)).await?;
    alice.replica.place(Pose::from_translation(1.0, 0.0, -1.0)).await?;
    step("Alice: placed y and z");
    carol.replica.place(Pose::from_translation(-1.0, 0.0, -1.0)).await?;
    step("Carol: placed w");
    show_device(&bob.name, &bob.replica.settle().await?);

    section("Phase 2: Bob joins Alice and adopts her map");
    alice.transport.connect_to(&bob.transport);
    alice.replica.share_map().await?;
    send_arrow(&alice.name, "WorldMapSnapshot", &bob.name);
    show_device(&bob.name, &bob.replica.settle().await?);
    step("Bob's x is gone: snapshots replace, they do not merge");

    section("Phase 3: Carol connects and shares her own map");
    carol.transport.connect_to(&bob.transport);
    carol.replica.share_map().await?;
    send_arrow(&carol.name, "WorldMapSnapshot", &bob.name);
    let view = bob.replica.settle().await?;
    show_device(&bob.name, &view);
    step(&format!(
        "Bob now follows {}: the most recent map wins",
        view.map_provider()
            .map(|p| p.display_name.as_str())
            .unwrap_or("nobody")
    ));

    section("Phase 4: Bob resets tracking");
    bob.replica.reset_tracking().await?;
    let view = bob.replica.settle().await?;
    show_device(&bob.name, &view);
    show_status(&bob.name, &view);
    Ok(())
}

// ─── Drag ──────────────────────────────────────────────────────────────────

async fn run_drag(config: &ReplicaConfig) -> Result<()> {
    header("DRAG: Moves Travel as Remove + Add");

    let devices = mesh(config, &["Alice", "Bob", "Carol"]);
    devices[0].replica.share_map().await?;

    section("Phase 1: Alice places a card");
    let placed = devices[0].replica.place(Pose::from_translation(0.0, 0.0, -0.5)).await?;
    step(&format!("placed {}", placed.value.id));

    section("Phase 2: Bob drags it across the table");
    let mut current = placed.value.id.clone();
    for x in [0.1, 0.2, 0.3] {
        let moved = devices[1]
            .replica
            .move_anchor(&current, Pose::from_translation(x, 0.0, -0.5))
            .await?;
        send_arrow(&devices[1].name, "Remove+Add", "all");
        step(&format!("{} → {}", moved.value.removed.id, moved.value.added.id));
        current = moved.value.added.id;
    }

    section("Result");
    let views = settle_all(&devices).await?;
    for (d, view) in devices.iter().zip(&views) {
        show_device(&d.name, view);
    }
    convergence_result(&views);
    Ok(())
}

// ─── Status ────────────────────────────────────────────────────────────────

async fn run_status(config: &ReplicaConfig) -> Result<()> {
    header("STATUS: One Message, Strict Priority");

    let transports = create_network(&["Alice", "Bob"]);
    let alice = Device::spawn(config, transports[0].clone(), SimulatedTracking::mapped());
    let lonely = Device::spawn(
        config,
        Arc::new(MemoryTransport::new(PeerIdentity::new("peer-x", "Xavier"))),
        SimulatedTracking::new(),
    );
    let bob = Device::spawn(config, transports[1].clone(), SimulatedTracking::new());

    section("A device on its own");
    show_status(&lonely.name, &lonely.replica.settle().await?);
    lonely
        .tracking
        .set_quality(TrackingQuality::Limited(LimitedReason::InsufficientFeatures));
    show_status(&lonely.name, &lonely.replica.settle().await?);
    lonely.tracking.set_quality(TrackingQuality::Normal);
    show_status(&lonely.name, &lonely.replica.settle().await?);

    section("Bob joins Alice");
    show_status(&bob.name, &bob.replica.settle().await?);
    bob.tracking.set_quality(TrackingQuality::Normal);
    show_status(&bob.name, &bob.replica.settle().await?);

    section("Alice shares, Bob relocalizes");
    alice.replica.place(Pose::identity()).await?;
    let view = bob.replica.settle().await?;
    step(&format!("Bob can share yet: {}", view.can_share_map));
    alice.replica.share_map().await?;
    show_status(&bob.name, &bob.replica.settle().await?);
    bob.tracking.set_quality(TrackingQuality::Normal);
    bob.tracking.set_mapping_status(MappingStatus::Mapped);
    let view = bob.replica.settle().await?;
    show_status(&bob.name, &view);
    step(&format!("Bob can share now: {}", view.can_share_map));

    section("Interruptions and failure");
    bob.tracking
        .set_quality(TrackingQuality::Limited(LimitedReason::ExcessiveMotion));
    show_status(&bob.name, &bob.replica.settle().await?);
    bob.tracking.interrupt();
    show_status(&bob.name, &bob.replica.settle().await?);
    bob.tracking.end_interruption();
    show_status(&bob.name, &bob.replica.settle().await?);
    bob.tracking.fail("camera access revoked");
    show_status(&bob.name, &bob.replica.settle().await?);
    bob.replica.reset_tracking().await?;
    show_status(&bob.name, &bob.replica.settle().await?);
    Ok(())
}

// ─── Offline ───────────────────────────────────────────────────────────────

async fn run_offline(config: &ReplicaConfig) -> Result<()> {
    header("OFFLINE: Local Intent Wins, Nothing Is Retried");

    let devices = mesh(config, &["Alice", "Bob"]);
    let (alice, bob) = (&devices[0], &devices[1]);
    alice.replica.share_map().await?;

    section("Phase 1: Alice's radio drops");
    alice.transport.set_online(false);
    let placed = alice.replica.place(Pose::from_translation(0.0, 0.0, -0.7)).await?;
    match &placed.broadcast {
        Ok(()) => step("broadcast delivered"),
        Err(e) => step(&format!("broadcast failed: {}", e.to_string().bright_red())),
    }
    if let Err(e) = alice.replica.share_map().await {
        step(&format!("share refused: {}", e));
    }

    section("Phase 2: Radio back, the missed card stays missed");
    alice.transport.set_online(true);
    let views = settle_all(&devices).await?;
    for (d, view) in devices.iter().zip(&views) {
        show_device(&d.name, view);
    }
    convergence_result(&views);

    section("Phase 3: Re-sharing the map brings Bob up to date");
    alice.replica.share_map().await?;
    send_arrow(&alice.name, "WorldMapSnapshot", &bob.name);
    let views = settle_all(&devices).await?;
    for (d, view) in devices.iter().zip(&views) {
        show_device(&d.name, view);
    }
    convergence_result(&views);
    Ok(())
}

// ─── Main ──────────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = ReplicaConfig {
        placement_label: cli.label.clone(),
        render_prefix: cli.label,
        ..Default::default()
    };

    let result = match cli.command {
        Commands::Place => run_place(&config).await,
        Commands::Snapshot => run_snapshot(&config).await,
        Commands::Drag => run_drag(&config).await,
        Commands::Status => run_status(&config).await,
        Commands::Offline => run_offline(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n  {} {}", "✗".bright_red().bold(), e.to_string().bright_red());
            ExitCode::FAILURE
        }
    }
}
