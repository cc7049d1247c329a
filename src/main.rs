use clap::Parser;
use stress_test::{stress_test_anchors, stress_test_scaling, StressConfig};
use tracing_subscriber::EnvFilter;
pub mod stress_test;

/// Multi-replica anchor replication stress run
#[derive(Parser)]
#[command(name = "cardify")]
#[command(version)]
struct Cli {
    /// Devices in the mesh (at least two)
    #[arg(short, long, default_value_t = 4)]
    replicas: usize,

    /// Total user actions across all devices
    #[arg(short, long, default_value_t = 1000)]
    ops: usize,

    /// Actions in flight at once
    #[arg(short, long, default_value_t = 8)]
    concurrency: usize,

    /// Chance an action happens while the device is offline
    #[arg(short, long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Seed for the action generator
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Also run the scaling analysis up to this many devices
    #[arg(long)]
    scale_to: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = StressConfig {
        num_replicas: cli.replicas.max(2),
        num_ops: cli.ops,
        concurrency: cli.concurrency.max(1),
        drop_rate: cli.drop_rate.clamp(0.0, 1.0),
        seed: cli.seed,
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(async_main(config, cli.scale_to)) {
        eprintln!("\n✗ Stress run aborted: {}", e);
        std::process::exit(1);
    }
}

async fn async_main(
    config: StressConfig,
    scale_to: Option<usize>,
) -> Result<(), cardify_sync::SyncError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC REPLICATION STRESS TESTS                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let stats = stress_test_anchors(&config).await?;
    stats.print();

    if let Some(max_replicas) = scale_to {
        stress_test_scaling(&config, max_replicas, 2).await?;
    }

    if stats.converged {
        println!("\n✓ All replicas converged!");
    } else {
        println!("\n✗ Replicas diverged even after re-sharing the world map");
        std::process::exit(2);
    }
    Ok(())
}
