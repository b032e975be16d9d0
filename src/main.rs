use partitioned_map::config::{Config, DEFAULT_PARTITION_COUNT, Property};
use partitioned_map::map::context::{Collaborators, MapServiceContext};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<String> = None;
    let mut partitions: Option<u32> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--partitions" if i + 1 < args.len() => {
                partitions = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--help" | "-h" => {
                eprintln!("Usage: {} [--config <file.json>] [--partitions <n>]", args[0]);
                eprintln!("Example: {} --config maps.json --partitions 271", args[0]);
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    // 1. Configuration:
    let config = match &config_path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    let properties = config.properties();
    let partition_count = partitions.unwrap_or_else(|| {
        u32::try_from(properties.get_integer(Property::PartitionCount))
            .ok()
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_PARTITION_COUNT)
    });

    // 2. Map service, this node owns every partition:
    let context = MapServiceContext::with_properties(
        properties,
        config,
        Collaborators::single_node(partition_count),
    );

    // 3. Spawn stats reporter:
    let stats_context = context.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let maps = stats_context.map_names();
            tracing::info!(
                "Map service stats: {} maps, {} owned partitions",
                maps.len(),
                stats_context.owned_partitions().len()
            );
            for (name, snapshot) in stats_context.stats().snapshots() {
                match serde_json::to_string(&snapshot) {
                    Ok(json) => tracing::info!("  - {}: {}", name, json),
                    Err(e) => tracing::warn!("  - {}: unserializable stats: {}", name, e),
                }
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    // 4. Shutdown, write-behind data is flushed:
    tracing::info!("Shutting down");
    context.shutdown();

    Ok(())
}
