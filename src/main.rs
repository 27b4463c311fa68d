use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixbind::domain::entities::{ImageSlot, ResourceId};
use pixbind::infrastructure::{HttpFetcher, ImageLoader, LoaderConfig};

#[derive(Debug, Parser)]
#[command(
    name = "pixbind",
    version,
    about = "Load images through the tiered cache pipeline",
    long_about = None
)]
struct CliArgs {
    /// Image URLs to load.
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,

    /// Configuration file path (TOML).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Requested display width; 0 disables downsampling.
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Requested display height; 0 disables downsampling.
    #[arg(long, default_value_t = 0)]
    height: u32,

    /// Cache directory override.
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    /// Disk cache version; bumping it invalidates stored entries.
    #[arg(long)]
    cache_version: Option<u32>,

    /// Seconds to wait for all loads before giving up.
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    log_path: Option<PathBuf>,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "info")]
    log_filter: String,
}

fn init_logging(args: &CliArgs) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter.clone()));

    if let Some(log_path) = &args.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    Ok(())
}

fn build_config(args: &CliArgs) -> Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(version) = args.cache_version {
        config.cache_version = version;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    init_logging(&args)?;

    info!(version = pixbind::VERSION, "Starting pixbind");

    let config = build_config(&args)?;
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout())?);
    let loader = ImageLoader::new(&config, fetcher).await;

    let slots: Vec<(String, Arc<ImageSlot>)> = args
        .urls
        .iter()
        .map(|url| (url.clone(), Arc::new(ImageSlot::new())))
        .collect();

    for (url, slot) in &slots {
        loader.bind(
            ResourceId::new(url.clone()),
            slot.clone(),
            args.width,
            args.height,
        );
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
    while tokio::time::Instant::now() < deadline {
        if slots.iter().all(|(_, slot)| slot.is_resolved()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for (url, slot) in &slots {
        match slot.image() {
            Some(image) => println!("{url}: {}x{}", image.width(), image.height()),
            None => println!("{url}: no image"),
        }
    }
    println!("{}", loader.memory_stats());
    if !loader.has_disk_cache() {
        println!("note: disk cache unavailable, ran in memory+network-only mode");
    }

    Ok(())
}
