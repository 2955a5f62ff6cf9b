// bases/control_server/src/main.rs
use clap::Parser;
use color_eyre::Result;
use control_primitives::Volume;
use media_library::MediaLibrary;
use playback_session::MpvPort;
use player_process::PlayerSpec;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

mod config;
mod error;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = config::CliArgs::parse();
    let mut store = config::ConfigStore::load_or_create(&args.config)?;
    store.apply_cli(&args);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&store.config.log_level)),
        )
        .init();

    let media_dir = store.config.media_dir.clone();
    tokio::fs::create_dir_all(&media_dir).await?;
    info!(dir = %media_dir.display(), "media directory ready");

    let spec = PlayerSpec {
        binary: store.config.player_binary.clone(),
        extra_args: store.config.player_args.clone(),
    };
    match spec.check_available() {
        Ok(path) => info!(player = %path.display(), "player binary resolved"),
        Err(e) => warn!("{e}; playback will fail until it is installed"),
    }

    let volume = Volume::new(store.config.volume).unwrap_or_default();
    let route = store.config.output_route;
    let session = playback_session::spawn(MpvPort::new(spec), media_dir.clone(), volume, route);

    let library = Arc::new(MediaLibrary::new(media_dir, store.config.max_upload_size).await?);

    let port = store.config.port;
    let state = server::AppState {
        session,
        library,
        config: Arc::new(tokio::sync::Mutex::new(store)),
        started_at: Instant::now(),
    };

    server::run(state, port).await
}
