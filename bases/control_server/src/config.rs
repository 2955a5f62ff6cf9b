// bases/control_server/src/config.rs
use clap::Parser;
use control_primitives::OutputRoute;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// On-disk configuration, one JSON file. Unknown fields are ignored and
/// missing fields fall back to defaults, so old config files keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub media_dir: PathBuf,
    pub port: u16,
    pub player_binary: PathBuf,
    pub player_args: Vec<String>,
    pub volume: i64,
    pub output_route: OutputRoute,
    pub max_upload_size: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
            port: 5000,
            player_binary: PathBuf::from("mpv"),
            player_args: Vec::new(),
            volume: 100,
            output_route: OutputRoute::Auto,
            max_upload_size: 2 * 1024 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

/// Headless playback controller
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the JSON configuration file (created with defaults if absent)
    #[arg(short, long, default_value = "controller-config.json")]
    pub config: PathBuf,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Media directory (overrides the config file)
    #[arg(short, long)]
    pub media_dir: Option<PathBuf>,
}

/// The loaded configuration plus where to persist it.
pub struct ConfigStore {
    path: PathBuf,
    pub config: Config,
}

impl ConfigStore {
    /// Load the config file, creating it with defaults when absent. An
    /// unreadable file falls back to defaults rather than refusing to start.
    pub fn load_or_create(path: &Path) -> std::io::Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    info!(file = %path.display(), "configuration loaded");
                    config
                }
                Err(e) => {
                    warn!(file = %path.display(), "unreadable configuration, using defaults: {e}");
                    Config::default()
                }
            },
            Err(_) => {
                let config = Config::default();
                let store = Self {
                    path: path.to_path_buf(),
                    config,
                };
                store.save()?;
                info!(file = %path.display(), "default configuration written");
                return Ok(store);
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Runtime-only overrides from the command line; never written back.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.config.port = port;
        }
        if let Some(media_dir) = &args.media_dir {
            self.config.media_dir = media_dir.clone();
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let contents = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&self.path, contents)
    }

    pub fn set_volume(&mut self, volume: i64) -> std::io::Result<()> {
        self.config.volume = volume;
        self.save()
    }

    pub fn set_output_route(&mut self, route: OutputRoute) -> std::io::Result<()> {
        self.config.output_route = route;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.config.port, 5000);
        assert_eq!(store.config.volume, 100);
    }

    #[test]
    fn partial_file_gets_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 8080}"#).unwrap();

        let store = ConfigStore::load_or_create(&path).unwrap();
        assert_eq!(store.config.port, 8080);
        assert_eq!(store.config.volume, 100);
        assert_eq!(store.config.output_route, OutputRoute::Auto);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let store = ConfigStore::load_or_create(&path).unwrap();
        assert_eq!(store.config.port, 5000);
    }

    #[test]
    fn volume_changes_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut store = ConfigStore::load_or_create(&path).unwrap();
        store.set_volume(85).unwrap();

        let reloaded = ConfigStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.config.volume, 85);
    }

    #[test]
    fn cli_overrides_do_not_touch_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut store = ConfigStore::load_or_create(&path).unwrap();
        let args = CliArgs {
            config: path.clone(),
            port: Some(9000),
            media_dir: None,
        };
        store.apply_cli(&args);
        assert_eq!(store.config.port, 9000);

        let reloaded = ConfigStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.config.port, 5000);
    }
}
