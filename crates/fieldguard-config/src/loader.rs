use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use fieldguard_core::{FieldGuardError, Result};

use crate::schema::FieldGuardConfig;

/// Loads and optionally hot-reloads the FieldGuard configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<FieldGuardConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > FIELDGUARD_CONFIG env > ~/.fieldguard/fieldguard.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("FIELDGUARD_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fieldguard")
            .join("fieldguard.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            FieldGuardConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> FieldGuardConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<FieldGuardConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse(raw: &str, path: &Path) -> Result<FieldGuardConfig> {
        toml::from_str::<FieldGuardConfig>(raw).map_err(|e| {
            FieldGuardError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate — log warnings, fail on errors.
    fn check(config: &FieldGuardConfig) -> Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(FieldGuardError::Config(e)),
        }
    }

    /// Apply env var overrides (FIELDGUARD_AUTOMATION_LEVEL, FIELDGUARD_DB_PATH, etc.)
    fn apply_env_overrides(mut config: FieldGuardConfig) -> FieldGuardConfig {
        if let Ok(v) = std::env::var("FIELDGUARD_AUTOMATION_LEVEL") {
            match v.parse::<u8>() {
                Ok(level) => config.safety.automation_level = level,
                Err(_) => warn!(value = %v, "ignoring non-numeric FIELDGUARD_AUTOMATION_LEVEL"),
            }
        }
        if let Ok(v) = std::env::var("FIELDGUARD_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FIELDGUARD_LOG_LEVEL") {
            config.logging.level = v;
        }
        // Config file takes priority, env is the fallback.
        if config.safety.signing_key.is_none() {
            if let Ok(v) = std::env::var("FIELDGUARD_SIGNING_KEY") {
                config.safety.signing_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk. Returns the new snapshot.
    pub fn reload(&self) -> Result<FieldGuardConfig> {
        if !self.config_path.exists() {
            return Err(FieldGuardError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config.clone();
        info!("configuration reloaded");
        Ok(new_config)
    }

    /// Start a background file watcher that reloads the config when the file
    /// changes and hands every successfully reloaded snapshot to `on_change`.
    /// The returned watcher must be kept alive for watching to continue.
    pub fn watch<F>(&self, on_change: F) -> Result<notify::RecommendedWatcher>
    where
        F: Fn(&FieldGuardConfig) + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<NotifyEvent, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            let is_our_file = event
                .paths
                .iter()
                .any(|p| p.file_name() == path_for_event.file_name());
            if !is_our_file {
                return;
            }

            info!("config file changed, reloading");
            let raw = match std::fs::read_to_string(&path_for_event) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "failed to read config file during hot-reload");
                    return;
                }
            };
            let parsed = ConfigLoader::parse(&raw, &path_for_event)
                .map(ConfigLoader::apply_env_overrides)
                .and_then(|c| ConfigLoader::check(&c).map(|()| c));
            match parsed {
                Ok(new_config) => {
                    *config.write() = new_config.clone();
                    info!("configuration hot-reloaded successfully");
                    on_change(&new_config);
                }
                Err(e) => {
                    warn!(error = %e, "config file has errors, keeping current config");
                }
            }
        })
        .map_err(|e| FieldGuardError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| FieldGuardError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
