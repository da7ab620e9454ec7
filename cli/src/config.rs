use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "MOODMIX_CONFIG_PATH";
const ENV_WORKER_URL: &str = "MOODMIX_WORKER_URL";
const ENV_ARTIFACT_DIR: &str = "MOODMIX_ARTIFACT_DIR";
const ENV_POLL_INTERVAL: &str = "MOODMIX_POLL_INTERVAL_MS";

const DEFAULT_POLL_INTERVAL_MS: u64 = crate::watcher::DEFAULT_POLL_INTERVAL.as_millis() as u64;

#[derive(Debug, Clone)]
pub struct AppConfig {
    worker_url: Option<String>,
    artifact_dir: PathBuf,
    poll_interval_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = Self::default_config_path() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create config directory {}", parent.display())
                })?;
            }
        }

        if let Some(path) = config_file_override()? {
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial);
            }
        } else {
            let path = Self::default_config_path()?;
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial);
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn worker_url(&self) -> Option<&str> {
        self.worker_url.as_deref()
    }

    pub fn artifact_dir(&self) -> &PathBuf {
        &self.artifact_dir
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "Moodmix", "Moodmix")
            .ok_or_else(|| anyhow!("unable to determine config directory"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(url) = partial.worker_url {
            self.worker_url = Some(url);
        }
        if let Some(dir) = partial.artifact_dir {
            self.artifact_dir = dir;
        }
        if let Some(interval) = partial.poll_interval_ms {
            self.poll_interval_ms = interval.max(1);
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_WORKER_URL) {
            if value.trim().is_empty() {
                self.worker_url = None;
            } else {
                self.worker_url = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_ARTIFACT_DIR) {
            if !value.trim().is_empty() {
                self.artifact_dir = PathBuf::from(value);
            }
        }
        if let Ok(value) = env::var(ENV_POLL_INTERVAL) {
            if !value.trim().is_empty() {
                let parsed = value
                    .parse::<u64>()
                    .context("MOODMIX_POLL_INTERVAL_MS must be an integer number of milliseconds")?;
                self.poll_interval_ms = parsed.max(1);
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker_url: None,
            artifact_dir: default_artifact_dir(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

fn config_file_override() -> Result<Option<PathBuf>> {
    if let Some(value) = env::var_os(ENV_CONFIG_PATH) {
        if value.is_empty() {
            return Ok(None);
        }
        let path = PathBuf::from(value);
        if path.is_dir() {
            return Ok(Some(path.join(CONFIG_FILE_NAME)));
        }
        return Ok(Some(path));
    }
    Ok(None)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(partial)
}

fn default_artifact_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join("Music").join("Moodmix"))
        .unwrap_or_else(|| PathBuf::from("./artifacts"))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    worker_url: Option<String>,
    artifact_dir: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
}
