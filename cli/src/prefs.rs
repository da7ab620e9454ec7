use crate::session::Mode;
use crate::types::Tier;
use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const PREFS_FILE: &str = "prefs.json";

/// The slice of session state worth carrying between runs: preferences, not
/// work in progress. Inputs, stems, and artifacts never land here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrefsSnapshot {
    pub mode: Mode,
    pub tier: Tier,
    pub mood: String,
    pub genre: String,
    pub smart_remix: bool,
    pub blend_ratio: f32,
}

fn prefs_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "Moodmix", "Moodmix")
        .ok_or_else(|| anyhow!("unable to determine config directory"))?;
    let path = dirs.config_dir().join(PREFS_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    Ok(path)
}

pub fn load_snapshot() -> Result<Option<PrefsSnapshot>> {
    let path = prefs_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(&path)
        .with_context(|| format!("failed to read preferences at {}", path.display()))?;
    let snapshot = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse preferences {}", path.display()))?;
    Ok(Some(snapshot))
}

pub fn save_snapshot(snapshot: &PrefsSnapshot) -> Result<()> {
    let path = prefs_path()?;
    let data = serde_json::to_string_pretty(snapshot).context("failed to encode preferences")?;
    fs::write(&path, data)
        .with_context(|| format!("failed to write preferences to {}", path.display()))
}
