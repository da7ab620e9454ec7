use crate::error::{OrchestrationError, Stage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Remote task lifecycle as reported by the worker. `completed` and `error`
/// are terminal; anything unrecognised (the worker answers `not_found` for
/// evicted tasks) stays non-terminal and keeps the poll loop alive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// One poll response from `GET /api/task-status/{task_id}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TaskStatus {
    /// Interprets a completed separation task. The worker nests a
    /// `{"status": "success", "stems_dir": ...}` object under `result`, and
    /// an embedded failure there still means the separation failed.
    pub fn separation_stems(&self) -> std::result::Result<String, OrchestrationError> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| OrchestrationError::job(Stage::Separation, self.message.clone()))?;
        let parsed: SeparationResult = serde_json::from_value(result.clone())
            .map_err(|err| OrchestrationError::job(Stage::Separation, Some(err.to_string())))?;
        if parsed.status == "success" {
            if let Some(dir) = parsed.stems_dir {
                return Ok(dir);
            }
        }
        Err(OrchestrationError::job(Stage::Separation, parsed.message))
    }

    /// Interprets a completed task whose payload is a downloadable file
    /// reference, either top-level (`generate`, `smart-mix`) or nested under
    /// `result`.
    pub fn artifact_file(&self, stage: Stage) -> std::result::Result<ArtifactRef, OrchestrationError> {
        if let Some(file) = &self.file {
            return Ok(ArtifactRef { file: file.clone() });
        }
        if let Some(file) = self
            .result
            .as_ref()
            .and_then(|value| value.get("file"))
            .and_then(|value| value.as_str())
        {
            return Ok(ArtifactRef { file: file.to_string() });
        }
        Err(OrchestrationError::job(stage, self.message.clone()))
    }
}

/// Initial response to any job submission. A missing `task_id` is a
/// submission failure, never a job.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubmitResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmitResponse {
    pub fn into_task_id(self, stage: Stage) -> std::result::Result<String, OrchestrationError> {
        match self.task_id {
            Some(id) => Ok(id),
            None => Err(OrchestrationError::submission(stage, self.message)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SeparationResult {
    status: String,
    #[serde(default)]
    stems_dir: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Response shape shared by the synchronous mix endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MixResponse {
    pub status: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model_loaded: Option<bool>,
    #[serde(default)]
    pub ffmpeg: Option<bool>,
}

/// Server-side processing depth. Exactly one tier is active at a time; the
/// wire protocol still speaks the worker's `turbo_mode`/`fast_mode` boolean
/// pair, with `full` meaning both false.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Turbo,
    Fast,
    Full,
}

impl Tier {
    pub fn flags(self) -> TierFlags {
        match self {
            Self::Turbo => TierFlags { turbo_mode: true, fast_mode: false },
            Self::Fast => TierFlags { turbo_mode: false, fast_mode: true },
            Self::Full => TierFlags { turbo_mode: false, fast_mode: false },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Turbo => "TURBO (10s preview)",
            Self::Fast => "FAST (60s)",
            Self::Full => "FULL (entire track)",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Self::Turbo
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierFlags {
    pub turbo_mode: bool,
    pub fast_mode: bool,
}

/// The four separated component tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stem {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl Stem {
    pub const ALL: [Stem; 4] = [Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other];

    pub fn label(self) -> &'static str {
        match self {
            Self::Vocals => "vocals",
            Self::Drums => "drums",
            Self::Bass => "bass",
            Self::Other => "other",
        }
    }
}

pub const MIN_STEM_VOLUME: f32 = 0.0;
pub const MAX_STEM_VOLUME: f32 = 1.5;

/// Per-stem volume multipliers, each clamped to `[0.0, 1.5]`. Serializes to
/// the exact `volumes` object the mix endpoint expects.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct StemVolumes {
    pub vocals: f32,
    pub drums: f32,
    pub bass: f32,
    pub other: f32,
}

impl StemVolumes {
    pub fn get(&self, stem: Stem) -> f32 {
        match stem {
            Stem::Vocals => self.vocals,
            Stem::Drums => self.drums,
            Stem::Bass => self.bass,
            Stem::Other => self.other,
        }
    }

    pub fn set(&mut self, stem: Stem, value: f32) {
        let value = value.clamp(MIN_STEM_VOLUME, MAX_STEM_VOLUME);
        match stem {
            Stem::Vocals => self.vocals = value,
            Stem::Drums => self.drums = value,
            Stem::Bass => self.bass = value,
            Stem::Other => self.other = value,
        }
    }

    pub fn adjust(&mut self, stem: Stem, delta: f32) {
        self.set(stem, self.get(stem) + delta);
    }
}

impl Default for StemVolumes {
    fn default() -> Self {
        Self { vocals: 1.0, drums: 1.0, bass: 1.0, other: 1.0 }
    }
}

/// JSON body for the synchronous `/api/mix` endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MixRequest {
    pub stems_dir: String,
    pub volumes: StemVolumes,
    pub mood: String,
    pub genre: String,
}

/// A downloadable output reference issued by the worker. The orchestration
/// layer carries the name around; fetching the bytes is a separate step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub file: String,
}

/// One raw audio payload as handed over by the file-selection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInput {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl TrackInput {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "track.wav".to_string());
        Ok(Self { file_name, bytes })
    }
}

/// Parameters for a generation submission. All three tags are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub mood: String,
    pub genre: String,
    pub language: String,
}

impl GenerationRequest {
    pub fn is_complete(&self) -> bool {
        !self.mood.trim().is_empty()
            && !self.genre.trim().is_empty()
            && !self.language.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tier_flags_keep_exactly_one_tier_active() {
        assert_eq!(Tier::Turbo.flags(), TierFlags { turbo_mode: true, fast_mode: false });
        assert_eq!(Tier::Fast.flags(), TierFlags { turbo_mode: false, fast_mode: true });
        assert_eq!(Tier::Full.flags(), TierFlags { turbo_mode: false, fast_mode: false });
    }

    #[test]
    fn unknown_task_status_stays_non_terminal() {
        let status: TaskStatus = serde_json::from_value(json!({ "status": "not_found" })).unwrap();
        assert_eq!(status.status, TaskState::Unknown);
        assert!(!status.status.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Error.is_terminal());
    }

    #[test]
    fn separation_stems_reads_nested_result() {
        let status: TaskStatus = serde_json::from_value(json!({
            "status": "completed",
            "progress": 100,
            "result": { "status": "success", "stems_dir": "processed/htdemucs/track" }
        }))
        .unwrap();
        assert_eq!(status.separation_stems().unwrap(), "processed/htdemucs/track");
    }

    #[test]
    fn separation_stems_surfaces_embedded_failure() {
        let status: TaskStatus = serde_json::from_value(json!({
            "status": "completed",
            "result": { "status": "error", "message": "No stem files found" }
        }))
        .unwrap();
        let err = status.separation_stems().unwrap_err();
        assert_eq!(err.user_message(), "No stem files found");
    }

    #[test]
    fn artifact_file_prefers_top_level_then_result() {
        let top: TaskStatus = serde_json::from_value(json!({
            "status": "completed",
            "file": "generated_Happy_English.wav"
        }))
        .unwrap();
        assert_eq!(
            top.artifact_file(Stage::Generation).unwrap().file,
            "generated_Happy_English.wav"
        );

        let nested: TaskStatus = serde_json::from_value(json!({
            "status": "completed",
            "result": { "status": "success", "file": "smart_mix_Happy_Pop.wav" }
        }))
        .unwrap();
        assert_eq!(nested.artifact_file(Stage::Blending).unwrap().file, "smart_mix_Happy_Pop.wav");
    }

    #[test]
    fn missing_task_id_is_a_submission_failure() {
        let response: SubmitResponse =
            serde_json::from_value(json!({ "message": "model not loaded" })).unwrap();
        let err = response.into_task_id(Stage::Separation).unwrap_err();
        assert_eq!(err.user_message(), "model not loaded");

        let ok: SubmitResponse =
            serde_json::from_value(json!({ "task_id": "abc", "status": "queued" })).unwrap();
        assert_eq!(ok.into_task_id(Stage::Separation).unwrap(), "abc");
    }

    #[test]
    fn stem_volumes_clamp_to_range() {
        let mut volumes = StemVolumes::default();
        volumes.set(Stem::Drums, 2.4);
        assert_eq!(volumes.drums, MAX_STEM_VOLUME);
        volumes.adjust(Stem::Drums, -9.0);
        assert_eq!(volumes.drums, MIN_STEM_VOLUME);
        assert_eq!(volumes.vocals, 1.0);
    }

    #[test]
    fn mix_request_serializes_wire_field_names() {
        let request = MixRequest {
            stems_dir: "processed/htdemucs/track".into(),
            volumes: StemVolumes { vocals: 1.0, drums: 0.5, bass: 1.0, other: 1.0 },
            mood: "Happy".into(),
            genre: "Pop".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stems_dir"], "processed/htdemucs/track");
        assert_eq!(value["volumes"]["vocals"], 1.0);
        assert_eq!(value["volumes"]["drums"], 0.5);
        assert_eq!(value["volumes"]["bass"], 1.0);
        assert_eq!(value["volumes"]["other"], 1.0);
        assert_eq!(value["mood"], "Happy");
        assert_eq!(value["genre"], "Pop");
        assert_eq!(value["volumes"].as_object().unwrap().len(), 4);
    }
}
