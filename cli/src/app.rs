use crate::error::SessionError;
use crate::export::ExportDispatch;
use crate::health::ConnectivityState;
use crate::prefs::PrefsSnapshot;
use crate::session::{SeparationRequest, WorkflowSession};
use crate::types::{ArtifactRef, GenerationRequest};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::warn;

const MAX_STATUS_LINES: usize = 8;
const MAX_JOB_ENTRIES: usize = 50;

/// Which remote job a watcher event belongs to. Separation and smart blend
/// feed the workflow session; generation has its own little flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Separation,
    SmartBlend,
    Generation,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Separation => "separation",
            Self::SmartBlend => "smart blend",
            Self::Generation => "generation",
        }
    }

    fn belongs_to_session(self) -> bool {
        !matches!(self, Self::Generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLogState {
    Queued,
    Running(&'static str),
    Done(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobLogEntry {
    pub kind: JobKind,
    pub detail: String,
    pub state: JobLogState,
    pub started_at: DateTime<Utc>,
}

impl JobLogEntry {
    pub fn state_label(&self) -> String {
        match &self.state {
            JobLogState::Queued => "queued".to_string(),
            JobLogState::Running(label) => format!("running — {label}"),
            JobLogState::Done(file) => format!("done — {file}"),
            JobLogState::Failed(message) => format!("failed — {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Remix,
    Generate,
}

/// A pending one-line text prompt. The UI routes typed characters here
/// until the user commits or cancels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingPrompt {
    SingleInput,
    BlendPrimary,
    BlendBacking { primary: crate::types::TrackInput },
    Mood,
    Genre,
    Language,
}

impl PendingPrompt {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleInput => "path of the track to remix",
            Self::BlendPrimary => "path of the vocal / primary track",
            Self::BlendBacking { .. } => "path of the beat / backing track",
            Self::Mood => "mood",
            Self::Genre => "genre",
            Self::Language => "language",
        }
    }
}

/// Form state for the generation flow. All three tags are required before
/// a submission is allowed.
#[derive(Debug, Clone, Default)]
pub struct GenerationForm {
    pub mood: String,
    pub genre: String,
    pub language: String,
    pub busy: bool,
    pub artifact: Option<ArtifactRef>,
}

impl GenerationForm {
    pub fn request(&self) -> Result<GenerationRequest, SessionError> {
        let request = GenerationRequest {
            mood: self.mood.clone(),
            genre: self.genre.clone(),
            language: self.language.clone(),
        };
        if request.is_complete() {
            Ok(request)
        } else {
            Err(SessionError::MissingTags)
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Info(String),
    Error(String),
    Connectivity(ConnectivityState),
    JobQueued { kind: JobKind, task_id: String, detail: String },
    JobProgress { kind: JobKind, task_id: String, attempt: u32, label: &'static str },
    SeparationReady { task_id: String, stems_dir: String },
    ExportReady { task_id: Option<String>, artifact: ArtifactRef },
    ExportFailed { message: String },
    JobFailed { kind: JobKind, task_id: String, message: String },
    GenerationReady { task_id: String, artifact: ArtifactRef },
    ArtifactSaved { path: PathBuf },
}

#[derive(Debug, Clone)]
pub enum AppCommand {
    CheckHealth,
    SubmitSeparation { request: SeparationRequest },
    Export { dispatch: ExportDispatch },
    SubmitGeneration { request: GenerationRequest },
    CancelJob,
    SaveArtifact { file: String },
    PlayArtifact { path: PathBuf },
    StopPlayback,
}

#[derive(Debug)]
pub struct AppState {
    pub session: WorkflowSession,
    pub generation: GenerationForm,
    pub connectivity: ConnectivityState,
    pub screen: Screen,
    pub jobs: IndexMap<String, JobLogEntry>,
    pub status_lines: Vec<String>,
    pub progress_label: Option<&'static str>,
    pub selected_stem: usize,
    pub prompt: Option<PendingPrompt>,
    pub input: String,
    pub last_saved: Option<PathBuf>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            session: WorkflowSession::new(),
            generation: GenerationForm::default(),
            connectivity: ConnectivityState::Checking,
            screen: Screen::Remix,
            jobs: IndexMap::new(),
            status_lines: Vec::new(),
            progress_label: None,
            selected_stem: 0,
            prompt: None,
            input: String::new(),
            last_saved: None,
        }
    }

    pub fn apply_prefs(&mut self, snapshot: &PrefsSnapshot) {
        let _ = self.session.set_mode(snapshot.mode);
        let _ = self.session.set_tier(snapshot.tier);
        self.session.set_mood(snapshot.mood.clone());
        self.session.set_genre(snapshot.genre.clone());
        self.session.set_smart_remix(snapshot.smart_remix);
        let _ = self.session.set_blend_ratio(snapshot.blend_ratio);
    }

    pub fn prefs_snapshot(&self) -> PrefsSnapshot {
        PrefsSnapshot {
            mode: self.session.mode(),
            tier: self.session.tier(),
            mood: self.session.mood().to_string(),
            genre: self.session.genre().to_string(),
            smart_remix: self.session.smart_remix(),
            blend_ratio: self.session.blend_ratio(),
        }
    }

    pub fn push_status_line(&mut self, line: String) {
        self.status_lines.push(line);
        if self.status_lines.len() > MAX_STATUS_LINES {
            let overflow = self.status_lines.len() - MAX_STATUS_LINES;
            self.status_lines.drain(0..overflow);
        }
    }

    /// "Start Over": resets the session and clears transient display state.
    pub fn start_over(&mut self) {
        self.session.reset();
        self.progress_label = None;
        self.selected_stem = 0;
        self.prompt = None;
        self.input.clear();
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Info(message) => self.push_status_line(message),
            AppEvent::Error(message) => self.push_status_line(format!("Error: {message}")),
            AppEvent::Connectivity(state) => {
                self.connectivity = state;
                self.push_status_line(format!("Worker: {}", state.label()));
            }
            AppEvent::JobQueued { kind, task_id, detail } => {
                if kind.belongs_to_session() {
                    if let Err(err) = self.session.attach_job(&task_id) {
                        warn!("dropping stale queued job {task_id}: {err}");
                        return;
                    }
                }
                self.insert_job(task_id.clone(), kind, detail);
                self.push_status_line(format!("{} job {task_id} queued", kind.label()));
            }
            AppEvent::JobProgress { task_id, label, .. } => {
                self.progress_label = Some(label);
                if let Some(entry) = self.jobs.get_mut(&task_id) {
                    entry.state = JobLogState::Running(label);
                }
            }
            AppEvent::SeparationReady { task_id, stems_dir } => {
                self.progress_label = None;
                match self.session.separation_succeeded(stems_dir) {
                    Ok(()) => {
                        self.mark_job(&task_id, JobLogState::Done("stems ready".to_string()));
                        self.push_status_line(
                            "Stems ready — tweak the volumes, then export".to_string(),
                        );
                    }
                    Err(err) => warn!("stale separation result for {task_id} ignored: {err}"),
                }
            }
            AppEvent::ExportReady { task_id, artifact } => {
                self.progress_label = None;
                match self.session.export_succeeded(artifact.clone()) {
                    Ok(()) => {
                        if let Some(task_id) = task_id {
                            self.mark_job(&task_id, JobLogState::Done(artifact.file.clone()));
                        }
                        self.push_status_line(format!("Export ready: {}", artifact.file));
                    }
                    Err(err) => warn!("stale export result ignored: {err}"),
                }
            }
            AppEvent::ExportFailed { message } => {
                self.progress_label = None;
                match self.session.fail(message.clone()) {
                    Ok(()) => self.push_status_line(format!("Error: {message}")),
                    Err(err) => warn!("stale export failure ignored: {err}"),
                }
            }
            AppEvent::JobFailed { kind, task_id, message } => {
                self.progress_label = None;
                if !task_id.is_empty() {
                    self.mark_job(&task_id, JobLogState::Failed(message.clone()));
                }
                if kind.belongs_to_session() {
                    match self.session.fail(message.clone()) {
                        Ok(()) => self.push_status_line(format!("Error: {message}")),
                        Err(err) => warn!("stale {} failure ignored: {err}", kind.label()),
                    }
                } else {
                    self.generation.busy = false;
                    self.push_status_line(format!("Error: {message}"));
                }
            }
            AppEvent::GenerationReady { task_id, artifact } => {
                self.progress_label = None;
                self.generation.busy = false;
                self.generation.artifact = Some(artifact.clone());
                self.mark_job(&task_id, JobLogState::Done(artifact.file.clone()));
                self.push_status_line(format!("Generated track ready: {}", artifact.file));
            }
            AppEvent::ArtifactSaved { path } => {
                self.push_status_line(format!("Saved to {}", path.display()));
                self.last_saved = Some(path);
            }
        }
    }

    fn insert_job(&mut self, task_id: String, kind: JobKind, detail: String) {
        self.jobs.insert(
            task_id,
            JobLogEntry { kind, detail, state: JobLogState::Queued, started_at: Utc::now() },
        );
        while self.jobs.len() > MAX_JOB_ENTRIES {
            self.jobs.shift_remove_index(0);
        }
    }

    fn mark_job(&mut self, task_id: &str, state: JobLogState) {
        if let Some(entry) = self.jobs.get_mut(task_id) {
            entry.state = state;
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
