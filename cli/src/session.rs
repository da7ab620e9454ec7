use crate::error::SessionError;
use crate::types::{ArtifactRef, Stem, StemVolumes, Tier, TrackInput};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MOOD: &str = "Happy";
pub const DEFAULT_GENRE: &str = "Pop";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Single,
    Blend,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Single => "Remix",
            Self::Blend => "Blend",
        }
    }
}

/// One session-scoped phase covering both workflow paths. Being a single
/// enum makes combinations like "exporting while separating" unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InputSelected,
    BothInputsSelected,
    Separating,
    StemsReady,
    Exporting,
    Complete,
    Failed(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    /// True while a remote operation is outstanding for this session.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Separating | Self::Exporting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InputSelected => "input selected",
            Self::BothInputsSelected => "both inputs selected",
            Self::Separating => "separating",
            Self::StemsReady => "stems ready",
            Self::Exporting => "exporting",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
        }
    }
}

/// Everything a separation submission needs, captured at transition time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparationRequest {
    pub input: TrackInput,
    pub tier: Tier,
}

/// The ordered state machine for one user session: mode, tier, inputs,
/// intermediate stems, mixing parameters, and the final artifact. Remote
/// calls happen elsewhere; this type only validates transitions and merges
/// results back in.
#[derive(Debug)]
pub struct WorkflowSession {
    phase: Phase,
    mode: Mode,
    tier: Tier,
    input: Option<TrackInput>,
    blend_inputs: Option<(TrackInput, TrackInput)>,
    blend_ratio: f32,
    smart_remix: bool,
    stems_dir: Option<String>,
    volumes: StemVolumes,
    mood: String,
    genre: String,
    final_artifact: Option<ArtifactRef>,
    job_in_flight: Option<String>,
}

impl WorkflowSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            mode: Mode::Single,
            tier: Tier::default(),
            input: None,
            blend_inputs: None,
            blend_ratio: 0.5,
            smart_remix: true,
            stems_dir: None,
            volumes: StemVolumes::default(),
            mood: DEFAULT_MOOD.to_string(),
            genre: DEFAULT_GENRE.to_string(),
            final_artifact: None,
            job_in_flight: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn mood(&self) -> &str {
        &self.mood
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn volumes(&self) -> StemVolumes {
        self.volumes
    }

    pub fn blend_ratio(&self) -> f32 {
        self.blend_ratio
    }

    pub fn smart_remix(&self) -> bool {
        self.smart_remix
    }

    pub fn input(&self) -> Option<&TrackInput> {
        self.input.as_ref()
    }

    pub fn blend_inputs(&self) -> Option<&(TrackInput, TrackInput)> {
        self.blend_inputs.as_ref()
    }

    pub fn stems_dir(&self) -> Option<&str> {
        self.stems_dir.as_deref()
    }

    pub fn final_artifact(&self) -> Option<&ArtifactRef> {
        self.final_artifact.as_ref()
    }

    pub fn job_in_flight(&self) -> Option<&str> {
        self.job_in_flight.as_deref()
    }

    /// Mode selection is only allowed before any work has started or after
    /// the session reached a terminal state. It clears all mode-specific
    /// sub-state, including any final artifact.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), SessionError> {
        if self.phase != Phase::Idle && !self.phase.is_terminal() {
            return Err(SessionError::InvalidPhase {
                action: "switch mode",
                phase: self.phase.label(),
            });
        }
        self.mode = mode;
        self.clear_work_state();
        Ok(())
    }

    pub fn set_tier(&mut self, tier: Tier) -> Result<(), SessionError> {
        if self.phase.is_busy() {
            return Err(SessionError::InvalidPhase {
                action: "change tier",
                phase: self.phase.label(),
            });
        }
        self.tier = tier;
        Ok(())
    }

    pub fn set_mood(&mut self, mood: String) {
        self.mood = mood;
    }

    pub fn set_genre(&mut self, genre: String) {
        self.genre = genre;
    }

    pub fn set_volume(&mut self, stem: Stem, value: f32) {
        self.volumes.set(stem, value);
    }

    pub fn adjust_volume(&mut self, stem: Stem, delta: f32) {
        self.volumes.adjust(stem, delta);
    }

    pub fn set_blend_ratio(&mut self, ratio: f32) -> Result<(), SessionError> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(SessionError::InvalidBlendRatio);
        }
        self.blend_ratio = ratio;
        Ok(())
    }

    pub fn set_smart_remix(&mut self, on: bool) {
        self.smart_remix = on;
    }

    /// Single mode: accept the one input binary. Replacing the input while
    /// still un-submitted is allowed; anything later requires a reset.
    pub fn select_input(&mut self, track: TrackInput) -> Result<(), SessionError> {
        if self.mode != Mode::Single {
            return Err(SessionError::InvalidPhase {
                action: "select a single track",
                phase: self.phase.label(),
            });
        }
        if !matches!(self.phase, Phase::Idle | Phase::InputSelected) {
            return Err(SessionError::InvalidPhase {
                action: "select a track",
                phase: self.phase.label(),
            });
        }
        self.input = Some(track);
        self.stems_dir = None;
        self.final_artifact = None;
        self.phase = Phase::InputSelected;
        Ok(())
    }

    /// Blend mode: accept both input binaries at once.
    pub fn select_blend_inputs(
        &mut self,
        primary: TrackInput,
        backing: TrackInput,
    ) -> Result<(), SessionError> {
        if self.mode != Mode::Blend {
            return Err(SessionError::InvalidPhase {
                action: "select blend tracks",
                phase: self.phase.label(),
            });
        }
        if !matches!(self.phase, Phase::Idle | Phase::BothInputsSelected) {
            return Err(SessionError::InvalidPhase {
                action: "select blend tracks",
                phase: self.phase.label(),
            });
        }
        self.blend_inputs = Some((primary, backing));
        self.final_artifact = None;
        self.phase = Phase::BothInputsSelected;
        Ok(())
    }

    /// `InputSelected → Separating`. Returns the submission parameters; the
    /// caller performs the actual request and attaches the job id.
    pub fn begin_separation(&mut self) -> Result<SeparationRequest, SessionError> {
        if self.job_in_flight.is_some() {
            return Err(SessionError::JobInFlight);
        }
        if self.mode != Mode::Single || self.phase != Phase::InputSelected {
            return Err(SessionError::InvalidPhase {
                action: "start separation",
                phase: self.phase.label(),
            });
        }
        let input = self.input.clone().ok_or(SessionError::MissingInput)?;
        self.phase = Phase::Separating;
        Ok(SeparationRequest { input, tier: self.tier })
    }

    /// The turbo escape: from `StemsReady` with a turbo preview, reprocess
    /// the original input at full fidelity. The preview stems are replaced
    /// when the new job completes.
    pub fn reprocess_full(&mut self) -> Result<SeparationRequest, SessionError> {
        if self.job_in_flight.is_some() {
            return Err(SessionError::JobInFlight);
        }
        if self.phase != Phase::StemsReady || self.tier != Tier::Turbo {
            return Err(SessionError::InvalidPhase {
                action: "reprocess at full quality",
                phase: self.phase.label(),
            });
        }
        let input = self.input.clone().ok_or(SessionError::MissingInput)?;
        self.tier = Tier::Full;
        self.phase = Phase::Separating;
        Ok(SeparationRequest { input, tier: self.tier })
    }

    /// Records the outstanding job once the worker has issued a task id.
    /// Exactly one job may be in flight per session; a second attach is
    /// rejected no matter what the UI allowed.
    pub fn attach_job(&mut self, task_id: &str) -> Result<(), SessionError> {
        if self.job_in_flight.is_some() {
            return Err(SessionError::JobInFlight);
        }
        if !self.phase.is_busy() {
            return Err(SessionError::InvalidPhase {
                action: "attach a job",
                phase: self.phase.label(),
            });
        }
        self.job_in_flight = Some(task_id.to_string());
        Ok(())
    }

    /// `Separating → StemsReady`, replacing any previous stems reference.
    pub fn separation_succeeded(&mut self, stems_dir: String) -> Result<(), SessionError> {
        if self.phase != Phase::Separating {
            return Err(SessionError::InvalidPhase {
                action: "finish separation",
                phase: self.phase.label(),
            });
        }
        self.job_in_flight = None;
        self.stems_dir = Some(stems_dir);
        self.phase = Phase::StemsReady;
        Ok(())
    }

    /// `StemsReady → Exporting` (single) or `BothInputsSelected → Exporting`
    /// (blend). A new export always clears the previous artifact first.
    pub fn begin_export(&mut self) -> Result<(), SessionError> {
        if self.job_in_flight.is_some() {
            return Err(SessionError::JobInFlight);
        }
        match (self.mode, &self.phase) {
            (Mode::Single, Phase::StemsReady) | (Mode::Blend, Phase::BothInputsSelected) => {}
            _ => {
                return Err(SessionError::InvalidPhase {
                    action: "export",
                    phase: self.phase.label(),
                })
            }
        }
        self.final_artifact = None;
        self.phase = Phase::Exporting;
        Ok(())
    }

    /// `Exporting → Complete`. The artifact's presence is the sole terminal
    /// "session complete" signal.
    pub fn export_succeeded(&mut self, artifact: ArtifactRef) -> Result<(), SessionError> {
        if self.phase != Phase::Exporting {
            return Err(SessionError::InvalidPhase {
                action: "finish export",
                phase: self.phase.label(),
            });
        }
        self.job_in_flight = None;
        self.final_artifact = Some(artifact);
        self.phase = Phase::Complete;
        Ok(())
    }

    /// Terminal failure from either busy phase, with the message surfaced
    /// to the user. Late results for a session that already moved on are
    /// rejected here and discarded by the caller.
    pub fn fail(&mut self, message: String) -> Result<(), SessionError> {
        if !self.phase.is_busy() {
            return Err(SessionError::InvalidPhase {
                action: "record a failure",
                phase: self.phase.label(),
            });
        }
        self.job_in_flight = None;
        self.phase = Phase::Failed(message);
        Ok(())
    }

    /// "Start Over": back to `Idle` from any state, discarding all inputs,
    /// stems, and artifacts. Mood, genre, tier and the blend toggles are
    /// user preferences and survive.
    pub fn reset(&mut self) {
        self.clear_work_state();
    }

    fn clear_work_state(&mut self) {
        self.phase = Phase::Idle;
        self.input = None;
        self.blend_inputs = None;
        self.stems_dir = None;
        self.volumes = StemVolumes::default();
        self.final_artifact = None;
        self.job_in_flight = None;
    }
}

impl Default for WorkflowSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(name: &str) -> TrackInput {
        TrackInput { file_name: name.to_string(), bytes: vec![0, 1, 2, 3] }
    }

    fn session_with_input() -> WorkflowSession {
        let mut session = WorkflowSession::new();
        session.select_input(track("song.wav")).unwrap();
        session
    }

    #[test]
    fn single_path_reaches_complete() {
        let mut session = session_with_input();
        assert_eq!(*session.phase(), Phase::InputSelected);

        let request = session.begin_separation().unwrap();
        assert_eq!(request.input.file_name, "song.wav");
        assert_eq!(request.tier, Tier::Turbo);
        assert_eq!(*session.phase(), Phase::Separating);

        session.attach_job("task-1").unwrap();
        session.separation_succeeded("processed/htdemucs/song".into()).unwrap();
        assert_eq!(*session.phase(), Phase::StemsReady);
        assert_eq!(session.stems_dir(), Some("processed/htdemucs/song"));
        assert!(session.job_in_flight().is_none());

        session.begin_export().unwrap();
        session.export_succeeded(ArtifactRef { file: "out.wav".into() }).unwrap();
        assert_eq!(*session.phase(), Phase::Complete);
        assert_eq!(session.final_artifact().unwrap().file, "out.wav");
    }

    #[test]
    fn at_most_one_job_in_flight() {
        let mut session = session_with_input();
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();

        assert_eq!(session.attach_job("task-2"), Err(SessionError::JobInFlight));
        assert_eq!(session.begin_separation(), Err(SessionError::JobInFlight));
        assert_eq!(session.begin_export(), Err(SessionError::JobInFlight));
    }

    #[test]
    fn separation_failure_surfaces_the_message() {
        let mut session = session_with_input();
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();
        session.fail("demucs exploded".into()).unwrap();
        assert_eq!(*session.phase(), Phase::Failed("demucs exploded".into()));
        assert!(session.job_in_flight().is_none());
    }

    #[test]
    fn mode_switch_requires_idle_or_terminal() {
        let mut session = session_with_input();
        session.begin_separation().unwrap();
        assert!(matches!(
            session.set_mode(Mode::Blend),
            Err(SessionError::InvalidPhase { .. })
        ));

        session.fail("boom".into()).unwrap();
        session.set_mode(Mode::Blend).unwrap();
        assert_eq!(*session.phase(), Phase::Idle);
        assert!(session.input().is_none());
        assert!(session.final_artifact().is_none());
    }

    #[test]
    fn turbo_escape_forces_full_tier() {
        let mut session = session_with_input();
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();
        session.separation_succeeded("stems".into()).unwrap();

        let request = session.reprocess_full().unwrap();
        assert_eq!(request.tier, Tier::Full);
        assert_eq!(session.tier(), Tier::Full);
        assert_eq!(*session.phase(), Phase::Separating);

        // The preview stems are replaced once the full job lands.
        session.attach_job("task-2").unwrap();
        session.separation_succeeded("stems-full".into()).unwrap();
        assert_eq!(session.stems_dir(), Some("stems-full"));
    }

    #[test]
    fn reprocess_is_only_reachable_from_a_turbo_preview() {
        let mut session = WorkflowSession::new();
        session.set_tier(Tier::Fast).unwrap();
        session.select_input(track("song.wav")).unwrap();
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();
        session.separation_succeeded("stems".into()).unwrap();
        assert!(matches!(
            session.reprocess_full(),
            Err(SessionError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn blend_path_reaches_complete_and_failed() {
        let mut session = WorkflowSession::new();
        session.set_mode(Mode::Blend).unwrap();
        session.set_smart_remix(false);
        session.set_blend_ratio(0.3).unwrap();
        session.select_blend_inputs(track("vocal.wav"), track("beat.wav")).unwrap();
        assert_eq!(*session.phase(), Phase::BothInputsSelected);

        session.begin_export().unwrap();
        assert_eq!(*session.phase(), Phase::Exporting);
        session.fail("bad ratio".into()).unwrap();
        assert_eq!(*session.phase(), Phase::Failed("bad ratio".into()));

        // Re-trigger after an explicit reset.
        session.reset();
        session.select_blend_inputs(track("vocal.wav"), track("beat.wav")).unwrap();
        session.begin_export().unwrap();
        session.export_succeeded(ArtifactRef { file: "mix.wav".into() }).unwrap();
        assert_eq!(*session.phase(), Phase::Complete);
    }

    #[test]
    fn blend_ratio_is_validated() {
        let mut session = WorkflowSession::new();
        assert_eq!(session.set_blend_ratio(1.2), Err(SessionError::InvalidBlendRatio));
        session.set_blend_ratio(1.0).unwrap();
        assert_eq!(session.blend_ratio(), 1.0);
    }

    #[test]
    fn reset_is_idempotent_and_leaves_no_residue() {
        let mut session = session_with_input();
        session.set_volume(Stem::Drums, 0.5);
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();
        session.separation_succeeded("stems".into()).unwrap();
        session.begin_export().unwrap();
        session.export_succeeded(ArtifactRef { file: "out.wav".into() }).unwrap();

        session.reset();
        assert_eq!(*session.phase(), Phase::Idle);
        assert!(session.stems_dir().is_none());
        assert!(session.final_artifact().is_none());
        assert!(session.input().is_none());
        assert_eq!(session.volumes(), StemVolumes::default());

        // Re-selecting the same mode reproduces the same opening path.
        session.set_mode(Mode::Single).unwrap();
        session.select_input(track("song.wav")).unwrap();
        assert_eq!(*session.phase(), Phase::InputSelected);
        session.reset();
        session.reset();
        assert_eq!(*session.phase(), Phase::Idle);
    }

    #[test]
    fn late_results_after_reset_are_rejected() {
        let mut session = session_with_input();
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();
        session.reset();

        assert!(session.separation_succeeded("stems".into()).is_err());
        assert!(session.fail("too late".into()).is_err());
        assert_eq!(*session.phase(), Phase::Idle);
    }
}
