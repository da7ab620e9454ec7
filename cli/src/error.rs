use std::fmt;
use thiserror::Error;

/// Pipeline stage names used in user-facing fallback messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generation,
    Separation,
    Mixing,
    Blending,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generation => "generation",
            Self::Separation => "separation",
            Self::Mixing => "mixing",
            Self::Blending => "blending",
        };
        f.write_str(name)
    }
}

/// Failures that cross the session boundary. Poll transport failures are
/// absorbed inside the watcher and never become one of these; everything
/// here is surfaced to the session exactly once.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    /// The initiating request produced no task id.
    #[error("{stage} submission failed: {message}")]
    Submission { stage: Stage, message: String },

    /// The remote job reached a terminal `error` state.
    #[error("{stage} job failed: {message}")]
    Job { stage: Stage, message: String },

    /// A synchronous export path returned a non-success status or failed on
    /// transport.
    #[error("{stage} dispatch failed: {message}")]
    ExportDispatch { stage: Stage, message: String },
}

impl OrchestrationError {
    pub fn submission(stage: Stage, message: Option<String>) -> Self {
        let message = non_empty(message).unwrap_or_else(|| format!("failed to start {stage}"));
        Self::Submission { stage, message }
    }

    pub fn job(stage: Stage, message: Option<String>) -> Self {
        let message = non_empty(message).unwrap_or_else(|| format!("{stage} failed"));
        Self::Job { stage, message }
    }

    pub fn dispatch(stage: Stage, message: Option<String>) -> Self {
        let message = non_empty(message).unwrap_or_else(|| format!("{stage} failed"));
        Self::ExportDispatch { stage, message }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Submission { stage, .. } | Self::Job { stage, .. } | Self::ExportDispatch { stage, .. } => *stage,
        }
    }

    /// The text shown to the user: the server message verbatim when one was
    /// supplied, otherwise a generic message naming the failed stage.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Submission { message, .. }
            | Self::Job { message, .. }
            | Self::ExportDispatch { message, .. } => message,
        }
    }
}

fn non_empty(message: Option<String>) -> Option<String> {
    message.filter(|text| !text.trim().is_empty())
}

/// Rejected state-machine transitions. These never leave the client; they
/// guard against actions fired from the wrong phase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a job is already in flight for this session")]
    JobInFlight,

    #[error("cannot {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: &'static str },

    #[error("no input track selected")]
    MissingInput,

    #[error("mood, genre and language are all required")]
    MissingTags,

    #[error("blend ratio must be within 0.0..=1.0")]
    InvalidBlendRatio,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_is_kept_verbatim() {
        let err = OrchestrationError::dispatch(Stage::Blending, Some("bad ratio".to_string()));
        assert_eq!(err.user_message(), "bad ratio");
        assert_eq!(err.stage(), Stage::Blending);
    }

    #[test]
    fn fallback_message_names_the_stage() {
        let err = OrchestrationError::job(Stage::Separation, None);
        assert_eq!(err.user_message(), "separation failed");
        let err = OrchestrationError::submission(Stage::Generation, Some("  ".to_string()));
        assert_eq!(err.user_message(), "failed to start generation");
    }
}
