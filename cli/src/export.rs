use crate::api::Client;
use crate::error::{OrchestrationError, SessionError, Stage};
use crate::session::{Mode, WorkflowSession};
use crate::types::{ArtifactRef, MixRequest, MixResponse, Tier, TrackInput};

/// Which remote operation an export will invoke, decided at export time.
/// The synchronous/asynchronous split mirrors the worker contract: bounded
/// mix/overlay steps resolve in one request, anything that may run a full
/// separation becomes a polled job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportDispatch {
    /// Synchronous mix-and-master of separated stems. Not polled.
    MixStems(MixRequest),
    /// Asynchronous separation-and-overlay job, polled until terminal.
    SmartBlend {
        primary: TrackInput,
        backing: TrackInput,
        mood: String,
        genre: String,
        tier: Tier,
    },
    /// Synchronous two-track ratio blend. Not polled.
    RatioBlend {
        primary: TrackInput,
        backing: TrackInput,
        blend_ratio: f32,
        mood: String,
        genre: String,
    },
}

impl ExportDispatch {
    pub fn stage(&self) -> Stage {
        match self {
            Self::MixStems(_) => Stage::Mixing,
            Self::SmartBlend { .. } | Self::RatioBlend { .. } => Stage::Blending,
        }
    }

    /// True only for the dispatch that produces a job id and a polling loop.
    pub fn is_polled(&self) -> bool {
        matches!(self, Self::SmartBlend { .. })
    }
}

/// Reads the dispatch table off the session without mutating it. The caller
/// moves the session into `Exporting` separately, so a planning failure
/// leaves the state machine untouched.
pub fn plan(session: &WorkflowSession) -> Result<ExportDispatch, SessionError> {
    match session.mode() {
        Mode::Single => {
            let stems_dir = session
                .stems_dir()
                .ok_or(SessionError::MissingInput)?
                .to_string();
            Ok(ExportDispatch::MixStems(MixRequest {
                stems_dir,
                volumes: session.volumes(),
                mood: session.mood().to_string(),
                genre: session.genre().to_string(),
            }))
        }
        Mode::Blend => {
            let (primary, backing) =
                session.blend_inputs().cloned().ok_or(SessionError::MissingInput)?;
            if session.smart_remix() {
                Ok(ExportDispatch::SmartBlend {
                    primary,
                    backing,
                    mood: session.mood().to_string(),
                    genre: session.genre().to_string(),
                    tier: session.tier(),
                })
            } else {
                Ok(ExportDispatch::RatioBlend {
                    primary,
                    backing,
                    blend_ratio: session.blend_ratio(),
                    mood: session.mood().to_string(),
                    genre: session.genre().to_string(),
                })
            }
        }
    }
}

/// Result of launching a dispatch: the synchronous paths resolve to an
/// artifact (or failure) directly, the smart blend hands back a task id to
/// watch.
#[derive(Debug, PartialEq)]
pub enum ExportLaunch {
    Finished(Result<ArtifactRef, OrchestrationError>),
    Watch { task_id: String },
}

pub async fn launch(client: &Client, dispatch: ExportDispatch) -> ExportLaunch {
    match dispatch {
        ExportDispatch::MixStems(request) => {
            let outcome = match client.mix_stems(&request).await {
                Ok(response) => artifact_from_mix(Stage::Mixing, response),
                Err(err) => Err(OrchestrationError::dispatch(Stage::Mixing, Some(err.to_string()))),
            };
            ExportLaunch::Finished(outcome)
        }
        ExportDispatch::RatioBlend { primary, backing, blend_ratio, mood, genre } => {
            let outcome = match client
                .blend_tracks(&primary, &backing, blend_ratio, &mood, &genre)
                .await
            {
                Ok(response) => artifact_from_mix(Stage::Blending, response),
                Err(err) => {
                    Err(OrchestrationError::dispatch(Stage::Blending, Some(err.to_string())))
                }
            };
            ExportLaunch::Finished(outcome)
        }
        ExportDispatch::SmartBlend { primary, backing, mood, genre, tier } => {
            let submitted = client
                .submit_smart_blend(&primary, &backing, &mood, &genre, tier.flags())
                .await;
            match submitted {
                Ok(response) => match response.into_task_id(Stage::Blending) {
                    Ok(task_id) => ExportLaunch::Watch { task_id },
                    Err(err) => ExportLaunch::Finished(Err(err)),
                },
                Err(err) => ExportLaunch::Finished(Err(OrchestrationError::submission(
                    Stage::Blending,
                    Some(err.to_string()),
                ))),
            }
        }
    }
}

/// Maps a synchronous mix response onto an artifact reference. A missing
/// file on a "success" status still counts as a dispatch failure.
pub fn artifact_from_mix(
    stage: Stage,
    response: MixResponse,
) -> Result<ArtifactRef, OrchestrationError> {
    if response.status == "success" {
        if let Some(file) = response.file {
            return Ok(ArtifactRef { file });
        }
    }
    Err(OrchestrationError::dispatch(stage, response.message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Stem, TrackInput};

    fn track(name: &str) -> TrackInput {
        TrackInput { file_name: name.to_string(), bytes: vec![1, 2, 3] }
    }

    fn single_session_with_stems() -> WorkflowSession {
        let mut session = WorkflowSession::new();
        session.select_input(track("song.wav")).unwrap();
        session.begin_separation().unwrap();
        session.attach_job("task-1").unwrap();
        session.separation_succeeded("processed/htdemucs/song".into()).unwrap();
        session
    }

    #[test]
    fn single_mode_plans_a_synchronous_stem_mix() {
        let mut session = single_session_with_stems();
        session.set_volume(Stem::Drums, 0.5);
        session.set_mood("Happy".into());
        session.set_genre("Pop".into());

        let dispatch = plan(&session).unwrap();
        assert!(!dispatch.is_polled());
        assert_eq!(dispatch.stage(), Stage::Mixing);
        match dispatch {
            ExportDispatch::MixStems(request) => {
                assert_eq!(request.stems_dir, "processed/htdemucs/song");
                assert_eq!(request.volumes.drums, 0.5);
                assert_eq!(request.volumes.vocals, 1.0);
                assert_eq!(request.mood, "Happy");
                assert_eq!(request.genre, "Pop");
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn smart_blend_plans_a_polled_job_with_tier_flags() {
        let mut session = WorkflowSession::new();
        session.set_mode(Mode::Blend).unwrap();
        session.set_tier(Tier::Fast).unwrap();
        session.select_blend_inputs(track("vocal.wav"), track("beat.wav")).unwrap();

        let dispatch = plan(&session).unwrap();
        assert!(dispatch.is_polled());
        match dispatch {
            ExportDispatch::SmartBlend { tier, primary, backing, .. } => {
                assert_eq!(tier, Tier::Fast);
                assert!(tier.flags().fast_mode);
                assert!(!tier.flags().turbo_mode);
                assert_eq!(primary.file_name, "vocal.wav");
                assert_eq!(backing.file_name, "beat.wav");
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn ratio_blend_is_synchronous_and_carries_the_ratio() {
        let mut session = WorkflowSession::new();
        session.set_mode(Mode::Blend).unwrap();
        session.set_smart_remix(false);
        session.set_blend_ratio(0.3).unwrap();
        session.select_blend_inputs(track("vocal.wav"), track("beat.wav")).unwrap();

        let dispatch = plan(&session).unwrap();
        assert!(!dispatch.is_polled());
        assert_eq!(dispatch.stage(), Stage::Blending);
        match dispatch {
            ExportDispatch::RatioBlend { blend_ratio, .. } => assert_eq!(blend_ratio, 0.3),
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[test]
    fn ratio_blend_failure_keeps_the_server_message() {
        let response =
            MixResponse { status: "error".into(), file: None, message: Some("bad ratio".into()) };
        let err = artifact_from_mix(Stage::Blending, response).unwrap_err();
        assert_eq!(err.user_message(), "bad ratio");

        // The session surfaces the exact message.
        let mut session = WorkflowSession::new();
        session.set_mode(Mode::Blend).unwrap();
        session.set_smart_remix(false);
        session.select_blend_inputs(track("a.wav"), track("b.wav")).unwrap();
        session.begin_export().unwrap();
        session.fail(err.user_message().to_string()).unwrap();
        assert_eq!(
            *session.phase(),
            crate::session::Phase::Failed("bad ratio".into())
        );
    }

    #[test]
    fn mix_success_without_a_file_is_a_dispatch_failure() {
        let response = MixResponse { status: "success".into(), file: None, message: None };
        let err = artifact_from_mix(Stage::Mixing, response).unwrap_err();
        assert_eq!(err.user_message(), "mixing failed");
    }

    #[test]
    fn mix_success_completes_the_session() {
        let response = MixResponse {
            status: "success".into(),
            file: Some("out.wav".into()),
            message: None,
        };
        let artifact = artifact_from_mix(Stage::Mixing, response).unwrap();

        let mut session = single_session_with_stems();
        session.begin_export().unwrap();
        session.export_succeeded(artifact).unwrap();
        assert_eq!(*session.phase(), crate::session::Phase::Complete);
        assert_eq!(session.final_artifact().unwrap().file, "out.wav");
    }

    #[test]
    fn planning_without_stems_is_rejected() {
        let mut session = WorkflowSession::new();
        session.select_input(track("song.wav")).unwrap();
        assert_eq!(plan(&session), Err(SessionError::MissingInput));
    }
}
