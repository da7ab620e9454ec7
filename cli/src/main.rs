use anyhow::{anyhow, Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use rodio::{Decoder, OutputStream, Sink};
use std::{
    fs,
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};
use tracing::{error, info, warn};

mod api;
mod app;
mod config;
mod error;
mod export;
mod health;
mod prefs;
mod session;
mod types;
mod ui;
mod watcher;

use app::{AppCommand, AppEvent, AppState, JobKind};
use config::AppConfig;
use error::{OrchestrationError, Stage};
use export::{ExportDispatch, ExportLaunch};
use session::SeparationRequest;
use types::GenerationRequest;
use watcher::{JobHandle, JobOutcome, WatchEvent};

struct AudioPlayer {
    _stream: OutputStream,
    handle: rodio::OutputStreamHandle,
    sink: Option<Sink>,
}

unsafe impl Send for AudioPlayer {}
unsafe impl Sync for AudioPlayer {}

impl AudioPlayer {
    fn new() -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("failed to open audio output")?;
        Ok(Self { _stream: stream, handle, sink: None })
    }

    fn play(&mut self, path: &Path) -> Result<()> {
        self.stop();
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let decoder = Decoder::new(BufReader::new(file)).context("failed to decode audio")?;
        let sink = Sink::try_new(&self.handle).context("failed to create audio sink")?;
        sink.append(decoder);
        sink.play();
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    info!("starting moodmix CLI");

    let config = AppConfig::load()?;
    let client = api::Client::new(config.worker_url())?;
    info!("worker at {}", client.base_url());

    let (event_tx, mut event_rx) = unbounded_channel();
    let (command_tx, command_rx) = unbounded_channel();

    let controller = Controller::new(client.clone(), event_tx.clone(), config.clone())?;
    controller.spawn(command_rx);

    let mut app_state = AppState::new();
    match prefs::load_snapshot() {
        Ok(Some(snapshot)) => app_state.apply_prefs(&snapshot),
        Ok(None) => {}
        Err(err) => warn!("failed to load preferences: {err}"),
    }
    let _ = command_tx.send(AppCommand::CheckHealth);

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    enable_raw_mode()?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let ui_result = ui::run(&mut terminal, &mut app_state, &mut event_rx, command_tx.clone());

    if let Err(err) = prefs::save_snapshot(&app_state.prefs_snapshot()) {
        warn!("failed to save preferences: {err}");
    }

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;

    ui_result
}

fn setup_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err: Box<dyn std::error::Error + Send + Sync>| {
            anyhow!("failed to initialise tracing: {err}")
        })?;
    Ok(())
}

struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    client: api::Client,
    event_tx: UnboundedSender<AppEvent>,
    config: AppConfig,
    // One outstanding loop per workflow session, plus one for the
    // independent generation flow. Health checks own no slot at all.
    active_job: Mutex<Option<JobHandle>>,
    active_generation: Mutex<Option<JobHandle>>,
    player: Mutex<AudioPlayer>,
}

impl Controller {
    fn new(
        client: api::Client,
        event_tx: UnboundedSender<AppEvent>,
        config: AppConfig,
    ) -> Result<Self> {
        let player = AudioPlayer::new()?;
        let inner = ControllerInner {
            client,
            event_tx,
            config,
            active_job: Mutex::new(None),
            active_generation: Mutex::new(None),
            player: Mutex::new(player),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    fn spawn(self, mut command_rx: UnboundedReceiver<AppCommand>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let Err(err) = Controller::handle_command(inner.clone(), command).await {
                    error!("command error: {err}");
                    let _ = inner.event_tx.send(AppEvent::Error(format!("{err}")));
                }
            }
        });
    }

    async fn handle_command(inner: Arc<ControllerInner>, command: AppCommand) -> Result<()> {
        match command {
            AppCommand::CheckHealth => {
                let state = health::check(&inner.client).await;
                let _ = inner.event_tx.send(AppEvent::Connectivity(state));
            }
            AppCommand::SubmitSeparation { request } => {
                Controller::submit_separation(inner, request).await;
            }
            AppCommand::Export { dispatch } => {
                Controller::run_export(inner, dispatch).await;
            }
            AppCommand::SubmitGeneration { request } => {
                Controller::submit_generation(inner, request).await;
            }
            AppCommand::CancelJob => {
                Controller::cancel_job(inner).await;
            }
            AppCommand::SaveArtifact { file } => {
                Controller::save_artifact(inner, file).await?;
            }
            AppCommand::PlayArtifact { path } => {
                Controller::play_artifact(inner, path).await;
            }
            AppCommand::StopPlayback => {
                inner.player.lock().await.stop();
            }
        }
        Ok(())
    }

    fn slot(inner: &ControllerInner, kind: JobKind) -> &Mutex<Option<JobHandle>> {
        match kind {
            JobKind::Generation => &inner.active_generation,
            _ => &inner.active_job,
        }
    }

    async fn slot_outstanding(inner: &ControllerInner, kind: JobKind) -> bool {
        Self::slot(inner, kind)
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Rejects the submission if its slot already has a live loop. The
    /// session layer guards this too; the duplicate check here keeps the
    /// invariant even if the UI misbehaves.
    async fn reject_if_busy(inner: &Arc<ControllerInner>, kind: JobKind) -> bool {
        if Self::slot_outstanding(inner, kind).await {
            let _ = inner.event_tx.send(AppEvent::JobFailed {
                kind,
                task_id: String::new(),
                message: format!("a {} job is already in flight", kind.label()),
            });
            return true;
        }
        false
    }

    async fn submit_separation(inner: Arc<ControllerInner>, request: SeparationRequest) {
        if Self::reject_if_busy(&inner, JobKind::Separation).await {
            return;
        }
        let detail = request.input.file_name.clone();
        let submitted = inner.client.submit_separation(&request.input, request.tier.flags()).await;
        let task_id = match submitted
            .map_err(|err| OrchestrationError::submission(Stage::Separation, Some(err.to_string())))
            .and_then(|response| response.into_task_id(Stage::Separation))
        {
            Ok(task_id) => task_id,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::JobFailed {
                    kind: JobKind::Separation,
                    task_id: String::new(),
                    message: err.user_message().to_string(),
                });
                return;
            }
        };
        let _ = inner.event_tx.send(AppEvent::JobQueued {
            kind: JobKind::Separation,
            task_id: task_id.clone(),
            detail,
        });
        Controller::watch(inner, JobKind::Separation, task_id).await;
    }

    async fn run_export(inner: Arc<ControllerInner>, dispatch: ExportDispatch) {
        if dispatch.is_polled() && Self::reject_if_busy(&inner, JobKind::SmartBlend).await {
            return;
        }
        let detail = match &dispatch {
            ExportDispatch::SmartBlend { primary, backing, .. } => {
                format!("{} + {}", primary.file_name, backing.file_name)
            }
            _ => String::new(),
        };
        match export::launch(&inner.client, dispatch).await {
            ExportLaunch::Finished(Ok(artifact)) => {
                let _ = inner.event_tx.send(AppEvent::ExportReady { task_id: None, artifact });
            }
            ExportLaunch::Finished(Err(err)) => {
                let _ = inner
                    .event_tx
                    .send(AppEvent::ExportFailed { message: err.user_message().to_string() });
            }
            ExportLaunch::Watch { task_id } => {
                let _ = inner.event_tx.send(AppEvent::JobQueued {
                    kind: JobKind::SmartBlend,
                    task_id: task_id.clone(),
                    detail,
                });
                Controller::watch(inner, JobKind::SmartBlend, task_id).await;
            }
        }
    }

    async fn submit_generation(inner: Arc<ControllerInner>, request: GenerationRequest) {
        if Self::reject_if_busy(&inner, JobKind::Generation).await {
            return;
        }
        let detail = format!("{} {} ({})", request.mood, request.genre, request.language);
        let submitted = inner
            .client
            .submit_generation(&request.mood, &request.genre, &request.language)
            .await;
        let task_id = match submitted
            .map_err(|err| OrchestrationError::submission(Stage::Generation, Some(err.to_string())))
            .and_then(|response| response.into_task_id(Stage::Generation))
        {
            Ok(task_id) => task_id,
            Err(err) => {
                let _ = inner.event_tx.send(AppEvent::JobFailed {
                    kind: JobKind::Generation,
                    task_id: String::new(),
                    message: err.user_message().to_string(),
                });
                return;
            }
        };
        let _ = inner.event_tx.send(AppEvent::JobQueued {
            kind: JobKind::Generation,
            task_id: task_id.clone(),
            detail,
        });
        Controller::watch(inner, JobKind::Generation, task_id).await;
    }

    /// Starts the polling loop for a submitted job and the forwarder that
    /// translates its events for the UI.
    async fn watch(inner: Arc<ControllerInner>, kind: JobKind, task_id: String) {
        let (watch_tx, watch_rx) = unbounded_channel();
        let poll_client = inner.client.clone();
        let poll_id = task_id.clone();
        let handle = watcher::spawn(
            task_id.clone(),
            inner.config.poll_interval(),
            move || {
                let client = poll_client.clone();
                let id = poll_id.clone();
                async move { client.task_status(&id).await }
            },
            watch_tx,
        );

        {
            let mut slot = Self::slot(&inner, kind).lock().await;
            if let Some(previous) = slot.replace(handle) {
                // A fresh submission supersedes whatever loop was left behind.
                previous.teardown();
            }
        }

        Controller::spawn_forwarder(inner, kind, watch_rx);
    }

    fn spawn_forwarder(
        inner: Arc<ControllerInner>,
        kind: JobKind,
        mut watch_rx: UnboundedReceiver<WatchEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = watch_rx.recv().await {
                match event {
                    WatchEvent::Progress { job_id, attempt, label } => {
                        let _ = inner.event_tx.send(AppEvent::JobProgress {
                            kind,
                            task_id: job_id,
                            attempt,
                            label,
                        });
                    }
                    WatchEvent::Terminal { job_id, outcome } => {
                        {
                            let mut slot = Self::slot(&inner, kind).lock().await;
                            if slot.as_ref().map(|handle| handle.job_id() == job_id).unwrap_or(false)
                            {
                                *slot = None;
                            }
                        }
                        Controller::deliver_terminal(&inner, kind, job_id, outcome);
                        break;
                    }
                }
            }
        });
    }

    fn deliver_terminal(
        inner: &Arc<ControllerInner>,
        kind: JobKind,
        task_id: String,
        outcome: JobOutcome,
    ) {
        let event = match (kind, outcome) {
            (JobKind::Separation, JobOutcome::Completed(status)) => {
                match status.separation_stems() {
                    Ok(stems_dir) => AppEvent::SeparationReady { task_id, stems_dir },
                    Err(err) => AppEvent::JobFailed {
                        kind,
                        task_id,
                        message: err.user_message().to_string(),
                    },
                }
            }
            (JobKind::SmartBlend, JobOutcome::Completed(status)) => {
                match status.artifact_file(Stage::Blending) {
                    Ok(artifact) => AppEvent::ExportReady { task_id: Some(task_id), artifact },
                    Err(err) => AppEvent::JobFailed {
                        kind,
                        task_id,
                        message: err.user_message().to_string(),
                    },
                }
            }
            (JobKind::Generation, JobOutcome::Completed(status)) => {
                match status.artifact_file(Stage::Generation) {
                    Ok(artifact) => AppEvent::GenerationReady { task_id, artifact },
                    Err(err) => AppEvent::JobFailed {
                        kind,
                        task_id,
                        message: err.user_message().to_string(),
                    },
                }
            }
            (_, JobOutcome::Failed(message)) => AppEvent::JobFailed { kind, task_id, message },
        };
        let _ = inner.event_tx.send(event);
    }

    async fn cancel_job(inner: Arc<ControllerInner>) {
        let mut slot = inner.active_job.lock().await;
        if let Some(handle) = slot.take() {
            handle.teardown();
            info!("tore down job {}", handle.job_id());
        }
    }

    async fn save_artifact(inner: Arc<ControllerInner>, file: String) -> Result<()> {
        let bytes = inner.client.download(&file).await.context("failed to download artifact")?;
        let dir = inner.config.artifact_dir().clone();
        let name = file.clone();
        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create artifact dir {}", dir.display()))?;
            let path = dir.join(&name);
            fs::write(&path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(path)
        })
        .await
        .context("artifact save task panicked")??;
        let _ = inner.event_tx.send(AppEvent::ArtifactSaved { path });
        Ok(())
    }

    async fn play_artifact(inner: Arc<ControllerInner>, path: PathBuf) {
        let mut player = inner.player.lock().await;
        if let Err(err) = player.play(&path) {
            let _ = inner
                .event_tx
                .send(AppEvent::Error(format!("failed to play {}: {err}", path.display())));
        } else {
            let _ = inner.event_tx.send(AppEvent::Info(format!("Playing {}", path.display())));
        }
    }
}
