use crate::app::{AppCommand, AppEvent, AppState, PendingPrompt, Screen};
use crate::export;
use crate::session::{Mode, Phase};
use crate::types::{Stem, Tier, TrackInput};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const VOLUME_STEP: f32 = 0.05;
const RATIO_STEP: f32 = 0.05;

pub fn run<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    event_rx: &mut UnboundedReceiver<AppEvent>,
    command_tx: UnboundedSender<AppCommand>,
) -> Result<()> {
    loop {
        while let Ok(event) = event_rx.try_recv() {
            app.handle_event(event);
        }

        terminal.draw(|frame| draw(frame, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if handle_key(app, key.code, &command_tx) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Returns true when the user asked to quit.
fn handle_key(app: &mut AppState, code: KeyCode, command_tx: &UnboundedSender<AppCommand>) -> bool {
    if app.prompt.is_some() {
        match code {
            KeyCode::Char(c) => app.input.push(c),
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Esc => {
                app.prompt = None;
                app.input.clear();
            }
            KeyCode::Enter => commit_prompt(app),
            _ => {}
        }
        return false;
    }

    match code {
        KeyCode::Char('q') => return true,
        KeyCode::Tab => {
            app.screen = match app.screen {
                Screen::Remix => Screen::Generate,
                Screen::Generate => Screen::Remix,
            };
        }
        KeyCode::Char('c') => {
            let _ = command_tx.send(AppCommand::CheckHealth);
        }
        KeyCode::Char('r') => {
            app.start_over();
            let _ = command_tx.send(AppCommand::CancelJob);
            app.push_status_line("Started over".to_string());
        }
        KeyCode::Char('o') => start_prompt(app, PendingPrompt::Mood),
        KeyCode::Char('g') => start_prompt(app, PendingPrompt::Genre),
        KeyCode::Char('d') => save_artifact(app, command_tx),
        KeyCode::Char('p') => match &app.last_saved {
            Some(path) => {
                let _ = command_tx.send(AppCommand::PlayArtifact { path: path.clone() });
            }
            None => app.push_status_line("Nothing saved yet — press d first".to_string()),
        },
        KeyCode::Char('x') => {
            let _ = command_tx.send(AppCommand::StopPlayback);
        }
        _ => match app.screen {
            Screen::Remix => handle_remix_key(app, code, command_tx),
            Screen::Generate => handle_generate_key(app, code, command_tx),
        },
    }
    false
}

fn handle_remix_key(app: &mut AppState, code: KeyCode, command_tx: &UnboundedSender<AppCommand>) {
    match code {
        KeyCode::Char('m') => {
            let next = match app.session.mode() {
                Mode::Single => Mode::Blend,
                Mode::Blend => Mode::Single,
            };
            let result = app.session.set_mode(next);
            report(app, result);
        }
        KeyCode::Char('1') => {
            let result = app.session.set_tier(Tier::Turbo);
            report(app, result);
        }
        KeyCode::Char('2') => {
            let result = app.session.set_tier(Tier::Fast);
            report(app, result);
        }
        KeyCode::Char('3') => {
            let result = app.session.set_tier(Tier::Full);
            report(app, result);
        }
        KeyCode::Char('s') => {
            let next = !app.session.smart_remix();
            app.session.set_smart_remix(next);
        }
        KeyCode::Char('[') => {
            let ratio = (app.session.blend_ratio() - RATIO_STEP).max(0.0);
            let _ = app.session.set_blend_ratio(ratio);
        }
        KeyCode::Char(']') => {
            let ratio = (app.session.blend_ratio() + RATIO_STEP).min(1.0);
            let _ = app.session.set_blend_ratio(ratio);
        }
        KeyCode::Char('i') => match app.session.mode() {
            Mode::Single => start_prompt(app, PendingPrompt::SingleInput),
            Mode::Blend => start_prompt(app, PendingPrompt::BlendPrimary),
        },
        KeyCode::Char('f') => match app.session.reprocess_full() {
            Ok(request) => {
                app.push_status_line("Reprocessing the original at full quality".to_string());
                let _ = command_tx.send(AppCommand::SubmitSeparation { request });
            }
            Err(err) => app.push_status_line(format!("Error: {err}")),
        },
        KeyCode::Up => {
            app.selected_stem = app.selected_stem.checked_sub(1).unwrap_or(Stem::ALL.len() - 1);
        }
        KeyCode::Down => {
            app.selected_stem = (app.selected_stem + 1) % Stem::ALL.len();
        }
        KeyCode::Left => {
            let stem = Stem::ALL[app.selected_stem];
            app.session.adjust_volume(stem, -VOLUME_STEP);
        }
        KeyCode::Right => {
            let stem = Stem::ALL[app.selected_stem];
            app.session.adjust_volume(stem, VOLUME_STEP);
        }
        KeyCode::Enter => run_primary_action(app, command_tx),
        _ => {}
    }
}

fn handle_generate_key(app: &mut AppState, code: KeyCode, command_tx: &UnboundedSender<AppCommand>) {
    match code {
        KeyCode::Char('l') => start_prompt(app, PendingPrompt::Language),
        KeyCode::Enter => {
            if app.generation.busy {
                app.push_status_line("A generation is already running".to_string());
                return;
            }
            match app.generation.request() {
                Ok(request) => {
                    app.generation.busy = true;
                    app.generation.artifact = None;
                    let _ = command_tx.send(AppCommand::SubmitGeneration { request });
                }
                Err(err) => app.push_status_line(format!("Error: {err}")),
            }
        }
        _ => {}
    }
}

/// The Enter key on the remix screen: whatever the current phase makes the
/// obvious next step.
fn run_primary_action(app: &mut AppState, command_tx: &UnboundedSender<AppCommand>) {
    match app.session.phase() {
        Phase::InputSelected => match app.session.begin_separation() {
            Ok(request) => {
                app.push_status_line(format!("Separating with {}", request.tier.label()));
                let _ = command_tx.send(AppCommand::SubmitSeparation { request });
            }
            Err(err) => app.push_status_line(format!("Error: {err}")),
        },
        Phase::StemsReady | Phase::BothInputsSelected => {
            let dispatch = match export::plan(&app.session) {
                Ok(dispatch) => dispatch,
                Err(err) => {
                    app.push_status_line(format!("Error: {err}"));
                    return;
                }
            };
            match app.session.begin_export() {
                Ok(()) => {
                    let _ = command_tx.send(AppCommand::Export { dispatch });
                }
                Err(err) => app.push_status_line(format!("Error: {err}")),
            }
        }
        Phase::Complete => {
            app.push_status_line("Session complete — d to save, r to start over".to_string())
        }
        Phase::Failed(_) => app.push_status_line("Press r to start over".to_string()),
        Phase::Idle => app.push_status_line("Press i to pick an input track".to_string()),
        Phase::Separating | Phase::Exporting => {
            app.push_status_line("Still working on the current job".to_string())
        }
    }
}

fn save_artifact(app: &mut AppState, command_tx: &UnboundedSender<AppCommand>) {
    let artifact = match app.screen {
        Screen::Remix => app.session.final_artifact().cloned(),
        Screen::Generate => app.generation.artifact.clone(),
    };
    match artifact {
        Some(artifact) => {
            let _ = command_tx.send(AppCommand::SaveArtifact { file: artifact.file });
        }
        None => app.push_status_line("No finished artifact to save yet".to_string()),
    }
}

fn start_prompt(app: &mut AppState, prompt: PendingPrompt) {
    app.input.clear();
    app.prompt = Some(prompt);
}

fn commit_prompt(app: &mut AppState) {
    let Some(prompt) = app.prompt.take() else { return };
    let text = app.input.trim().to_string();
    app.input.clear();
    if text.is_empty() {
        app.push_status_line("Cancelled".to_string());
        return;
    }

    match prompt {
        PendingPrompt::SingleInput => match TrackInput::from_path(Path::new(&text)) {
            Ok(track) => {
                let name = track.file_name.clone();
                match app.session.select_input(track) {
                    Ok(()) => app.push_status_line(format!("Loaded {name} — Enter to separate")),
                    Err(err) => app.push_status_line(format!("Error: {err}")),
                }
            }
            Err(err) => app.push_status_line(format!("Error: {err}")),
        },
        PendingPrompt::BlendPrimary => match TrackInput::from_path(Path::new(&text)) {
            Ok(track) => {
                app.push_status_line(format!("Loaded {} as the primary track", track.file_name));
                start_prompt(app, PendingPrompt::BlendBacking { primary: track });
            }
            Err(err) => app.push_status_line(format!("Error: {err}")),
        },
        PendingPrompt::BlendBacking { primary } => {
            match TrackInput::from_path(Path::new(&text)) {
                Ok(backing) => {
                    let name = backing.file_name.clone();
                    match app.session.select_blend_inputs(primary, backing) {
                        Ok(()) => {
                            app.push_status_line(format!("Loaded {name} — Enter to export"))
                        }
                        Err(err) => app.push_status_line(format!("Error: {err}")),
                    }
                }
                Err(err) => app.push_status_line(format!("Error: {err}")),
            }
        }
        PendingPrompt::Mood => match app.screen {
            Screen::Remix => app.session.set_mood(text),
            Screen::Generate => app.generation.mood = text,
        },
        PendingPrompt::Genre => match app.screen {
            Screen::Remix => app.session.set_genre(text),
            Screen::Generate => app.generation.genre = text,
        },
        PendingPrompt::Language => app.generation.language = text,
    }
}

fn report(app: &mut AppState, result: Result<(), crate::error::SessionError>) {
    if let Err(err) = result {
        app.push_status_line(format!("Error: {err}"));
    }
}

fn draw(frame: &mut ratatui::Frame, app: &AppState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(4),
            Constraint::Length(3),
        ])
        .split(frame.size());

    let header = format!(
        " moodmix — {}  |  mode: {}  tier: {}  |  worker: {}",
        match app.screen {
            Screen::Remix => "remix",
            Screen::Generate => "generate",
        },
        app.session.mode().label(),
        app.session.tier().label(),
        app.connectivity.label(),
    );
    frame.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title("moodmix")),
        rows[0],
    );

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
        .split(rows[1]);

    let main_text = match app.screen {
        Screen::Remix => remix_panel(app),
        Screen::Generate => generate_panel(app),
    };
    let main_block = Block::default().borders(Borders::ALL).title(match app.screen {
        Screen::Remix => "Session",
        Screen::Generate => "Generator",
    });
    frame.render_widget(
        Paragraph::new(main_text).block(main_block).wrap(Wrap { trim: false }),
        body[0],
    );

    let jobs_text = if app.jobs.is_empty() {
        "No jobs yet.".to_string()
    } else {
        app.jobs
            .iter()
            .rev()
            .take(12)
            .map(|(id, entry)| {
                format!(
                    "{} {} {} [{}] {}",
                    entry.started_at.format("%H:%M:%S"),
                    entry.kind.label(),
                    id,
                    entry.state_label(),
                    entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    frame.render_widget(
        Paragraph::new(jobs_text).block(Block::default().borders(Borders::ALL).title("Jobs")),
        body[1],
    );

    let status_text = if app.status_lines.is_empty() {
        "Ready.".to_string()
    } else {
        app.status_lines.join("\n")
    };
    frame.render_widget(
        Paragraph::new(status_text).block(Block::default().borders(Borders::ALL).title("Status")),
        rows[2],
    );

    let footer = if let Some(prompt) = &app.prompt {
        format!("Enter {}: {}_   (Esc to cancel)", prompt.label(), app.input)
    } else {
        match app.screen {
            Screen::Remix => {
                "Tab screen · m mode · 1/2/3 tier · i input · Enter run · f full quality · s smart \
                 · [/] ratio · arrows volumes · o mood · g genre · d save · p play · x stop · c health · r start over · q quit"
                    .to_string()
            }
            Screen::Generate => {
                "Tab screen · o mood · g genre · l language · Enter generate · d save · p play · x stop · c health · q quit"
                    .to_string()
            }
        }
    };
    let footer_style = if app.prompt.is_some() {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    frame.render_widget(
        Paragraph::new(footer)
            .style(footer_style)
            .block(Block::default().borders(Borders::ALL)),
        rows[3],
    );
}

fn remix_panel(app: &AppState) -> String {
    let session = &app.session;
    let mut lines = Vec::new();
    lines.push(format!("Phase: {}", session.phase().label()));

    match session.mode() {
        Mode::Single => {
            let input = session
                .input()
                .map(|track| track.file_name.clone())
                .unwrap_or_else(|| "<none — press i>".to_string());
            lines.push(format!("Input: {input}"));
            if let Some(stems_dir) = session.stems_dir() {
                lines.push(format!("Stems: {stems_dir}"));
                lines.push(String::new());
                lines.push("Stem volumes (arrows to adjust):".to_string());
                for (index, stem) in Stem::ALL.iter().enumerate() {
                    let marker = if index == app.selected_stem { ">" } else { " " };
                    let volume = session.volumes().get(*stem);
                    lines.push(format!(
                        "{marker} {:<7} {:>4.0}%",
                        stem.label(),
                        volume * 100.0
                    ));
                }
                if session.tier() == Tier::Turbo {
                    lines.push(String::new());
                    lines.push(
                        "Turbo preview active — press f to reprocess the entire track".to_string(),
                    );
                }
            }
        }
        Mode::Blend => {
            let (primary, backing) = session
                .blend_inputs()
                .map(|(a, b)| (a.file_name.clone(), b.file_name.clone()))
                .unwrap_or_else(|| ("<none>".to_string(), "<none>".to_string()));
            lines.push(format!("Primary: {primary}"));
            lines.push(format!("Backing: {backing}"));
            lines.push(format!(
                "Smart remix: {}",
                if session.smart_remix() { "on" } else { "off (ratio blend)" }
            ));
            if !session.smart_remix() {
                let ratio = session.blend_ratio();
                lines.push(format!(
                    "Balance: {:.0}% primary / {:.0}% backing",
                    (1.0 - ratio) * 100.0,
                    ratio * 100.0
                ));
            }
        }
    }

    lines.push(String::new());
    lines.push(format!("Mood: {}   Genre: {}", session.mood(), session.genre()));

    if let Some(label) = app.progress_label {
        lines.push(String::new());
        lines.push(format!("Working… {label}"));
    }
    if let Phase::Failed(message) = session.phase() {
        lines.push(String::new());
        lines.push(format!("Failed: {message}"));
        lines.push("Press r to start over".to_string());
    }
    if let Some(artifact) = session.final_artifact() {
        lines.push(String::new());
        lines.push(format!("Final mix: {} (d to save, p to play)", artifact.file));
    }

    lines.join("\n")
}

fn generate_panel(app: &AppState) -> String {
    let form = &app.generation;
    let mut lines = Vec::new();
    let field = |value: &str| {
        if value.is_empty() { "<unset>".to_string() } else { value.to_string() }
    };
    lines.push(format!("Mood:     {}", field(&form.mood)));
    lines.push(format!("Genre:    {}", field(&form.genre)));
    lines.push(format!("Language: {}", field(&form.language)));
    lines.push(String::new());
    if form.busy {
        let label = app.progress_label.unwrap_or("Synthesizing…");
        lines.push(format!("Working… {label}"));
    } else if let Some(artifact) = &form.artifact {
        lines.push(format!("Generated: {} (d to save, p to play)", artifact.file));
    } else {
        lines.push("Set all three tags, then press Enter to generate.".to_string());
    }
    lines.join("\n")
}
