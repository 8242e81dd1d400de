#![cfg(feature = "tui")]

//! Two-screen terminal UI: API key entry, then the conversation view.

use crate::session::{DisplaySink, Message, Session, SubmitReject, TurnEnd, TurnEvent};
use crate::settings::{FileSettings, SettingsStore, API_KEY};
use crate::{app, config, openai, paths};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct ChatLine {
    role: String,
    text: String,
}

/// The chat screen's transcript; the session writes into it as the display
/// sink. Streamed assistant text extends the last line in place.
#[derive(Debug, Default)]
struct Transcript {
    lines: Vec<ChatLine>,
}

impl Transcript {
    fn push(&mut self, role: &str, text: impl Into<String>) {
        self.lines.push(ChatLine {
            role: role.to_string(),
            text: text.into(),
        });
    }
}

impl DisplaySink for Transcript {
    fn append_line(&mut self, sender: &str, text: &str) {
        self.push(sender, text);
    }

    fn append_to_tail(&mut self, text: &str) {
        if let Some(last) = self.lines.last_mut() {
            last.text.push_str(text);
        }
    }
}

#[derive(Debug)]
enum CheckResult {
    /// The candidate that passed the check.
    Valid(String),
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    KeyEntry,
    Chat,
}

enum UiAction {
    None,
    Quit,
    Entered(String),
}

pub async fn run_chat(
    cfg: Option<&config::Config>,
    model_flag: Option<String>,
    api_base_flag: Option<String>,
) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let mut settings = FileSettings::open(paths::settings_path()?)?;
    let api_base = app::resolve_api_base(api_base_flag.as_deref(), cfg);
    let model = app::resolve_model(model_flag.as_deref(), cfg);

    // Start on the chat screen when a credential is already available.
    let mut client = app::build_client(&http, &settings, &api_base).ok();
    let mut screen = if client.is_some() {
        Screen::Chat
    } else {
        Screen::KeyEntry
    };

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(ev) => {
                if ev_tx.send(ev).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    // Key-entry screen state.
    let mut key_input = String::new();
    let mut key_status = String::from("Enter your API key and press Enter to check it.");
    let mut checked_key: Option<String> = None;
    let mut check_rx: Option<mpsc::UnboundedReceiver<CheckResult>> = None;

    // Chat screen state.
    let mut session = Session::new();
    let mut transcript = Transcript::default();
    transcript.push("system", "Type a message and press Enter. /quit to exit.");
    let mut input = String::new();
    let mut turn_rx: Option<mpsc::UnboundedReceiver<TurnEvent>> = None;

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let draw_res = match screen {
                    Screen::KeyEntry => draw_key_entry(&mut terminal, &key_input, &key_status, check_rx.is_some()),
                    Screen::Chat => draw_chat(&mut terminal, &model, &transcript, &input),
                };
                if let Err(e) = draw_res {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                let Event::Key(key) = ev else { continue };
                // The key field keeps its text after Enter so the save press
                // can re-submit the checked candidate; the chat input clears.
                let action = match screen {
                    Screen::KeyEntry => edit_line(key, &mut key_input, false),
                    Screen::Chat => edit_line(key, &mut input, true),
                };
                match action {
                    UiAction::None => {}
                    UiAction::Quit => break Ok(()),
                    UiAction::Entered(text) => match screen {
                        Screen::KeyEntry => {
                            if check_rx.is_none() {
                                on_key_entered(
                                    text,
                                    &http,
                                    &api_base,
                                    &mut settings,
                                    &mut checked_key,
                                    &mut check_rx,
                                    &mut key_status,
                                    &mut client,
                                    &mut screen,
                                )?;
                            }
                        }
                        Screen::Chat => {
                            if text.trim() == "/quit" {
                                break Ok(());
                            }
                            match session.submit(&text, &mut transcript) {
                                Ok(history) => {
                                    if let Some(client) = client.clone() {
                                        turn_rx = Some(spawn_turn(client, model.clone(), history));
                                    }
                                }
                                Err(SubmitReject::Empty) => {}
                                Err(SubmitReject::Busy) => {
                                    transcript.push("system", "(response in progress; wait for it to finish)");
                                }
                            }
                        }
                    },
                }
            }
            Some(result) = async {
                match &mut check_rx {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            } => {
                check_rx = None;
                match result {
                    CheckResult::Valid(key) => {
                        checked_key = Some(key);
                        key_status = "API key is valid. Press Enter again to save it.".to_string();
                    }
                    CheckResult::Invalid(e) => {
                        checked_key = None;
                        key_status = format!("Invalid API key: {e}");
                    }
                }
            }
            Some(ev) = async {
                match &mut turn_rx {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            } => {
                match session.on_event(ev, &mut transcript) {
                    Some(TurnEnd::Complete) => turn_rx = None,
                    Some(TurnEnd::Failed(e)) => {
                        turn_rx = None;
                        transcript.push("error", e);
                    }
                    None => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Shared line editing for both screens. Enter hands the current text back.
fn edit_line(key: KeyEvent, input: &mut String, clear_on_enter: bool) -> UiAction {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return UiAction::Quit;
    }

    match key.code {
        KeyCode::Esc => UiAction::Quit,
        KeyCode::Char(c) => {
            input.push(c);
            UiAction::None
        }
        KeyCode::Backspace => {
            input.pop();
            UiAction::None
        }
        KeyCode::Enter => {
            let text = input.trim().to_string();
            if clear_on_enter {
                input.clear();
            }
            UiAction::Entered(text)
        }
        _ => UiAction::None,
    }
}

/// Key-entry Enter: first press checks the candidate, a second press on the
/// same (valid) candidate saves it and switches to the chat screen. Editing
/// the input after a check means the next Enter re-checks.
#[allow(clippy::too_many_arguments)]
fn on_key_entered(
    candidate: String,
    http: &reqwest::Client,
    api_base: &str,
    settings: &mut FileSettings,
    checked_key: &mut Option<String>,
    check_rx: &mut Option<mpsc::UnboundedReceiver<CheckResult>>,
    key_status: &mut String,
    client: &mut Option<openai::OpenAiClient>,
    screen: &mut Screen,
) -> anyhow::Result<()> {
    if candidate.is_empty() {
        *key_status = "Please enter an API key.".to_string();
        return Ok(());
    }

    if checked_key.as_deref() == Some(candidate.as_str()) {
        settings.set(API_KEY, &candidate)?;
        *client = Some(openai::OpenAiClient::new(http.clone(), candidate, api_base));
        *screen = Screen::Chat;
        return Ok(());
    }

    *key_status = "Checking API key...".to_string();
    *check_rx = Some(spawn_key_check(http.clone(), api_base.to_string(), candidate));
    Ok(())
}

fn spawn_key_check(
    http: reqwest::Client,
    api_base: String,
    candidate: String,
) -> mpsc::UnboundedReceiver<CheckResult> {
    let (tx, rx) = mpsc::unbounded_channel::<CheckResult>();
    tokio::spawn(async move {
        let result = match openai::check_api_key(&http, &api_base, &candidate).await {
            Ok(()) => CheckResult::Valid(candidate),
            Err(e) => CheckResult::Invalid(format!("{e:#}")),
        };
        let _ = tx.send(result);
    });
    rx
}

/// Run one turn's stream in a worker task, forwarding fragments in arrival
/// order. Every failure path, including a failed request start, comes back
/// as a terminal [`TurnEvent::Error`].
fn spawn_turn(
    client: openai::OpenAiClient,
    model: String,
    history: Vec<Message>,
) -> mpsc::UnboundedReceiver<TurnEvent> {
    let (tx, rx) = mpsc::unbounded_channel::<TurnEvent>();
    tokio::spawn(async move {
        use tokio_stream::StreamExt;

        let mut stream = match client.stream_chat(&model, &history).await {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(TurnEvent::Error(format!("{e:#}")));
                return;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(frag) => {
                    if tx.send(TurnEvent::Fragment(frag.text)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(TurnEvent::Error(format!("{e:#}")));
                    return;
                }
            }
        }
        let _ = tx.send(TurnEvent::Complete);
    });
    rx
}

fn draw_key_entry(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    input: &str,
    status: &str,
    checking: bool,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        text.lines.push(Line::styled(
            "Welcome to llmchat",
            Style::default().add_modifier(Modifier::BOLD),
        ));
        text.lines.push(Line::from(""));
        text.lines.push(Line::from(status.to_string()));
        if checking {
            text.lines.push(Line::from(""));
            text.lines.push(Line::from("(checking...)"));
        }

        let info = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("llmchat — sign in"))
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("API key"));

        f.render_widget(info, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}

fn draw_chat(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    model: &str,
    transcript: &Transcript,
    input: &str,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for l in &transcript.lines {
            let style = match l.role.as_str() {
                "user" => Style::default().add_modifier(Modifier::BOLD),
                "error" => Style::default().add_modifier(Modifier::BOLD),
                _ => Style::default(),
            };
            text.lines.push(Line::styled(format!("{}: ", l.role), style));
            text.lines.extend(Text::from(l.text.clone()).lines);
            text.lines.push(Line::from(""));
        }

        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(format!("llmchat — model: {model}")))
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
