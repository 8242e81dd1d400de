mod app;
mod cli;
mod config;
mod openai;
mod paths;
mod session;
mod settings;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use session::{DisplaySink, Session, TurnEvent};
use settings::FileSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = cli::Args::parse();

    // Resolve and create dirs early.
    let config_dir = paths::config_dir()?;
    let _state_dir = paths::state_dir()?;

    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?;
    tracing::debug!(?config_dir, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    match args.cmd {
        Some(cli::Command::Login { key }) => {
            let api_base = app::resolve_api_base(args.api_base.as_deref(), cfg.as_ref());
            let mut settings = FileSettings::open(paths::settings_path()?)?;
            return app::cmd_login(&http, &mut settings, &api_base, key).await;
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Chat) => {
            return tui::run_chat(cfg.as_ref(), args.model.clone(), args.api_base.clone()).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        #[cfg(feature = "tui")]
        return tui::run_chat(cfg.as_ref(), args.model.clone(), args.api_base.clone()).await;

        #[cfg(not(feature = "tui"))]
        anyhow::bail!("No prompt provided. Try: llmchat \"Hello\"");
    }

    let api_base = app::resolve_api_base(args.api_base.as_deref(), cfg.as_ref());
    let model = app::resolve_model(args.model.as_deref(), cfg.as_ref());

    let settings = FileSettings::open(paths::settings_path()?)?;
    let client = app::build_client(&http, &settings, &api_base)?;

    // One-shot: a single turn through the session controller, streamed to stdout.
    let mut session = Session::new();
    let mut sink = StdoutTail;
    let history = session
        .submit(&prompt, &mut sink)
        .map_err(|_| anyhow::anyhow!("empty prompt"))?;

    let mut stream = client
        .stream_chat(&model, &history)
        .await
        .context("failed to start completion stream")?;

    use tokio_stream::StreamExt;
    while let Some(item) = stream.next().await {
        let frag = item.context("stream chunk error")?;
        session.on_event(TurnEvent::Fragment(frag.text), &mut sink);
    }
    session.on_event(TurnEvent::Complete, &mut sink);
    println!();

    Ok(())
}

/// Sink for one-shot mode: streamed text goes straight to stdout.
struct StdoutTail;

impl DisplaySink for StdoutTail {
    fn append_line(&mut self, _sender: &str, _text: &str) {}

    fn append_to_tail(&mut self, text: &str) {
        use std::io::Write;
        print!("{text}");
        std::io::stdout().flush().ok();
    }
}
