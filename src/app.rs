use crate::settings::{FileSettings, SettingsStore, API_KEY};
use crate::{config, openai};
use anyhow::Context;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// API base: flag, then env, then config, then the public endpoint.
pub fn resolve_api_base(flag: Option<&str>, cfg: Option<&config::Config>) -> String {
    flag.map(str::to_string)
        .or_else(|| std::env::var("OPENAI_API_BASE").ok())
        .or_else(|| cfg.and_then(|c| c.api_base.clone()))
        .unwrap_or_else(|| openai::DEFAULT_API_BASE.to_string())
}

/// Model: flag, then config, then the fixed default.
pub fn resolve_model(flag: Option<&str>, cfg: Option<&config::Config>) -> String {
    flag.map(str::to_string)
        .or_else(|| cfg.and_then(|c| c.model.clone()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Build the completion client from the environment or the settings store.
pub fn build_client(
    http: &reqwest::Client,
    settings: &FileSettings,
    api_base: &str,
) -> anyhow::Result<openai::OpenAiClient> {
    let key = std::env::var("OPENAI_API_KEY")
        .ok()
        .or_else(|| settings.get(API_KEY));

    let Some(key) = key else {
        anyhow::bail!("No API key found. Set OPENAI_API_KEY, run `llmchat login`, or start `llmchat chat` to enter one.");
    };

    Ok(openai::OpenAiClient::new(http.clone(), key, api_base))
}

/// Check a key against the service and save it on success. The store is not
/// touched when the check fails.
pub async fn cmd_login(
    http: &reqwest::Client,
    settings: &mut FileSettings,
    api_base: &str,
    key_arg: Option<String>,
) -> anyhow::Result<()> {
    use std::io::Write;

    let mut out = std::io::stdout();

    let candidate = match key_arg {
        Some(key) => key,
        None => {
            write!(out, "API key: ")?;
            out.flush()?;
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("failed to read API key from stdin")?;
            line
        }
    };

    let candidate = candidate.trim();
    if candidate.is_empty() {
        anyhow::bail!("no API key given");
    }

    openai::check_api_key(http, api_base, candidate).await?;
    settings.set(API_KEY, candidate)?;

    writeln!(out, "API key is valid; saved.").ok();
    Ok(())
}
