use clap::{Parser, Subcommand};

/// llmchat CLI
#[derive(Debug, Parser)]
#[command(name = "llmchat")]
#[command(version)]
#[command(about = "Streaming chat client for OpenAI-compatible APIs", long_about = None)]
pub struct Args {
    /// Model name
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// API base URL (default: config api_base or https://api.openai.com)
    #[arg(long = "api-base")]
    pub api_base: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional); without it the chat UI starts
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check an API key against the service and save it on success
    Login {
        /// API key to check; prompted for interactively when omitted
        key: Option<String>,
    },

    /// Run the interactive terminal chat UI
    #[cfg(feature = "tui")]
    Chat,
}
