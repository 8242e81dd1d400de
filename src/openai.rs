//! OpenAI chat completions client: key liveness check plus streaming chat.
//!
//! Streaming uses the SSE wire format: `data: <json>` events carrying
//! incremental `choices[0].delta.content` text, ended by `data: [DONE]`.

use crate::session::Message;
use anyhow::{anyhow, Context};
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// One incremental text delta from the stream. Never empty.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub text: String,
}

/// Check a candidate API key with one read-only call (list models).
///
/// Success is any 2xx response. The candidate is not retained; errors carry
/// the raw transport or status/body text.
pub async fn check_api_key(
    http: &reqwest::Client,
    api_base: &str,
    candidate: &str,
) -> anyhow::Result<()> {
    let url = format!("{}/v1/models", api_base.trim_end_matches('/'));
    let resp = http
        .get(&url)
        .bearer_auth(candidate)
        .send()
        .await
        .context("failed to reach the models endpoint")?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("API error: HTTP {status}: {text}"));
    }
    Ok(())
}

/// Streaming completion client. Holds the accepted credential for its
/// lifetime; one streaming request per `stream_chat` call.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: String, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Open one streaming completion request carrying the full history.
    ///
    /// Fragments arrive in transport order with empty deltas suppressed. Any
    /// failure, including mid-stream, surfaces as a single `Err` item and
    /// ends the stream; a clean end means the turn completed.
    pub async fn stream_chat(
        &self,
        model: &str,
        history: &[Message],
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<Fragment>>> {
        let url = format!("{}/v1/chat/completions", self.api_base);
        let body = ChatCompletionRequest {
            model,
            messages: history,
            stream: true,
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to start completion request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("API error: HTTP {status}: {text}"));
        }

        let (tx, rx) = mpsc::channel::<anyhow::Result<Fragment>>(64);

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut parser = SseParser::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!(e).context("network stream error"))).await;
                        return;
                    }
                };

                let events = match parser.push(&bytes) {
                    Ok(ev) => ev,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                for data in events {
                    if data.trim() == "[DONE]" {
                        return;
                    }

                    let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                        Ok(c) => c,
                        Err(e) => {
                            let _ = tx
                                .send(Err(anyhow!(e).context("failed to parse stream chunk JSON")))
                                .await;
                            return;
                        }
                    };

                    if let Some(text) = delta_text(&chunk) {
                        if tx.send(Ok(Fragment { text })).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let out = ReceiverStream::new(rx);
        Ok(Box::pin(out) as BoxStream<'static, anyhow::Result<Fragment>>)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental text of the first choice; `None` when the chunk carries no
/// new text (role-only deltas, empty strings, finish markers).
fn delta_text(chunk: &ChatCompletionChunk) -> Option<String> {
    let text = chunk.choices.first()?.delta.content.as_deref()?;
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

/// Minimal SSE parser.
///
/// Feed raw body bytes; completed `data:` payloads come back once the blank
/// line ending their event arrives. Multi-line data fields are joined with
/// newlines; other fields (`event:`, `id:`, `retry:`, comments) are ignored.
struct SseParser {
    buf: Vec<u8>,
    data: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<String>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                if !self.data.is_empty() {
                    // Drop the newline appended after the last data line.
                    if self.data.ends_with('\n') {
                        self.data.pop();
                    }
                    out.push(std::mem::take(&mut self.data));
                }
                continue;
            }

            let s = std::str::from_utf8(&line).context("SSE line is not valid UTF-8")?;
            if let Some(rest) = s.strip_prefix("data:") {
                // The field value may carry one optional leading space.
                self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                self.data.push('\n');
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut SseParser, input: &[u8]) -> Vec<String> {
        parser.push(input).expect("valid SSE input")
    }

    #[test]
    fn single_event_parses() {
        let mut p = SseParser::new();
        let events = parse_all(&mut p, b"data: {\"x\":1}\n\n");
        assert_eq!(events, vec!["{\"x\":1}"]);
    }

    #[test]
    fn event_split_across_pushes() {
        let mut p = SseParser::new();
        assert!(parse_all(&mut p, b"data: {\"x\"").is_empty());
        assert!(parse_all(&mut p, b":1}\n").is_empty());
        let events = parse_all(&mut p, b"\n");
        assert_eq!(events, vec!["{\"x\":1}"]);
    }

    #[test]
    fn multiple_events_in_one_push() {
        let mut p = SseParser::new();
        let events = parse_all(&mut p, b"data: one\n\ndata: two\n\n");
        assert_eq!(events, vec!["one", "two"]);
    }

    #[test]
    fn crlf_lines_parse() {
        let mut p = SseParser::new();
        let events = parse_all(&mut p, b"data: hi\r\n\r\n");
        assert_eq!(events, vec!["hi"]);
    }

    #[test]
    fn multi_line_data_joined_with_newline() {
        let mut p = SseParser::new();
        let events = parse_all(&mut p, b"data: a\ndata: b\n\n");
        assert_eq!(events, vec!["a\nb"]);
    }

    #[test]
    fn non_data_fields_ignored() {
        let mut p = SseParser::new();
        let events = parse_all(&mut p, b"event: ping\nid: 3\n: comment\ndata: x\n\n");
        assert_eq!(events, vec!["x"]);
    }

    #[test]
    fn done_sentinel_comes_through_verbatim() {
        let mut p = SseParser::new();
        let events = parse_all(&mut p, b"data: [DONE]\n\n");
        assert_eq!(events, vec!["[DONE]"]);
    }

    #[test]
    fn utf8_split_across_pushes_survives() {
        // "é" split between pushes: conversion happens per complete line.
        let mut p = SseParser::new();
        assert!(parse_all(&mut p, b"data: caf\xc3").is_empty());
        let events = parse_all(&mut p, b"\xa9\n\n");
        assert_eq!(events, vec!["café"]);
    }

    #[test]
    fn delta_text_extracts_content() {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(delta_text(&chunk), Some("Hel".to_string()));
    }

    #[test]
    fn delta_text_suppresses_empty_and_absent_content() {
        let empty: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap();
        assert_eq!(delta_text(&empty), None);

        let role_only: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(delta_text(&role_only), None);

        let finish: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap();
        assert_eq!(delta_text(&finish), None);

        let no_choices: ChatCompletionChunk = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(delta_text(&no_choices), None);
    }

    #[test]
    fn request_body_serializes_openai_shape() {
        let history = [Message::user("hi"), Message::assistant("yo")];
        let req = ChatCompletionRequest {
            model: "gpt-3.5-turbo",
            messages: &history,
            stream: true,
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "yo");
    }
}
