//! Conversation state for one chat session.
//!
//! The session owns the ordered user/assistant history and the in-progress
//! assistant response. The UI feeds it submissions and stream events; it
//! writes what should be shown through the [`DisplaySink`] boundary.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One committed chat message. Serialized as-is into completion requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Where the session records what the user should see.
///
/// `append_line` starts a new transcript line; `append_to_tail` extends the
/// most recently appended line in place (streamed assistant text).
pub trait DisplaySink {
    fn append_line(&mut self, sender: &str, text: &str);
    fn append_to_tail(&mut self, text: &str);
}

/// Stream notifications delivered back to the interaction thread, in the
/// order the transport produced them.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Fragment(String),
    Complete,
    Error(String),
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitReject {
    /// Input was empty after trimming; ignore silently.
    Empty,
    /// A turn is already in flight; at most one stream may be open.
    Busy,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    Complete,
    /// Raw failure text from the transport, for a user-visible notice.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Idle,
    InFlight,
}

/// Session controller: append-only history plus the pending response.
///
/// History alternates user/assistant entries in submission order. The
/// in-flight guard is controller state, not UI state; `submit` rejects with
/// [`SubmitReject::Busy`] while a turn is running.
#[derive(Debug)]
pub struct Session {
    history: Vec<Message>,
    pending: Option<String>,
    state: TurnState,
}

impl Session {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            pending: None,
            state: TurnState::Idle,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn turn_in_flight(&self) -> bool {
        self.state == TurnState::InFlight
    }

    /// Start a turn. On success the user message is committed to history and
    /// echoed to the sink, an empty assistant line is opened as the streaming
    /// placeholder, and the full history to send is returned.
    pub fn submit(
        &mut self,
        text: &str,
        sink: &mut dyn DisplaySink,
    ) -> Result<Vec<Message>, SubmitReject> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitReject::Empty);
        }
        if self.state == TurnState::InFlight {
            return Err(SubmitReject::Busy);
        }

        self.history.push(Message::user(text));
        sink.append_line("user", text);

        self.pending = Some(String::new());
        sink.append_line("assistant", "");
        self.state = TurnState::InFlight;

        Ok(self.history.clone())
    }

    /// Apply one stream event. Returns `Some` when the turn ended.
    ///
    /// Fragments accumulate into the pending response and extend the sink's
    /// tail line. `Complete` commits the accumulated text as the assistant
    /// message. `Error` discards the partial response entirely; history gains
    /// no assistant entry for the turn.
    pub fn on_event(&mut self, event: TurnEvent, sink: &mut dyn DisplaySink) -> Option<TurnEnd> {
        match event {
            TurnEvent::Fragment(text) => {
                if text.is_empty() {
                    return None;
                }
                if let Some(pending) = self.pending.as_mut() {
                    pending.push_str(&text);
                    sink.append_to_tail(&text);
                }
                None
            }
            TurnEvent::Complete => {
                let content = self.pending.take().unwrap_or_default();
                self.history.push(Message::assistant(content));
                self.state = TurnState::Idle;
                Some(TurnEnd::Complete)
            }
            TurnEvent::Error(text) => {
                self.pending = None;
                self.state = TurnState::Idle;
                Some(TurnEnd::Failed(text))
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records sink calls so tests can assert exactly what the UI would show.
    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<String>,
    }

    impl DisplaySink for RecordingSink {
        fn append_line(&mut self, sender: &str, text: &str) {
            self.calls.push(format!("line:{sender}:{text}"));
        }

        fn append_to_tail(&mut self, text: &str) {
            self.calls.push(format!("tail:{text}"));
        }
    }

    fn started(session: &mut Session, sink: &mut RecordingSink, text: &str) -> Vec<Message> {
        session.submit(text, sink).expect("submit accepted")
    }

    #[test]
    fn submit_commits_user_message_before_any_request() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();

        let request = started(&mut session, &mut sink, "hi");

        assert_eq!(session.history(), &[Message::user("hi")]);
        assert_eq!(request, vec![Message::user("hi")]);
        assert!(session.turn_in_flight());
        assert_eq!(sink.calls, vec!["line:user:hi", "line:assistant:"]);
    }

    #[test]
    fn whitespace_only_submit_is_a_no_op() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();

        assert_eq!(session.submit("   \t\n", &mut sink), Err(SubmitReject::Empty));
        assert!(session.history().is_empty());
        assert!(!session.turn_in_flight());
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn submit_trims_surrounding_whitespace() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();

        started(&mut session, &mut sink, "  hi  ");
        assert_eq!(session.history(), &[Message::user("hi")]);
    }

    #[test]
    fn fragments_concatenate_in_order() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();
        started(&mut session, &mut sink, "hi");

        for part in ["He", "llo", "!"] {
            assert_eq!(session.on_event(TurnEvent::Fragment(part.into()), &mut sink), None);
        }
        let end = session.on_event(TurnEvent::Complete, &mut sink);

        assert_eq!(end, Some(TurnEnd::Complete));
        assert_eq!(
            session.history(),
            &[Message::user("hi"), Message::assistant("Hello!")]
        );
        assert!(!session.turn_in_flight());
        assert_eq!(
            sink.calls,
            vec![
                "line:user:hi",
                "line:assistant:",
                "tail:He",
                "tail:llo",
                "tail:!",
            ]
        );
    }

    #[test]
    fn error_discards_partial_response() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();
        started(&mut session, &mut sink, "hi");

        session.on_event(TurnEvent::Fragment("Par".into()), &mut sink);
        let end = session.on_event(TurnEvent::Error("connection reset".into()), &mut sink);

        assert_eq!(end, Some(TurnEnd::Failed("connection reset".into())));
        // No assistant entry is committed for the failed turn.
        assert_eq!(session.history(), &[Message::user("hi")]);
        assert!(!session.turn_in_flight());
    }

    #[test]
    fn empty_fragments_reach_neither_sink_nor_history() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();
        started(&mut session, &mut sink, "hi");

        session.on_event(TurnEvent::Fragment(String::new()), &mut sink);
        session.on_event(TurnEvent::Fragment("ok".into()), &mut sink);
        session.on_event(TurnEvent::Complete, &mut sink);

        assert_eq!(session.history()[1], Message::assistant("ok"));
        assert!(!sink.calls.contains(&"tail:".to_string()));
    }

    #[test]
    fn second_submit_while_in_flight_is_rejected() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();
        started(&mut session, &mut sink, "hi");

        assert_eq!(session.submit("again", &mut sink), Err(SubmitReject::Busy));
        // History holds only the first turn's user message.
        assert_eq!(session.history(), &[Message::user("hi")]);
    }

    #[test]
    fn zero_fragments_then_complete_commits_empty_message() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();
        started(&mut session, &mut sink, "hi");

        let end = session.on_event(TurnEvent::Complete, &mut sink);

        assert_eq!(end, Some(TurnEnd::Complete));
        assert_eq!(
            session.history(),
            &[Message::user("hi"), Message::assistant("")]
        );
    }

    #[test]
    fn submission_reopens_after_error() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();
        started(&mut session, &mut sink, "hi");
        session.on_event(TurnEvent::Error("boom".into()), &mut sink);

        let request = started(&mut session, &mut sink, "retry");
        assert_eq!(
            request,
            vec![Message::user("hi"), Message::user("retry")]
        );
    }

    #[test]
    fn history_alternates_across_turns() {
        let mut session = Session::new();
        let mut sink = RecordingSink::default();

        started(&mut session, &mut sink, "one");
        session.on_event(TurnEvent::Fragment("1".into()), &mut sink);
        session.on_event(TurnEvent::Complete, &mut sink);

        let request = started(&mut session, &mut sink, "two");
        session.on_event(TurnEvent::Fragment("2".into()), &mut sink);
        session.on_event(TurnEvent::Complete, &mut sink);

        assert_eq!(
            session.history(),
            &[
                Message::user("one"),
                Message::assistant("1"),
                Message::user("two"),
                Message::assistant("2"),
            ]
        );
        // The second request carried the entire history up to that point.
        assert_eq!(request.len(), 3);
    }

    #[test]
    fn roles_serialize_lowercase_for_the_wire() {
        let json = serde_json::to_string(&Message::user("hi")).expect("serialize");
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
        let json = serde_json::to_string(&Message::assistant("yo")).expect("serialize");
        assert_eq!(json, r#"{"role":"assistant","content":"yo"}"#);
    }
}
