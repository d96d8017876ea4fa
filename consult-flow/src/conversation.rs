use serde::{Deserialize, Serialize};

/// Vision summary held until the first successful image analysis
pub const NO_IMAGE_SUMMARY: &str = "No image uploaded";

/// Originator of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// `role: content`, the form used in prompts and the report transcript
    pub fn line(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
}

impl Patient {
    pub fn describe(&self) -> String {
        match self.age {
            Some(age) => format!("{} (age {})", self.name, age),
            None => self.name.clone(),
        }
    }
}

/// Where a conversation stands. Derived from the state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    Chatting,
    Ended,
}

/// How much of the transcript is sent to the model with each new message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    Full,
    Last(usize),
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::Last(10)
    }
}

impl std::str::FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("full") {
            return Ok(HistoryWindow::Full);
        }
        match s.parse::<usize>() {
            Ok(0) => Err("history window must be at least one turn".to_string()),
            Ok(n) => Ok(HistoryWindow::Last(n)),
            Err(_) => Err(format!("expected `full` or a turn count, got `{}`", s)),
        }
    }
}

/// Per-session conversation store.
///
/// The transcript only grows, `chat_ended` only moves from `false` to
/// `true`, and `vision_summary` always holds the latest successful image
/// analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    vision_summary: String,
    chat_ended: bool,
    patient: Option<Patient>,
}

impl ConversationState {
    /// Start a conversation seeded with a single assistant greeting
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::assistant(greeting)],
            vision_summary: NO_IMAGE_SUMMARY.to_string(),
            chat_ended: false,
            patient: None,
        }
    }

    pub fn with_patient(greeting: impl Into<String>, patient: Patient) -> Self {
        let mut state = Self::new(greeting);
        state.patient = Some(patient);
        state
    }

    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn::new(role, content));
    }

    /// Replace the vision summary. Only call after a successful analysis.
    pub fn set_vision(&mut self, summary: impl Into<String>) {
        self.vision_summary = summary.into();
    }

    /// Mark the chat as ended. Returns `true` if this call ended it.
    pub fn end_chat(&mut self) -> bool {
        let transitioned = !self.chat_ended;
        self.chat_ended = true;
        transitioned
    }

    pub fn set_patient(&mut self, patient: Patient) {
        self.patient = Some(patient);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn vision_summary(&self) -> &str {
        &self.vision_summary
    }

    pub fn chat_ended(&self) -> bool {
        self.chat_ended
    }

    pub fn patient(&self) -> Option<&Patient> {
        self.patient.as_ref()
    }

    pub fn phase(&self) -> Phase {
        if self.chat_ended {
            Phase::Ended
        } else if self.turns.iter().any(|t| t.role == Role::User) {
            Phase::Chatting
        } else {
            Phase::Greeting
        }
    }

    /// Turns selected for the model prompt, oldest first
    pub fn history(&self, window: HistoryWindow) -> &[Turn] {
        match window {
            HistoryWindow::Full => &self.turns,
            HistoryWindow::Last(n) => {
                let start = self.turns.len().saturating_sub(n);
                &self.turns[start..]
            }
        }
    }

    pub fn transcript_lines(&self) -> Vec<String> {
        self.turns.iter().map(Turn::line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConversationState {
        ConversationState::new("Hello!")
    }

    #[test]
    fn new_state_is_seeded_with_greeting() {
        let state = state();
        assert_eq!(state.turns(), &[Turn::assistant("Hello!")]);
        assert!(!state.chat_ended());
        assert_eq!(state.vision_summary(), NO_IMAGE_SUMMARY);
        assert_eq!(state.phase(), Phase::Greeting);
        assert!(state.patient().is_none());
    }

    #[test]
    fn appended_turns_keep_insertion_order() {
        let mut state = state();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            state.append_turn(role, format!("message {}", i));
        }

        assert_eq!(state.turns().len(), 6);
        let contents: Vec<&str> = state.turns()[1..]
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(
            contents,
            vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
        );
    }

    #[test]
    fn end_chat_is_monotonic() {
        let mut state = state();
        state.append_turn(Role::User, "hi");
        assert_eq!(state.phase(), Phase::Chatting);

        assert!(state.end_chat());
        assert!(!state.end_chat());
        state.append_turn(Role::User, "still here");
        state.set_vision("x-ray");
        state.set_patient(Patient {
            name: "Ayesha".to_string(),
            age: Some(34),
        });
        assert!(state.chat_ended());
        assert_eq!(state.phase(), Phase::Ended);
    }

    #[test]
    fn vision_summary_is_overwritten() {
        let mut state = state();
        state.set_vision("first analysis");
        state.set_vision("second analysis");
        assert_eq!(state.vision_summary(), "second analysis");
    }

    #[test]
    fn history_window_keeps_most_recent_turns() {
        let mut state = state();
        for i in 0..4 {
            state.append_turn(Role::User, format!("q{}", i));
        }

        assert_eq!(state.history(HistoryWindow::Full).len(), 5);
        let last_two = state.history(HistoryWindow::Last(2));
        assert_eq!(last_two[0].content, "q2");
        assert_eq!(last_two[1].content, "q3");
        assert_eq!(state.history(HistoryWindow::Last(50)).len(), 5);
    }

    #[test]
    fn history_window_parses_from_config_strings() {
        assert_eq!("full".parse::<HistoryWindow>(), Ok(HistoryWindow::Full));
        assert_eq!(" 5 ".parse::<HistoryWindow>(), Ok(HistoryWindow::Last(5)));
        assert!("0".parse::<HistoryWindow>().is_err());
        assert!("lots".parse::<HistoryWindow>().is_err());
    }

    #[test]
    fn transcript_lines_are_role_prefixed() {
        let mut state = state();
        state.append_turn(Role::User, "I have a headache");
        assert_eq!(
            state.transcript_lines(),
            vec!["assistant: Hello!", "user: I have a headache"]
        );
    }
}
