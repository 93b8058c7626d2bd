//! Common data models for provider-agnostic chat requests and results.

use serde::{Deserialize, Serialize};

use crate::client::ClientError;

/// System prompt used when a conversation is started without one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant.";

/// Role of the message sender.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered dialogue history sent verbatim to the backend.
///
/// Only ever grows by appending; [`Conversation::reset`] replaces the whole
/// history with a single system message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation with the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// Drop the history, keeping only a fresh system message.
    pub fn reset(&mut self, system_prompt: impl Into<String>) {
        self.messages = vec![Message::system(system_prompt)];
    }

    /// Export the message sequence as a JSON array.
    pub fn to_json(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import a message sequence previously produced by [`Conversation::to_json`].
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Why generation ended.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A configured stop sequence was generated.
    StopSequence,
    /// The token budget was exhausted.
    MaxTokens,
    /// The model finished its turn naturally.
    EndTurn,
}

/// Terminal value of a successful stream session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CompletionResult {
    /// Full generated text.
    pub text: String,

    /// Why generation ended, when the backend said so.
    pub stop_reason: Option<StopReason>,

    /// The stop sequence that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,

    /// Request or log id echoed by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_appends_in_order() {
        let mut conversation = Conversation::new("be brief");
        conversation.push_user("hi");
        conversation.push_assistant("hello");

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(conversation.last(), Some(&Message::assistant("hello")));
    }

    #[test]
    fn test_conversation_reset_keeps_single_system_message() {
        let mut conversation = Conversation::default();
        conversation.push_user("hi");
        conversation.reset("new prompt");
        assert_eq!(conversation.messages(), &[Message::system("new prompt")]);
    }

    #[test]
    fn test_conversation_json_export_import() {
        let mut conversation = Conversation::default();
        conversation.push_user("what is 2+2?");
        conversation.push_assistant("4");

        let json = conversation.to_json().unwrap();
        assert!(json.contains("\"role\": \"assistant\""));
        assert_eq!(Conversation::from_json(&json).unwrap(), conversation);
    }

    #[test]
    fn test_conversation_import_rejects_unknown_role() {
        let err = Conversation::from_json(r#"[{"role":"tool","content":"x"}]"#).unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }

    #[test]
    fn test_stop_reason_wire_names() {
        let reason: StopReason = serde_json::from_str("\"stop_sequence\"").unwrap();
        assert_eq!(reason, StopReason::StopSequence);
        assert_eq!(serde_json::to_string(&StopReason::EndTurn).unwrap(), "\"end_turn\"");
    }
}
