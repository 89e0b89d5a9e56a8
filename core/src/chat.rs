use serde::{Deserialize, Serialize};

/// Opaque engine-side conversation continuation point.
///
/// The client never inspects the token; it is handed back to the engine
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatState(String);

impl ChatState {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Terminal payload of one chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub state: Option<ChatState>,

    /// Set when the script ended the conversation.
    #[serde(default)]
    pub done: bool,
}
