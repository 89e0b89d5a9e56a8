use serde::{Deserialize, Serialize};

use crate::chat::ChatState;

/// Per-run options. Fixed when the Run is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Bypass the engine-side result cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disable_cache: bool,

    /// Require explicit approval before sensitive calls.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confirm: bool,

    /// The caller answers prompt requests.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub prompt: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_state: Option<ChatState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_tool: Option<String>,

    /// `KEY=VALUE` entries passed to the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chdir: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable_cache(mut self, yes: bool) -> Self {
        self.disable_cache = yes;
        self
    }

    pub fn confirm(mut self, yes: bool) -> Self {
        self.confirm = yes;
        self
    }

    pub fn prompt(mut self, yes: bool) -> Self {
        self.prompt = yes;
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn chat_state(mut self, state: ChatState) -> Self {
        self.chat_state = Some(state);
        self
    }

    pub fn sub_tool(mut self, name: impl Into<String>) -> Self {
        self.sub_tool = Some(name.into());
        self
    }

    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn chdir(mut self, dir: impl Into<String>) -> Self {
        self.chdir = Some(dir.into());
        self
    }

    /// Options for the next chat turn: same basis, new input and resume token.
    pub(crate) fn next_turn(&self, input: String, state: Option<ChatState>) -> Self {
        Self {
            input: Some(input),
            chat_state: state,
            ..self.clone()
        }
    }
}
