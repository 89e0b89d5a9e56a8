use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chat::ChatTurn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub content: String,
}

/// Progress snapshot for one engine-side call.
///
/// `output` is cumulative: every frame for a call carries everything produced
/// so far, not just the new part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub output: Vec<Output>,

    /// The pending sensitive action, e.g. a shell command awaiting confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

impl CallFrame {
    pub fn content(&self) -> String {
        self.output.iter().map(|o| o.content.as_str()).collect()
    }
}

/// Request for free-form user input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFrame {
    pub id: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub fields: Vec<String>,

    /// Hide the user's input when set.
    #[serde(default)]
    pub sensitive: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FrameKind {
    CallProgress {
        call: CallFrame,
    },
    CallConfirm {
        call: CallFrame,
    },
    Prompt {
        prompt: PromptFrame,
    },
    /// Successful end of the request. `chat` is set for chat turns.
    RunFinish {
        #[serde(default)]
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat: Option<ChatTurn>,
    },
    RunError {
        error: String,
    },
    /// Frame types this client does not act on (run/call lifecycle markers).
    #[serde(other)]
    Unknown,
}

impl FrameKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FrameKind::CallProgress { .. } => "callProgress",
            FrameKind::CallConfirm { .. } => "callConfirm",
            FrameKind::Prompt { .. } => "prompt",
            FrameKind::RunFinish { .. } => "runFinish",
            FrameKind::RunError { .. } => "runError",
            FrameKind::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameKind::RunFinish { .. } | FrameKind::RunError { .. })
    }
}

/// One frame from the engine session, addressed to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFrame {
    pub run_id: String,
    pub kind: FrameKind,
}

impl EngineFrame {
    pub fn new(run_id: impl Into<String>, kind: FrameKind) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
        }
    }
}
