use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::correlator::{AuthDecision, PromptAnswer};
use crate::error::EngineError;
use crate::frame::EngineFrame;
use crate::options::RunOptions;
use crate::tool::{Tool, ToolSet};

/// Frames for one submitted execution, in engine order. Ends after the
/// terminal frame, or without one when the execution was cancelled.
pub type FrameStream = BoxStream<'static, Result<EngineFrame, EngineError>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubmitTarget {
    Tools {
        #[serde(rename = "toolDefs")]
        tools: ToolSet,
    },
    File {
        file: String,
    },
}

impl SubmitTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitTarget::Tools { .. } => "evaluate",
            SubmitTarget::File { .. } => "run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub run_id: String,
    #[serde(flatten)]
    pub target: SubmitTarget,
    #[serde(flatten)]
    pub options: RunOptions,
}

/// Session with the script engine.
///
/// Implementations own the transport; the client serializes nothing itself
/// beyond calling these methods.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: SubmitRequest) -> Result<FrameStream, EngineError>;

    async fn confirm(&self, decision: &AuthDecision) -> Result<(), EngineError>;

    async fn prompt_response(&self, answer: &PromptAnswer) -> Result<(), EngineError>;

    /// Best-effort; the effect is observed as closure of the run's stream.
    async fn cancel(&self, run_id: &str) -> Result<(), EngineError>;

    async fn list_tools(&self) -> Result<String, EngineError>;

    async fn list_models(&self) -> Result<Vec<String>, EngineError>;

    async fn version(&self) -> Result<String, EngineError>;

    async fn parse_file(&self, path: &str) -> Result<Vec<Tool>, EngineError>;

    async fn parse_tool(&self, content: &str) -> Result<Vec<Tool>, EngineError>;

    async fn stringify(&self, tools: &[Tool]) -> Result<String, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}
