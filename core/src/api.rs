//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `toolrun_core::api` instead of reaching into internal modules.

pub use crate::chat::{ChatState, ChatTurn};
pub use crate::client::Client;
pub use crate::config::{
    load_default, load_from, ClientConfig, ControlConfig, EngineConfig, EventsOutConfig,
    LoggingConfig,
};
pub use crate::correlator::{AuthDecision, PendingKind, PromptAnswer};
pub use crate::engine::{Engine, FrameStream, SubmitRequest, SubmitTarget};
pub use crate::error::{
    ClientError, ContractError, CorrelationError, EngineError, RunError, SubmitError,
};
pub use crate::event_bus::{EventType, RunEvent};
pub use crate::frame::{CallFrame, EngineFrame, FrameKind, Output, PromptFrame};
pub use crate::options::RunOptions;
pub use crate::run::{Run, RunState};
pub use crate::tool::{Tool, ToolSet};
