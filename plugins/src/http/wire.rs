use serde::Deserialize;
use toolrun_core::api::{EngineFrame, FrameKind, Tool};

/// Frame as it appears on the event stream.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "runId", default)]
    run_id: Option<String>,
    #[serde(flatten)]
    kind: FrameKind,
}

/// Decodes one event payload. Frames without a run id belong to `stream_run_id`.
/// Payloads that are not frames are skipped.
pub(crate) fn decode_frame(data: &str, stream_run_id: &str) -> Option<EngineFrame> {
    match serde_json::from_str::<WireFrame>(data) {
        Ok(WireFrame { run_id, kind }) => Some(EngineFrame::new(
            run_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| stream_run_id.to_string()),
            kind,
        )),
        Err(e) => {
            tracing::debug!(
                target: "toolrun.http",
                run_id = %stream_run_id,
                error = %e,
                "skipping undecodable event payload"
            );
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParseResponse {
    #[serde(default)]
    pub(crate) tools: Vec<Tool>,
}
