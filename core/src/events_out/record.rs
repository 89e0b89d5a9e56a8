use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventsOutTx;

/// One JSONL line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub v: i32,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: String,
    pub run_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AuditRecord {
    pub fn new(event_type: &str, run_id: &str) -> Self {
        Self {
            v: 1,
            event_type: event_type.to_string(),
            ts: chrono::Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub async fn write_audit_record(out: Option<&EventsOutTx>, record: &AuditRecord) {
    let Some(out) = out else {
        return;
    };
    match serde_json::to_string(record) {
        Ok(line) => out.send_line(line).await,
        Err(e) => tracing::debug!(
            target: "toolrun.events_out",
            error = %e,
            "failed to encode audit record"
        ),
    }
}
