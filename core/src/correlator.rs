//! Pending confirmation / prompt requests, keyed by the engine's request id.
//!
//! One `Correlator` is shared by every Run of a Client. All state sits behind a
//! single mutex, so registration happens-before resolution and a second
//! resolution of the same id always fails.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::CorrelationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Confirm,
    Prompt,
}

impl PendingKind {
    fn label(self) -> &'static str {
        match self {
            PendingKind::Confirm => "confirmation",
            PendingKind::Prompt => "prompt",
        }
    }
}

/// Caller decision for a `CallConfirm` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDecision {
    pub id: String,
    pub accept: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthDecision {
    pub fn accept(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            accept: true,
            message: None,
        }
    }

    pub fn deny(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            accept: false,
            message: Some(message.into()),
        }
    }
}

/// Caller answer for a `Prompt` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAnswer {
    pub id: String,
    pub responses: BTreeMap<String, String>,
}

impl PromptAnswer {
    pub fn new<I, K, V>(id: impl Into<String>, responses: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            responses: responses
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    run_id: String,
    kind: PendingKind,
}

#[derive(Debug, Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, Pending>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as pending for `run_id`. An id still pending for another
    /// run is refused and left with its owner.
    pub fn register(&self, id: &str, run_id: &str, kind: PendingKind) -> bool {
        self.register_unless(id, run_id, kind, || false)
    }

    /// Like [`Correlator::register`], but refused once `cancelled` reports
    /// true. The check runs under the table lock, so a run that flags
    /// cancellation before calling `discard_run` never keeps a late entry.
    pub(crate) fn register_unless(
        &self,
        id: &str,
        run_id: &str,
        kind: PendingKind,
        cancelled: impl FnOnce() -> bool,
    ) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if cancelled() {
            tracing::debug!(
                target: "toolrun.correlator",
                id,
                run_id,
                "not registering request for a cancelled run"
            );
            return false;
        }
        if let Some(owner) = pending.get(id).filter(|p| p.run_id != run_id) {
            tracing::warn!(
                target: "toolrun.correlator",
                id,
                run_id,
                owner = %owner.run_id,
                "request id already pending for another run"
            );
            return false;
        }
        pending.insert(
            id.to_string(),
            Pending {
                run_id: run_id.to_string(),
                kind,
            },
        );
        true
    }

    /// Removes `id` if it is pending with `kind`; returns the owning run id.
    pub fn resolve(&self, id: &str, kind: PendingKind) -> Result<String, CorrelationError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.get(id) {
            None => Err(CorrelationError::Unknown { id: id.to_string() }),
            Some(p) if p.kind != kind => Err(CorrelationError::KindMismatch {
                id: id.to_string(),
                pending: p.kind.label(),
                got: kind.label(),
            }),
            Some(_) => Ok(pending
                .remove(id)
                .map(|p| p.run_id)
                .unwrap_or_default()),
        }
    }

    /// Drops every pending id owned by `run_id`. Returns how many were dropped.
    pub fn discard_run(&self, run_id: &str) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        pending.retain(|_, p| p.run_id != run_id);
        before - pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.len()
    }
}
