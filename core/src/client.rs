use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::correlator::{AuthDecision, Correlator, PendingKind, PromptAnswer};
use crate::engine::{Engine, SubmitTarget};
use crate::error::{ClientError, SubmitError};
use crate::events_out::{start_events_out, EventsOutTx};
use crate::options::RunOptions;
use crate::router::Router;
use crate::run::{drive, Run, RunBasis, RunShared};
use crate::tool::{Tool, ToolSet};

pub(crate) struct ClientInner {
    engine: Arc<dyn Engine>,
    config: ClientConfig,
    correlator: Correlator,
    router: Router,
    events_out: Option<EventsOutTx>,
    closed: AtomicBool,
}

impl ClientInner {
    pub(crate) fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    pub(crate) fn events_out(&self) -> Option<&EventsOutTx> {
        self.events_out.as_ref()
    }

    /// Creates the Run and spawns its drive task. Requires a tokio runtime.
    pub(crate) fn start_run(self: &Arc<Self>, basis: RunBasis) -> Result<Run, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::ClientClosed.into());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let (shared, cancel_rx) = RunShared::new(
            run_id.clone(),
            basis,
            self.config.control.event_capacity,
        );
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.control.inbox_capacity.max(1));
        self.router.register(shared.clone(), inbox_tx);

        // `close` may have swept the routing table between the check and the insert.
        if self.closed.load(Ordering::SeqCst) {
            self.router.remove(&run_id);
            return Err(SubmitError::ClientClosed.into());
        }

        tracing::debug!(target: "toolrun.client", run_id = %run_id, "run created");
        tokio::spawn(drive(self.clone(), shared.clone(), inbox_rx, cancel_rx));
        Ok(Run::new(shared, self.clone()))
    }
}

/// Entry point: one engine session shared by any number of runs.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.inner.engine.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    pub async fn new(engine: Arc<dyn Engine>, config: ClientConfig) -> Result<Self, ClientError> {
        let events_out = start_events_out(&config.events_out)
            .await
            .map_err(ClientError::EventsOut)?;

        tracing::info!(
            target: "toolrun.client",
            engine = engine.name(),
            events_out = events_out.is_some(),
            "client started"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                engine,
                config,
                correlator: Correlator::new(),
                router: Router::default(),
                events_out,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Executes the given tools; the first is the entry point.
    pub fn evaluate(
        &self,
        tools: impl Into<ToolSet>,
        options: RunOptions,
    ) -> Result<Run, ClientError> {
        let tools = tools.into();
        if tools.is_empty() {
            return Err(SubmitError::NoTools.into());
        }
        self.inner.start_run(RunBasis {
            target: SubmitTarget::Tools { tools },
            options,
        })
    }

    /// Executes a script file by path.
    pub fn run(&self, path: &str, options: RunOptions) -> Result<Run, ClientError> {
        if path.trim().is_empty() || path.contains('\0') {
            return Err(SubmitError::InvalidPath(path.to_string()).into());
        }
        self.inner.start_run(RunBasis {
            target: SubmitTarget::File {
                file: path.to_string(),
            },
            options,
        })
    }

    /// Answers a confirmation request. Each id accepts exactly one decision.
    pub async fn confirm(&self, decision: AuthDecision) -> Result<(), ClientError> {
        let run_id = self
            .inner
            .correlator
            .resolve(&decision.id, PendingKind::Confirm)?;
        tracing::debug!(
            target: "toolrun.client",
            run_id = %run_id,
            id = %decision.id,
            accept = decision.accept,
            "forwarding confirmation"
        );
        self.inner.engine.confirm(&decision).await?;
        Ok(())
    }

    /// Answers a prompt request. Each id accepts exactly one answer.
    pub async fn prompt_response(&self, answer: PromptAnswer) -> Result<(), ClientError> {
        let run_id = self
            .inner
            .correlator
            .resolve(&answer.id, PendingKind::Prompt)?;
        tracing::debug!(
            target: "toolrun.client",
            run_id = %run_id,
            id = %answer.id,
            fields = answer.responses.len(),
            "forwarding prompt response"
        );
        self.inner.engine.prompt_response(&answer).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<String, ClientError> {
        Ok(self.inner.engine.list_tools().await?)
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.inner.engine.list_models().await?)
    }

    pub async fn version(&self) -> Result<String, ClientError> {
        Ok(self.inner.engine.version().await?)
    }

    /// Parses a script file into its tools.
    pub async fn parse(&self, path: &str) -> Result<Vec<Tool>, ClientError> {
        Ok(self.inner.engine.parse_file(path).await?)
    }

    /// Parses script text into its tools.
    pub async fn parse_tool(&self, content: &str) -> Result<Vec<Tool>, ClientError> {
        Ok(self.inner.engine.parse_tool(content).await?)
    }

    /// Renders tools back into script text.
    pub async fn stringify(&self, tools: &[Tool]) -> Result<String, ClientError> {
        Ok(self.inner.engine.stringify(tools).await?)
    }

    /// Cancels every in-flight run and ends the engine session. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let runs = self.inner.router.runs();
        let discarded: usize = runs.iter().map(|run| run.cancel(&self.inner)).sum();
        tracing::info!(
            target: "toolrun.client",
            runs = runs.len(),
            discarded_pending = discarded,
            "closing client"
        );

        // Each run gives up on the engine after its own abort grace.
        let grace = Duration::from_millis(self.inner.config.control.abort_grace_ms);
        let settled = join_all(runs.iter().map(|run| run.settled()));
        if tokio::time::timeout(grace + Duration::from_millis(100), settled)
            .await
            .is_err()
        {
            tracing::warn!(target: "toolrun.client", "runs still settling at engine close");
        }

        if let Some(dropped) = self
            .inner
            .events_out
            .as_ref()
            .map(|out| out.dropped_count())
            .filter(|n| *n > 0)
        {
            tracing::warn!(target: "toolrun.client", dropped, "audit records were dropped");
        }

        if let Err(e) = self.inner.engine.close().await {
            tracing::warn!(target: "toolrun.client", error = %e, "engine close failed");
        }
    }
}
