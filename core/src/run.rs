//! One execution: its state machine, accumulated output and event bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::chat::ChatState;
use crate::client::ClientInner;
use crate::correlator::PendingKind;
use crate::engine::{SubmitRequest, SubmitTarget};
use crate::error::{ClientError, ContractError, EngineError, RunError};
use crate::event_bus::{EventBus, EventType, RunEvent};
use crate::events_out::{write_audit_record, AuditRecord};
use crate::frame::{CallFrame, FrameKind};
use crate::options::RunOptions;
use crate::router::Inbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Creating,
    Running,
    /// Chat turn complete; the conversation can go on with `next_chat`.
    Continue,
    Finished,
    Error,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Error | RunState::Aborted)
    }

    /// Terminal for the purpose of `text()`: the current turn is over.
    pub fn is_turn_complete(self) -> bool {
        self.is_terminal() || self == RunState::Continue
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Creating, Running | Error | Aborted) | (Running, Continue | Finished | Error | Aborted)
        )
    }
}

/// Cancellation signal shared by a Run, its drive task and the client router.
#[derive(Clone)]
pub(crate) struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(Arc::new(tx)), rx)
    }

    pub(crate) fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// What a run was created from; reused verbatim by `next_chat`.
#[derive(Debug, Clone)]
pub(crate) struct RunBasis {
    pub(crate) target: SubmitTarget,
    pub(crate) options: RunOptions,
}

#[derive(Default)]
struct RunInner {
    output: String,
    err: String,
    chat_state: Option<ChatState>,
    calls: HashMap<String, CallFrame>,
    root_call: Option<String>,
}

impl RunInner {
    fn observe_call(&mut self, call: &CallFrame) {
        let replace_root = match &self.root_call {
            None => true,
            Some(root) => {
                root != &call.id
                    && call.parent_id.is_none()
                    && self
                        .calls
                        .get(root)
                        .is_some_and(|c| c.parent_id.is_some())
            }
        };
        if replace_root {
            self.root_call = Some(call.id.clone());
        }
        if self.root_call.as_deref() == Some(call.id.as_str()) {
            self.output = call.content();
        }
        self.calls.insert(call.id.clone(), call.clone());
    }

    /// An empty terminal payload keeps the streamed root-call output.
    fn settle_output(&mut self, output: String) {
        if !output.is_empty() {
            self.output = output;
        }
    }
}

enum Outcome {
    Finished { output: String },
    Continue { output: String, state: Option<ChatState> },
    ChatDone { output: String, state: Option<ChatState> },
    Failed { error: String },
    Aborted,
}

pub(crate) struct RunShared {
    id: String,
    basis: RunBasis,
    state: watch::Sender<RunState>,
    inner: Mutex<RunInner>,
    bus: EventBus,
    cancel: CancelHandle,
}

impl RunShared {
    pub(crate) fn new(
        id: String,
        basis: RunBasis,
        event_capacity: usize,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (cancel, cancel_rx) = CancelHandle::new();
        let (state, _) = watch::channel(RunState::Creating);
        let shared = Arc::new(Self {
            id,
            basis,
            state,
            inner: Mutex::new(RunInner::default()),
            bus: EventBus::new(event_capacity),
            cancel,
        });
        (shared, cancel_rx)
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Resolves once the current turn is over, however it ended.
    pub(crate) async fn settled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.is_turn_complete()).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn transition(&self, next: RunState) -> bool {
        let changed = self.state.send_if_modified(|cur| {
            if cur.can_transition_to(next) {
                *cur = next;
                true
            } else {
                false
            }
        });
        if !changed {
            tracing::debug!(
                target: "toolrun.run",
                run_id = %self.id,
                from = ?self.state(),
                to = ?next,
                "ignored state transition"
            );
        }
        changed
    }

    /// Registers a confirm/prompt id unless the run is already cancelled.
    /// Returns whether the request should be surfaced to listeners.
    fn register_pending(&self, client: &ClientInner, id: &str, kind: PendingKind) -> bool {
        client
            .correlator()
            .register_unless(id, &self.id, kind, || self.cancel.is_cancelled())
    }

    /// Flags cancellation and drops the run's pending requests, in that order.
    pub(crate) fn cancel(&self, client: &ClientInner) -> usize {
        self.cancel.cancel();
        client.correlator().discard_run(&self.id)
    }

    fn finish(&self, outcome: Outcome) -> RunState {
        let next = {
            let mut inner = self.lock();
            match outcome {
                Outcome::Finished { output } => {
                    inner.settle_output(output);
                    RunState::Finished
                }
                Outcome::Continue { output, state } => {
                    inner.settle_output(output);
                    inner.chat_state = state;
                    RunState::Continue
                }
                Outcome::ChatDone { output, state } => {
                    inner.settle_output(output);
                    inner.chat_state = state;
                    RunState::Finished
                }
                Outcome::Failed { error } => {
                    inner.err = if error.trim().is_empty() {
                        "engine reported a failure without a message".to_string()
                    } else {
                        error
                    };
                    RunState::Error
                }
                Outcome::Aborted => RunState::Aborted,
            }
        };
        // Output and error are in place before waiters observe the state.
        self.transition(next);
        self.state()
    }
}

/// Handle to one execution.
///
/// Frames are consumed by a background task whether or not anyone listens;
/// listeners added later do not see earlier events.
pub struct Run {
    shared: Arc<RunShared>,
    client: Arc<ClientInner>,
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl Run {
    pub(crate) fn new(shared: Arc<RunShared>, client: Arc<ClientInner>) -> Self {
        Self { shared, client }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    /// Empty when no execution error occurred.
    pub fn err(&self) -> String {
        self.shared.lock().err.clone()
    }

    pub fn options(&self) -> &RunOptions {
        &self.shared.basis.options
    }

    /// Latest frame per call id.
    pub fn calls(&self) -> HashMap<String, CallFrame> {
        self.shared.lock().calls.clone()
    }

    pub fn on<F>(&self, event_type: EventType, listener: F) -> &Self
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(event_type, Arc::new(listener));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.shared.bus.subscribe()
    }

    /// Waits for the current turn to end and returns its output.
    ///
    /// A run that ends in `Error` still yields whatever output was produced;
    /// the failure is available from [`Run::err`]. Only cancellation fails
    /// the wait.
    pub async fn text(&self) -> Result<String, RunError> {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|s| s.is_turn_complete()).await {
            Ok(state) => *state,
            Err(_) => return Err(RunError::Aborted),
        };
        if state == RunState::Aborted {
            return Err(RunError::Aborted);
        }
        Ok(self.shared.lock().output.clone())
    }

    /// Resume token of a completed chat turn.
    pub fn current_chat_state(&self) -> Option<ChatState> {
        match self.state() {
            RunState::Continue | RunState::Finished => self.shared.lock().chat_state.clone(),
            _ => None,
        }
    }

    /// Starts the next turn of this conversation as a new Run.
    pub fn next_chat(&self, input: impl Into<String>) -> Result<Run, ClientError> {
        let state = self.state();
        if state != RunState::Continue {
            return Err(ContractError::NotContinuable { state }.into());
        }
        let chat_state = self.shared.lock().chat_state.clone();
        let basis = RunBasis {
            target: self.shared.basis.target.clone(),
            options: self
                .shared
                .basis
                .options
                .next_turn(input.into(), chat_state),
        };
        self.client.start_run(basis)
    }

    /// Requests cancellation. Idempotent; a no-op once the turn is over.
    pub fn close(&self) {
        if self.state().is_turn_complete() || self.shared.cancel.is_cancelled() {
            return;
        }
        let discarded = self.shared.cancel(&self.client);
        tracing::debug!(
            target: "toolrun.run",
            run_id = %self.shared.id,
            discarded_pending = discarded,
            "cancellation requested"
        );
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

/// Drives one run from submission to its final state.
pub(crate) async fn drive(
    client: Arc<ClientInner>,
    shared: Arc<RunShared>,
    mut inbox: mpsc::Receiver<Inbound>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let run_id = shared.id.clone();
    let request = SubmitRequest {
        run_id: run_id.clone(),
        target: shared.basis.target.clone(),
        options: shared.basis.options.clone(),
    };

    write_audit_record(
        client.events_out(),
        &AuditRecord::new("run.start", &run_id).with_data(json!({
            "kind": request.target.kind(),
            "engine": client.engine().name(),
        })),
    )
    .await;

    let submitted = if *cancel_rx.borrow_and_update() {
        None
    } else {
        tokio::select! {
            res = client.engine().submit(request) => Some(res),
            _ = cancel_rx.changed() => None,
        }
    };

    let stream = match submitted {
        None => {
            request_engine_cancel(&client, &run_id);
            complete(&client, &shared, Outcome::Aborted).await;
            return;
        }
        Some(Err(e)) => {
            tracing::warn!(target: "toolrun.run", run_id = %run_id, error = %e, "submission failed");
            complete(&client, &shared, Outcome::Failed { error: e.to_string() }).await;
            return;
        }
        Some(Ok(stream)) => stream,
    };

    shared.transition(RunState::Running);
    tracing::debug!(target: "toolrun.run", run_id = %run_id, "run started");

    let pump = {
        let client = client.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { client.router().pump(&run_id, stream).await })
    };

    let grace = Duration::from_millis(client.config().control.abort_grace_ms);
    let mut cancelled = *cancel_rx.borrow_and_update();
    let mut deadline = if cancelled {
        request_engine_cancel(&client, &run_id);
        Some(Instant::now() + grace)
    } else {
        None
    };

    let outcome = loop {
        tokio::select! {
            msg = inbox.recv() => match msg {
                Some(Inbound::Frame(kind)) => {
                    if let Some(outcome) = apply_frame(&client, &shared, kind, cancelled).await {
                        break outcome;
                    }
                }
                Some(Inbound::Closed(err)) => break closed_outcome(cancelled, err),
                None => break closed_outcome(cancelled, None),
            },
            res = cancel_rx.changed(), if !cancelled => {
                if res.is_ok() && *cancel_rx.borrow_and_update() {
                    cancelled = true;
                    deadline = Some(Instant::now() + grace);
                    request_engine_cancel(&client, &run_id);
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                tracing::warn!(
                    target: "toolrun.run",
                    run_id = %run_id,
                    grace_ms = grace.as_millis() as u64,
                    "engine did not close the stream after cancellation, dropping it"
                );
                break Outcome::Aborted;
            }
        }
    };

    pump.abort();
    complete(&client, &shared, outcome).await;
}

fn closed_outcome(cancelled: bool, err: Option<EngineError>) -> Outcome {
    if cancelled {
        return Outcome::Aborted;
    }
    match err {
        Some(e) => Outcome::Failed {
            error: e.to_string(),
        },
        None => Outcome::Failed {
            error: "run stream closed without a result".to_string(),
        },
    }
}

fn request_engine_cancel(client: &Arc<ClientInner>, run_id: &str) {
    let client = client.clone();
    let run_id = run_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = client.engine().cancel(&run_id).await {
            tracing::debug!(target: "toolrun.run", run_id = %run_id, error = %e, "engine cancel failed");
        }
    });
}

/// Applies one frame; returns the outcome when the frame ends the turn.
async fn apply_frame(
    client: &Arc<ClientInner>,
    shared: &RunShared,
    kind: FrameKind,
    cancelled: bool,
) -> Option<Outcome> {
    if let Some(out) = client.events_out() {
        let data = serde_json::to_value(&kind).unwrap_or(serde_json::Value::Null);
        write_audit_record(
            Some(out),
            &AuditRecord::new(kind.type_name(), &shared.id).with_data(data),
        )
        .await;
    }

    match kind {
        FrameKind::CallProgress { call } => {
            shared.lock().observe_call(&call);
            shared.bus.publish(RunEvent::CallProgress(call));
            None
        }
        FrameKind::CallConfirm { call } => {
            shared.lock().observe_call(&call);
            if shared.register_pending(client, &call.id, PendingKind::Confirm) {
                shared.bus.publish(RunEvent::CallConfirm(call));
            }
            None
        }
        FrameKind::Prompt { prompt } => {
            if shared.register_pending(client, &prompt.id, PendingKind::Prompt) {
                shared.bus.publish(RunEvent::Prompt(prompt));
            }
            None
        }
        kind if cancelled && kind.is_terminal() => {
            tracing::debug!(
                target: "toolrun.run",
                run_id = %shared.id,
                frame = kind.type_name(),
                "ignoring terminal frame after cancellation"
            );
            None
        }
        FrameKind::RunFinish { output, chat } => Some(match chat {
            Some(turn) if turn.done => Outcome::ChatDone {
                output: turn.content,
                state: turn.state,
            },
            Some(turn) => Outcome::Continue {
                output: turn.content,
                state: turn.state,
            },
            None => Outcome::Finished { output },
        }),
        FrameKind::RunError { error } => Some(Outcome::Failed { error }),
        FrameKind::Unknown => {
            tracing::trace!(target: "toolrun.run", run_id = %shared.id, "ignoring unknown frame");
            None
        }
    }
}

async fn complete(client: &Arc<ClientInner>, shared: &RunShared, outcome: Outcome) {
    // Pending decisions die with the run, before anyone can observe the end.
    client.router().remove(&shared.id);
    let discarded = client.correlator().discard_run(&shared.id);
    let state = shared.finish(outcome);

    let err = shared.lock().err.clone();
    if state == RunState::Error {
        tracing::warn!(target: "toolrun.run", run_id = %shared.id, error = %err, "run failed");
    } else {
        tracing::debug!(
            target: "toolrun.run",
            run_id = %shared.id,
            state = ?state,
            discarded_pending = discarded,
            "run ended"
        );
    }

    write_audit_record(
        client.events_out(),
        &AuditRecord::new("run.end", &shared.id).with_data(json!({
            "state": format!("{state:?}"),
            "err": err,
        })),
    )
    .await;
}
