//! In-process engine that plays back a script of frames per submitted run.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use toolrun_core::api::{
    AuthDecision, CallFrame, ChatState, ChatTurn, ClientConfig, Engine, EngineError, EngineFrame,
    FrameKind, FrameStream, Output, PromptAnswer, PromptFrame, SubmitRequest, Tool,
};

pub enum Step {
    /// Cumulative progress for a call.
    Progress {
        call: &'static str,
        parent: Option<&'static str>,
        content: String,
    },
    /// Raw frame, possibly addressed to another run id.
    Raw(EngineFrame),
    /// Asks for confirmation of `input`, then reports the result on the root call.
    Confirm {
        call: &'static str,
        input: String,
        accepted_output: String,
    },
    /// Asks for one field, then greets with the answer.
    Prompt { id: &'static str, field: String },
    Finish(String),
    Chat {
        content: String,
        state: Option<&'static str>,
        done: bool,
    },
    Fail(String),
    Sleep(u64),
    /// Stays open until cancelled.
    Hang,
}

pub fn progress(call: &'static str, content: impl Into<String>) -> Step {
    Step::Progress {
        call,
        parent: None,
        content: content.into(),
    }
}

/// Ends the run, leaving the streamed root-call output as the result.
pub fn finish_streamed() -> Step {
    Step::Finish(String::new())
}

pub fn child_progress(call: &'static str, parent: &'static str, content: impl Into<String>) -> Step {
    Step::Progress {
        call,
        parent: Some(parent),
        content: content.into(),
    }
}

type Script = dyn Fn(&SubmitRequest) -> Vec<Step> + Send + Sync;

#[derive(Default)]
struct State {
    requests: Mutex<Vec<SubmitRequest>>,
    decisions: Mutex<HashMap<String, oneshot::Sender<AuthDecision>>>,
    answers: Mutex<HashMap<String, oneshot::Sender<PromptAnswer>>>,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
    cancel_calls: Mutex<Vec<String>>,
    closed: AtomicBool,
}

pub struct ScriptedEngine {
    script: Box<Script>,
    state: Arc<State>,
    ignore_cancel: bool,
}

impl ScriptedEngine {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&SubmitRequest) -> Vec<Step> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            state: Arc::new(State::default()),
            ignore_cancel: false,
        })
    }

    /// An engine that never closes a stream on cancel.
    pub fn stubborn<F>(script: F) -> Arc<Self>
    where
        F: Fn(&SubmitRequest) -> Vec<Step> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            state: Arc::new(State::default()),
            ignore_cancel: true,
        })
    }

    pub fn requests(&self) -> Vec<SubmitRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.state.cancel_calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

fn call_frame(id: &str, parent: Option<&str>, content: &str) -> CallFrame {
    CallFrame {
        id: id.to_string(),
        tool_name: None,
        parent_id: parent.map(str::to_string),
        output: vec![Output {
            content: content.to_string(),
        }],
        input: None,
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, request: SubmitRequest) -> Result<FrameStream, EngineError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let steps = (self.script)(&request);
        self.state.requests.lock().unwrap().push(request.clone());

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        // A stubborn engine keeps the sender to itself so nothing flips it.
        let keep_alive = if self.ignore_cancel {
            Some(cancel_tx)
        } else {
            self.state
                .cancels
                .lock()
                .unwrap()
                .insert(request.run_id.clone(), cancel_tx);
            None
        };

        let state = self.state.clone();
        let run_id = request.run_id;
        let stream = async_stream::stream! {
            let _keep_alive = keep_alive;
            let mut root = String::from("root");
            for step in steps {
                if *cancel_rx.borrow() {
                    return;
                }
                match step {
                    Step::Progress { call, parent, content } => {
                        yield Ok(EngineFrame::new(&run_id, FrameKind::CallProgress {
                            call: call_frame(call, parent, &content),
                        }));
                        if parent.is_none() {
                            root = call.to_string();
                        }
                    }
                    Step::Raw(frame) => yield Ok(frame),
                    Step::Confirm { call, input, accepted_output } => {
                        let (tx, rx) = oneshot::channel();
                        state.decisions.lock().unwrap().insert(call.to_string(), tx);
                        let mut frame = call_frame(call, Some(&root), "");
                        frame.input = Some(input);
                        yield Ok(EngineFrame::new(&run_id, FrameKind::CallConfirm { call: frame }));
                        let decision = tokio::select! {
                            d = rx => d,
                            _ = cancel_rx.wait_for(|c| *c) => return,
                        };
                        let text = match decision {
                            Ok(d) if d.accept => accepted_output,
                            Ok(d) => format!(
                                "authorization error: {}",
                                d.message.unwrap_or_else(|| "denied".into())
                            ),
                            Err(_) => return,
                        };
                        yield Ok(EngineFrame::new(&run_id, FrameKind::CallProgress {
                            call: call_frame(&root, None, &text),
                        }));
                    }
                    Step::Prompt { id, field } => {
                        let (tx, rx) = oneshot::channel();
                        state.answers.lock().unwrap().insert(id.to_string(), tx);
                        yield Ok(EngineFrame::new(&run_id, FrameKind::Prompt {
                            prompt: PromptFrame {
                                id: id.to_string(),
                                message: format!("Please enter your {field}"),
                                fields: vec![field.clone()],
                                ..PromptFrame::default()
                            },
                        }));
                        let answer = tokio::select! {
                            a = rx => a,
                            _ = cancel_rx.wait_for(|c| *c) => return,
                        };
                        let Ok(answer) = answer else { return };
                        let name = answer.responses.get(&field).cloned().unwrap_or_default();
                        yield Ok(EngineFrame::new(&run_id, FrameKind::CallProgress {
                            call: call_frame(&root, None, &format!("Hello, {name}!")),
                        }));
                    }
                    Step::Finish(output) => {
                        yield Ok(EngineFrame::new(&run_id, FrameKind::RunFinish { output, chat: None }));
                    }
                    Step::Chat { content, state: token, done } => {
                        yield Ok(EngineFrame::new(&run_id, FrameKind::RunFinish {
                            output: content.clone(),
                            chat: Some(ChatTurn {
                                content,
                                state: token.map(ChatState::new),
                                done,
                            }),
                        }));
                    }
                    Step::Fail(error) => {
                        yield Ok(EngineFrame::new(&run_id, FrameKind::RunError { error }));
                    }
                    Step::Sleep(ms) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                            _ = cancel_rx.wait_for(|c| *c) => return,
                        }
                    }
                    Step::Hang => {
                        let _ = cancel_rx.wait_for(|c| *c).await;
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn confirm(&self, decision: &AuthDecision) -> Result<(), EngineError> {
        let tx = self.state.decisions.lock().unwrap().remove(&decision.id);
        match tx {
            Some(tx) => {
                let _ = tx.send(decision.clone());
                Ok(())
            }
            None => Err(EngineError::Rejected {
                status: 404,
                body: format!("no confirmation {}", decision.id),
            }),
        }
    }

    async fn prompt_response(&self, answer: &PromptAnswer) -> Result<(), EngineError> {
        let tx = self.state.answers.lock().unwrap().remove(&answer.id);
        match tx {
            Some(tx) => {
                let _ = tx.send(answer.clone());
                Ok(())
            }
            None => Err(EngineError::Rejected {
                status: 404,
                body: format!("no prompt {}", answer.id),
            }),
        }
    }

    async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        self.state.cancel_calls.lock().unwrap().push(run_id.to_string());
        if let Some(tx) = self.state.cancels.lock().unwrap().get(run_id) {
            tx.send_replace(true);
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<String, EngineError> {
        Ok("sys.exec\nsys.read".to_string())
    }

    async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        Ok(vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()])
    }

    async fn version(&self) -> Result<String, EngineError> {
        Ok("scripted 1.0".to_string())
    }

    async fn parse_file(&self, path: &str) -> Result<Vec<Tool>, EngineError> {
        Ok(vec![Tool::new(format!("from {path}"))])
    }

    async fn parse_tool(&self, content: &str) -> Result<Vec<Tool>, EngineError> {
        Ok(vec![Tool::new(content)])
    }

    async fn stringify(&self, tools: &[Tool]) -> Result<String, EngineError> {
        Ok(tools
            .iter()
            .map(|t| t.instructions.as_str())
            .collect::<Vec<_>>()
            .join("\n---\n"))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.state.closed.store(true, Ordering::SeqCst);
        let cancels = self.state.cancels.lock().unwrap();
        for tx in cancels.values() {
            tx.send_replace(true);
        }
        Ok(())
    }
}

/// Routes `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> ClientConfig {
    init_tracing();
    let mut cfg = ClientConfig::default();
    cfg.control.abort_grace_ms = 200;
    cfg
}
