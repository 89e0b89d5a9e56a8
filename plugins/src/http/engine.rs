use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;

use toolrun_core::api::{
    AuthDecision, Engine, EngineConfig, EngineError, FrameStream, PromptAnswer, SubmitRequest,
    SubmitTarget, Tool,
};

use super::sse::{SseDecoder, SseItem};
use super::wire::{decode_frame, ParseResponse};

type CancelMap = Arc<Mutex<HashMap<String, Arc<watch::Sender<bool>>>>>;

/// Engine session over the engine's HTTP API.
pub struct HttpEngine {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    cancels: CancelMap,
}

/// Drops the run's cancel entry however its stream ends.
struct CancelGuard {
    cancels: CancelMap,
    run_id: String,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        cancels.remove(&self.run_id);
    }
}

fn transport(e: reqwest::Error) -> EngineError {
    EngineError::Transport(e.to_string())
}

impl HttpEngine {
    pub fn new(cfg: &EngineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .context("failed to build engine http client")?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            http,
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
            cancels: Arc::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Plain request/response call, bounded by the request timeout.
    async fn call<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, EngineError> {
        let url = self.url(path);
        tracing::debug!(target: "toolrun.http", url = %url, "engine request");
        let resp = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await
    }

    async fn call_text<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, EngineError> {
        self.call(path, body).await?.text().await.map_err(transport)
    }

    async fn parse(&self, body: serde_json::Value) -> Result<Vec<Tool>, EngineError> {
        let resp = self.call("parse", &body).await?;
        let parsed: ParseResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        Ok(parsed.tools)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(EngineError::Rejected {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl Engine for HttpEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: SubmitRequest) -> Result<FrameStream, EngineError> {
        let path = match &request.target {
            SubmitTarget::Tools { .. } => "evaluate",
            SubmitTarget::File { .. } => "run",
        };
        let url = self.url(path);
        tracing::debug!(target: "toolrun.http", url = %url, run_id = %request.run_id, "submitting run");

        // No overall timeout: the event stream lives as long as the run.
        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;

        let run_id = request.run_id;
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        {
            let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.insert(run_id.clone(), Arc::new(cancel_tx));
        }
        let guard = CancelGuard {
            cancels: self.cancels.clone(),
            run_id: run_id.clone(),
        };

        let stream = async_stream::stream! {
            let _guard = guard;
            let mut body = resp.bytes_stream();
            let mut decoder = SseDecoder::default();

            'read: loop {
                let chunk = tokio::select! {
                    chunk = body.next() => chunk,
                    _ = cancel_rx.wait_for(|c| *c) => {
                        tracing::debug!(target: "toolrun.http", run_id = %run_id, "event stream closed locally");
                        break 'read;
                    }
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        for item in decoder.push(&bytes) {
                            match item {
                                SseItem::Done => break 'read,
                                SseItem::Data(data) => {
                                    if let Some(frame) = decode_frame(&data, &run_id) {
                                        yield Ok(frame);
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        yield Err(transport(e));
                        break 'read;
                    }
                    None => {
                        if let Some(SseItem::Data(data)) = decoder.finish() {
                            if let Some(frame) = decode_frame(&data, &run_id) {
                                yield Ok(frame);
                            }
                        }
                        break 'read;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn confirm(&self, decision: &AuthDecision) -> Result<(), EngineError> {
        self.call(&format!("confirm/{}", decision.id), decision)
            .await
            .map(drop)
    }

    async fn prompt_response(&self, answer: &PromptAnswer) -> Result<(), EngineError> {
        self.call(&format!("prompt-response/{}", answer.id), answer)
            .await
            .map(drop)
    }

    async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        let local = {
            let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.get(run_id).cloned()
        };
        if let Some(tx) = local {
            tx.send_replace(true);
        }
        self.call(&format!("abort/{run_id}"), &json!({}))
            .await
            .map(drop)
    }

    async fn list_tools(&self) -> Result<String, EngineError> {
        self.call_text("list-tools", &json!({})).await
    }

    async fn list_models(&self) -> Result<Vec<String>, EngineError> {
        let text = self.call_text("list-models", &json!({})).await?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn version(&self) -> Result<String, EngineError> {
        Ok(self.call_text("version", &json!({})).await?.trim().to_string())
    }

    async fn parse_file(&self, path: &str) -> Result<Vec<Tool>, EngineError> {
        self.parse(json!({ "file": path })).await
    }

    async fn parse_tool(&self, content: &str) -> Result<Vec<Tool>, EngineError> {
        self.parse(json!({ "content": content })).await
    }

    async fn stringify(&self, tools: &[Tool]) -> Result<String, EngineError> {
        self.call_text("fmt", &json!({ "tools": tools })).await
    }

    async fn close(&self) -> Result<(), EngineError> {
        let senders: Vec<_> = {
            let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.values().cloned().collect()
        };
        for tx in senders {
            tx.send_replace(true);
        }
        Ok(())
    }
}
