//! Routes engine frames to the inbox of the run they belong to.
//!
//! The routing table lock is only held to look up (and clone) an inbox sender,
//! never while a frame is being delivered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::engine::FrameStream;
use crate::error::EngineError;
use crate::frame::{EngineFrame, FrameKind};
use crate::run::RunShared;

#[derive(Debug)]
pub(crate) enum Inbound {
    Frame(FrameKind),
    /// The run's stream ended; `Some` when it ended on a transport error.
    Closed(Option<EngineError>),
}

struct Route {
    inbox: mpsc::Sender<Inbound>,
    run: Arc<RunShared>,
}

#[derive(Default)]
pub(crate) struct Router {
    routes: Mutex<HashMap<String, Route>>,
}

impl Router {
    pub(crate) fn register(&self, run: Arc<RunShared>, inbox: mpsc::Sender<Inbound>) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.insert(run.id().to_string(), Route { inbox, run });
    }

    pub(crate) fn remove(&self, run_id: &str) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.remove(run_id);
    }

    fn inbox(&self, run_id: &str) -> Option<mpsc::Sender<Inbound>> {
        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.get(run_id).map(|r| r.inbox.clone())
    }

    /// Snapshot of every routed run, for cancellation on client close.
    pub(crate) fn runs(&self) -> Vec<Arc<RunShared>> {
        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.values().map(|r| r.run.clone()).collect()
    }

    /// Delivers one frame. Unroutable frames are logged and dropped.
    pub(crate) async fn dispatch(&self, frame: EngineFrame) -> bool {
        let EngineFrame { run_id, kind } = frame;
        let Some(inbox) = self.inbox(&run_id) else {
            tracing::warn!(
                target: "toolrun.router",
                run_id = %run_id,
                frame = kind.type_name(),
                "dropping frame for unknown run"
            );
            return false;
        };
        inbox.send(Inbound::Frame(kind)).await.is_ok()
    }

    /// Drains one submitted stream, routing each frame by its run id. The
    /// stream's own run is told when the stream ends.
    pub(crate) async fn pump(&self, run_id: &str, mut stream: FrameStream) {
        let closed = loop {
            match stream.next().await {
                Some(Ok(frame)) => {
                    self.dispatch(frame).await;
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            }
        };
        if let Some(inbox) = self.inbox(run_id) {
            let _ = inbox.send(Inbound::Closed(closed)).await;
        }
    }
}
