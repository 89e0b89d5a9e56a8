//! Per-run event fan-out.
//!
//! Listeners are invoked in registration order on the run's drain task. The
//! listener set is snapshotted per event, so a listener may register further
//! listeners without deadlocking; those only see later events.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::frame::{CallFrame, PromptFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    CallProgress,
    CallConfirm,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    CallProgress(CallFrame),
    CallConfirm(CallFrame),
    Prompt(PromptFrame),
}

impl RunEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            RunEvent::CallProgress(_) => EventType::CallProgress,
            RunEvent::CallConfirm(_) => EventType::CallConfirm,
            RunEvent::Prompt(_) => EventType::Prompt,
        }
    }
}

pub type Listener = Arc<dyn Fn(&RunEvent) + Send + Sync>;

pub struct EventBus {
    listeners: Mutex<HashMap<EventType, Vec<Listener>>>,
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Mutex::new(HashMap::new()),
            sender,
        }
    }

    pub fn on(&self, event_type: EventType, listener: Listener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.entry(event_type).or_default().push(listener);
    }

    /// Streaming view of every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(&event_type).map(Vec::len).unwrap_or(0)
    }

    pub fn publish(&self, event: RunEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners
                .get(&event.event_type())
                .cloned()
                .unwrap_or_default()
        };

        for listener in snapshot {
            // A panicking listener must not take the run's drain task down.
            let res = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if res.is_err() {
                tracing::error!(
                    target: "toolrun.run",
                    event = ?event.event_type(),
                    "event listener panicked"
                );
            }
        }

        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
