use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for plain request/response calls. Event streams are not bounded.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// How long a cancelled run waits for the engine to close its stream.
    #[serde(default = "default_abort_grace_ms")]
    pub abort_grace_ms: u64,

    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_abort_grace_ms() -> u64 {
    5_000
}

fn default_inbox_capacity() -> usize {
    256
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            abort_grace_ms: default_abort_grace_ms(),
            inbox_capacity: default_inbox_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    #[serde(default)]
    pub enabled: bool,

    /// File path, or `stdout:`.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_events_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_drop_when_full")]
    pub drop_when_full: bool,
}

fn default_events_channel_capacity() -> usize {
    2048
}

fn default_drop_when_full() -> bool {
    true
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: String::new(),
            channel_capacity: default_events_channel_capacity(),
            drop_when_full: default_drop_when_full(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}
