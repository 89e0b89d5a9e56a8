use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::config::EventsOutConfig;

#[derive(Clone)]
pub struct EventsOutTx {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
    drop_when_full: bool,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn send_line(&self, line: String) {
        if self.drop_when_full {
            if self.tx.try_send(line).is_err() {
                let count = self.dropped.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    tracing::warn!(
                        target: "toolrun.events_out",
                        dropped_total = count + 1,
                        "events_out channel full, audit records are being dropped"
                    );
                }
            }
        } else if self.tx.send(line).await.is_err() {
            tracing::debug!(
                target: "toolrun.events_out",
                "events_out writer closed, send failed"
            );
        }
    }
}

/// Starts the background writer. `Ok(None)` when disabled by config.
pub async fn start_events_out(cfg: &EventsOutConfig) -> std::io::Result<Option<EventsOutTx>> {
    if !cfg.enabled {
        return Ok(None);
    }
    if cfg.path.trim().is_empty() {
        tracing::warn!(
            target: "toolrun.events_out",
            "events_out enabled but path is empty, audit log disabled"
        );
        return Ok(None);
    }

    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if cfg.path == "stdout:" {
        Box::new(tokio::io::stdout())
    } else {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.path)
            .await?;
        Box::new(file)
    };

    tracing::info!(
        target: "toolrun.events_out",
        path = %cfg.path,
        channel_capacity = cfg.channel_capacity,
        drop_when_full = cfg.drop_when_full,
        "events_out writer started"
    );

    let (tx, mut rx) = mpsc::channel::<String>(cfg.channel_capacity.max(1));
    let flush_each = cfg.path == "stdout:";

    tokio::spawn(async move {
        let mut write_count = 0usize;
        while let Some(mut line) = rx.recv().await {
            if !line.ends_with('\n') {
                line.push('\n');
            }
            if writer.write_all(line.as_bytes()).await.is_err() {
                tracing::error!(
                    target: "toolrun.events_out",
                    "failed to write audit record, writer task exiting"
                );
                return;
            }
            write_count += 1;
            // Flush every 10 writes, or every write for stdout.
            if (flush_each || write_count % 10 == 0) && writer.flush().await.is_err() {
                tracing::error!(target: "toolrun.events_out", "failed to flush audit log");
                return;
            }
        }
        let _ = writer.flush().await;
    });

    Ok(Some(EventsOutTx {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        drop_when_full: cfg.drop_when_full,
    }))
}
