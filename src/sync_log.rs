//! Background sync log writer: the hot request path only ever pushes a record into an
//! unbounded channel, and a single background task owns the actual I/O, modeled on the
//! `TaskForwarder`/`GazetteWriter` split used elsewhere for async log forwarding.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// One record per divergent backend per request.
#[derive(Debug, Clone, Serialize)]
pub struct SyncLogRecord {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub cluster: String,
    pub backend: String,
    /// Either the HTTP status the backend returned, or the transport error it failed with.
    pub status_or_error: String,
    pub chosen_backend: String,
}

#[derive(Clone)]
pub struct SyncLogSender {
    tx: mpsc::UnboundedSender<SyncLogRecord>,
}

impl SyncLogSender {
    /// Queues `record` for the background writer. Never blocks the request path; a full send
    /// failure (writer task gone) is swallowed, since there is nothing a dispatcher could usefully
    /// do about it other than drop the record anyway.
    pub fn record(&self, record: SyncLogRecord) {
        metrics::counter!("akubra_sync_log_records").increment(1);
        let _ = self.tx.send(record);
    }
}

/// Spawns the background writer task and returns a handle producers can clone freely.
/// `sink` receives one JSON object per line.
pub fn spawn(mut sink: impl Write + Send + 'static) -> SyncLogSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncLogRecord>();

    tokio::task::spawn_blocking(move || {
        // `rx.blocking_recv()` pumps the channel from a blocking-pool thread so the async
        // writer producers never wait on file/stdout I/O.
        while let Some(record) = rx.blocking_recv() {
            if let Ok(line) = serde_json::to_string(&record) {
                let _ = writeln!(sink, "{line}");
            }
        }
    });

    SyncLogSender { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_json_line_per_record() {
        let buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));
        struct SharedWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for SharedWriter {
            fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().write(data)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sender = spawn(SharedWriter(buf.clone()));
        sender.record(SyncLogRecord {
            timestamp: Utc::now(),
            method: "PUT".to_string(),
            path: "/index/a".to_string(),
            cluster: "cluster1".to_string(),
            backend: "http://backend-a".to_string(),
            status_or_error: "500".to_string(),
            chosen_backend: "http://backend-b".to_string(),
        });

        // Give the blocking task a chance to drain the channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(out.contains("\"cluster\":\"cluster1\""));
        assert!(out.ends_with('\n'));
    }
}
