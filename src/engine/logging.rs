use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};

/// Pluggable per-request log line formatter: (start time, status, latency)
/// in, one line of text out (without trailing newline).
pub type LineFormatter = Arc<dyn Fn(SystemTime, u16, Duration) -> String + Send + Sync>;

/// A log destination shared across connections. The per-line lock keeps
/// interleaved writers from splicing lines.
pub type LogWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub fn stdout_writer() -> LogWriter {
    Arc::new(Mutex::new(Box::new(tokio::io::stdout())))
}

pub async fn file_writer(path: impl AsRef<Path>) -> std::io::Result<LogWriter> {
    let file = tokio::fs::File::create(path).await?;
    Ok(Arc::new(Mutex::new(Box::new(file))))
}

/// Structured form: one JSON object per line with a nanosecond-precision
/// clock timestamp, the integer status, and the latency in milliseconds
/// with three decimals.
pub fn json_line(start: SystemTime, status: u16, latency: Duration) -> String {
    let timestamp = chrono::DateTime::<chrono::Local>::from(start)
        .format("%H:%M:%S%.9f")
        .to_string();
    serde_json::json!({
        "timestamp": timestamp,
        "status": status,
        "latency": format!("{:.3}ms", latency.as_secs_f64() * 1000.0),
    })
    .to_string()
}

/// Compact form: three whitespace-separated integers — microsecond epoch
/// timestamp, status code, latency in microseconds.
pub fn compact_line(start: SystemTime, status: u16, latency: Duration) -> String {
    let epoch_us = start
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    format!("{} {} {}", epoch_us, status, latency.as_micros())
}

pub fn default_formatter() -> LineFormatter {
    Arc::new(json_line)
}

/// Drains the log-line queue into the destination. Runs until every
/// producer handle is dropped, then flushes.
pub(crate) async fn run_log_sink(mut rx: mpsc::Receiver<String>, writer: LogWriter) {
    while let Some(line) = rx.recv().await {
        let mut out = writer.lock().await;
        if out.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if out.write_all(b"\n").await.is_err() {
            break;
        }
    }
    let _ = writer.lock().await.flush().await;
}
