//! Ingestion progress reporting.
//!
//! Reports observable progress during `docvec ingest` so users see what is
//! queued, what is running, and how each document ended. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::{IsTerminal, Write};

use crate::queue::IngestEvent;

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. `done` and `total` count finished jobs.
    fn report(&self, event: &IngestEvent, done: u64, total: u64);
}

/// Human-friendly progress on stderr: "ingest  [3 / 12]  notes-1  completed (success, 4 chunks)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &IngestEvent, done: u64, total: u64) {
        let status = match event {
            IngestEvent::Queued { position, .. } => format!("queued at {}", position),
            IngestEvent::Started { .. } => "started".to_string(),
            IngestEvent::Completed {
                status,
                chunks,
                vectors,
                ..
            } => format!(
                "completed ({}, {} chunks, {} vectors)",
                status, chunks, vectors
            ),
            IngestEvent::Failed { error, .. } => format!("failed: {}", error),
            IngestEvent::Cancelled { .. } => "cancelled".to_string(),
        };
        let line = format!(
            "ingest  [{} / {}]  {}  {}\n",
            format_number(done),
            format_number(total),
            event.id(),
            status
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &IngestEvent, done: u64, total: u64) {
        let mut obj = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(_) => return,
        };
        obj["done"] = serde_json::json!(done);
        obj["total"] = serde_json::json!(total);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &IngestEvent, _done: u64, _total: u64) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: '{}'. Use human, json, or off.", other),
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
