//! Sync progress reporting.
//!
//! Reports observable progress during `codesync sync` so users see what is
//! being scanned, how much of the plan is left, and how the run ended.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::models::PlanSummary;

/// A single progress event for a sync run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Walking and fingerprinting the codebase. Total unknown.
    Scanning { root: String },
    /// The plan is known.
    Planned { root: String, plan: PlanSummary },
    /// `n` of `total` planned files reconciled.
    Reconciling { root: String, n: u64, total: u64 },
    Finished {
        root: String,
        processed: u64,
        failed: u64,
        cancelled: bool,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync /repo  reconciling  1,234 / 5,000 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Scanning { root } => format!("sync {}  scanning...\n", root),
            SyncProgressEvent::Planned { root, plan } => format!(
                "sync {}  planned  +{} ~{} -{}\n",
                root,
                format_number(plan.added as u64),
                format_number(plan.modified as u64),
                format_number(plan.removed as u64)
            ),
            SyncProgressEvent::Reconciling { root, n, total } => format!(
                "sync {}  reconciling  {} / {} files\n",
                root,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Finished {
                root,
                processed,
                failed,
                cancelled,
            } => format!(
                "sync {}  {}  {} files, {} failed\n",
                root,
                if *cancelled { "cancelled" } else { "done" },
                format_number(*processed),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "scanning"
            }),
            SyncProgressEvent::Planned { root, plan } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "planned",
                "added": plan.added,
                "modified": plan.modified,
                "removed": plan.removed
            }),
            SyncProgressEvent::Reconciling { root, n, total } => serde_json::json!({
                "event": "progress",
                "root": root,
                "phase": "reconciling",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Finished {
                root,
                processed,
                failed,
                cancelled,
            } => serde_json::json!({
                "event": "finished",
                "root": root,
                "processed": processed,
                "failed": failed,
                "cancelled": cancelled
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
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
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
