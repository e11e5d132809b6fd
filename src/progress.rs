//! Sync progress reporting.
//!
//! The engine emits one [`SyncProgress`] after every item it settles
//! (upload, delete, unchanged, skip or failure) so users can see how much is
//! left. Progress is written to **stderr** so stdout stays parseable for
//! scripts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::models::SyncResult;

/// Running counters after one settled item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub processed: u64,
    pub uploaded: u64,
    pub deleted: u64,
    pub errors: u64,
    pub total: u64,
    /// The item that just settled.
    pub current_path: Option<PathBuf>,
}

impl SyncProgress {
    pub fn new(result: &SyncResult, current_path: Option<&Path>) -> Self {
        Self {
            processed: result.processed,
            uploaded: result.uploaded,
            deleted: result.deleted,
            errors: result.errors,
            total: result.total,
            current_path: current_path.map(Path::to_path_buf),
        }
    }
}

/// Receives progress events. Called from the reconciliation loop.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: &SyncProgress);
}

impl<F> SyncProgressReporter for F
where
    F: Fn(&SyncProgress) + Send + Sync,
{
    fn report(&self, event: &SyncProgress) {
        self(event)
    }
}

/// Human-friendly progress on stderr: "sync  1,234 / 5,000 files  src/a.rs".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: &SyncProgress) {
        let mut line = format!(
            "sync  {} / {} files",
            format_number(event.processed),
            format_number(event.total)
        );
        if event.errors > 0 {
            line.push_str(&format!("  ({} errors)", format_number(event.errors)));
        }
        if let Some(path) = &event.current_path {
            line.push_str(&format!("  {}", path.display()));
        }
        line.push('\n');
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: &SyncProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "processed": event.processed,
            "uploaded": event.uploaded,
            "deleted": event.deleted,
            "errors": event.errors,
            "total": event.total,
            "path": event.current_path.as_ref().map(|p| p.display().to_string()),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: &SyncProgress) {}
}

/// One-line summary of a finished pass.
///
/// `"<verb> <processed> files[, would have uploaded N changed or new files][, would have deleted M files]"`
/// in dry-run mode; the real-run form reports what was done.
pub fn summary_line(verb: &str, result: &SyncResult, dry_run: bool) -> String {
    let mut line = format!("{} {} files", verb, format_number(result.processed));
    if dry_run {
        if result.uploaded > 0 {
            line.push_str(&format!(
                ", would have uploaded {} changed or new files",
                format_number(result.uploaded)
            ));
        }
        if result.deleted > 0 {
            line.push_str(&format!(
                ", would have deleted {} files",
                format_number(result.deleted)
            ));
        }
    } else {
        if result.uploaded > 0 {
            line.push_str(&format!(
                ", uploaded {} changed or new files",
                format_number(result.uploaded)
            ));
        }
        if result.deleted > 0 {
            line.push_str(&format!(", deleted {} files", format_number(result.deleted)));
        }
    }
    line
}

pub fn format_number(n: u64) -> String {
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    /// Build a reporter for this mode. Caller passes it to the engine.
    pub fn reporter(&self) -> Arc<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn dry_run_summary_lists_only_nonzero_parts() {
        let mut result = SyncResult {
            processed: 12,
            uploaded: 3,
            deleted: 0,
            ..SyncResult::default()
        };
        assert_eq!(
            summary_line("Scanned", &result, true),
            "Scanned 12 files, would have uploaded 3 changed or new files"
        );
        result.deleted = 2;
        assert_eq!(
            summary_line("Scanned", &result, true),
            "Scanned 12 files, would have uploaded 3 changed or new files, would have deleted 2 files"
        );
        result.uploaded = 0;
        result.deleted = 0;
        assert_eq!(summary_line("Scanned", &result, true), "Scanned 12 files");
    }

    #[test]
    fn real_summary_reports_work_done() {
        let result = SyncResult {
            processed: 1500,
            uploaded: 1,
            deleted: 4,
            ..SyncResult::default()
        };
        assert_eq!(
            summary_line("Synced", &result, false),
            "Synced 1,500 files, uploaded 1 changed or new files, deleted 4 files"
        );
    }

    #[test]
    fn closures_are_reporters() {
        let seen = Mutex::new(Vec::new());
        let reporter = |p: &SyncProgress| seen.lock().unwrap().push(p.processed);
        reporter.report(&SyncProgress {
            processed: 7,
            ..SyncProgress::default()
        });
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
