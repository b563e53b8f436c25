/// Human-readable console status, re-rendered once per poll cycle.
/// Informational only — nothing machine-readable is promised here.
use std::fmt::Write as _;

use crate::registry::Snapshot;

/// Renders the status block for one poll cycle.
pub fn render(snapshot: &Snapshot, check_interval_secs: u64) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:02} alive Threads (1 Thread per non-recording model)",
        snapshot.pending.len()
    );
    let _ = writeln!(out, "Online Threads (models): {:02}", snapshot.recording.len());
    let _ = writeln!(out, "The following models are being recorded:");
    for recording in &snapshot.recording {
        let file = recording
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = writeln!(out, "  Model: {}  -->  File: {}", recording.model, file);
    }
    let _ = writeln!(out, "Next check in {check_interval_secs} seconds");
    out
}
