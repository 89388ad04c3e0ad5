//! A capability-internal scratchpad.

use super::core::{Capability, CapabilityFuture, CapabilityOutcome, ParamSpec, ParamValue};
use std::sync::Mutex;

/// Lets the LLM jot down findings (discovered credentials, interesting
/// files) without taking an action against the target. Never signals the
/// goal.
pub struct RecordNote {
    notes: Mutex<Vec<(String, String)>>,
}

impl RecordNote {
    pub fn new() -> Self {
        Self {
            notes: Mutex::new(Vec::new()),
        }
    }

    /// All recorded `(title, content)` pairs, in submission order.
    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for RecordNote {
    fn default() -> Self {
        Self::new()
    }
}

impl Capability for RecordNote {
    fn name(&self) -> &str {
        "record_note"
    }

    fn describe(&self) -> String {
        "record a note with a single-word title and free-text content, to keep track of \
         findings for later turns"
            .to_string()
    }

    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::str("title"), ParamSpec::str("content")];
        PARAMS
    }

    fn execute(&self, args: &[ParamValue]) -> CapabilityFuture<'_> {
        let title = args
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let content = args
            .get(1)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Box::pin(async move {
            let mut notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
            notes.push((title.clone(), content));
            CapabilityOutcome::ok(format!("note '{title}' recorded ({} total)", notes.len()))
        })
    }
}
