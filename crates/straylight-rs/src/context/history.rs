//! Sliding, token-budgeted command history.
//!
//! [`SlidingCliHistory`] accumulates `(command, result)` pairs across turns
//! and serves them back as a single transcript blob clipped to a caller's
//! token budget. The rolling buffer is re-trimmed on every append (front
//! first, so the oldest records fall away), which bounds memory and makes
//! the common read a no-op.
//!
//! Trimming is a uniform front-trim: when a boundary record no longer fits
//! whole, it is cut mid-record at a character boundary — visible as a
//! truncated first line in the served history, not hidden.

use super::counter::CountTokens;
use super::trim::trim_front;
use std::sync::Arc;

/// One recorded command and its output.
#[derive(Debug, Clone)]
struct HistoryRecord {
    command: String,
    output: String,
}

/// A self-trimming transcript of past commands and results.
pub struct SlidingCliHistory {
    counter: Arc<dyn CountTokens + Send + Sync>,
    max_tokens: usize,
    records: Vec<HistoryRecord>,
    buffer: String,
}

impl SlidingCliHistory {
    /// Create an empty history bounded to `max_tokens`.
    pub fn new(counter: Arc<dyn CountTokens + Send + Sync>, max_tokens: usize) -> Self {
        Self {
            counter,
            max_tokens,
            records: Vec::new(),
            buffer: String::new(),
        }
    }

    /// Append a command and its result, then re-trim the rolling buffer to
    /// the configured maximum.
    pub fn add(&mut self, command: &str, result: &str) {
        self.buffer.push_str(&format_record(command, result));
        self.buffer = trim_front(self.counter.as_ref(), self.max_tokens, &self.buffer);
        self.records.push(HistoryRecord {
            command: command.to_string(),
            output: result.to_string(),
        });
    }

    /// The transcript trimmed (front-trim) to `min(configured max, target)`
    /// tokens. Returns the empty string for an empty history.
    pub fn get(&self, target_tokens: usize) -> String {
        trim_front(
            self.counter.as_ref(),
            self.max_tokens.min(target_tokens),
            &self.buffer,
        )
    }

    /// A denser rendering: every record except the newest is compressed to
    /// its command line (outputs discarded), the newest keeps its full
    /// output, and the result is front-trimmed to the budget.
    pub fn get_commands_and_last_output(&self, target_tokens: usize) -> String {
        let mut out = String::new();
        for (i, rec) in self.records.iter().enumerate() {
            if i + 1 == self.records.len() {
                out.push_str(&format_record(&rec.command, &rec.output));
            } else {
                out.push_str(&format!("$ {}\n", rec.command));
            }
        }
        trim_front(
            self.counter.as_ref(),
            self.max_tokens.min(target_tokens),
            &out,
        )
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn format_record(command: &str, result: &str) -> String {
    format!("$ {command}\n{result}")
}

impl std::fmt::Debug for SlidingCliHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingCliHistory")
            .field("max_tokens", &self.max_tokens)
            .field("records", &self.records.len())
            .field("buffer_chars", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Roughly four characters per token — close enough to a real BPE that
    /// the damped trim steps behave proportionately.
    struct CharCounter;

    impl CountTokens for CharCounter {
        fn count_tokens(&self, text: &str) -> usize {
            text.chars().count().div_ceil(4)
        }
    }

    fn history(max: usize) -> SlidingCliHistory {
        SlidingCliHistory::new(Arc::new(CharCounter), max)
    }

    #[test]
    fn empty_history_serves_empty_string() {
        let h = history(100);
        assert_eq!(h.get(50), "");
        assert_eq!(h.get_commands_and_last_output(50), "");
        assert!(h.is_empty());
    }

    #[test]
    fn single_record_is_formatted_with_prompt_marker() {
        let mut h = history(100);
        h.add("id", "uid=1001(lowpriv) gid=1001(lowpriv)");
        let served = h.get(100);
        assert!(served.starts_with("$ id\n"));
        assert!(served.contains("uid=1001"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn budget_is_respected_after_many_adds() {
        let mut h = history(60);
        for i in 0..40 {
            h.add(
                &format!("cmd{i}"),
                &format!("output {i}: lorem ipsum dolor sit amet\n").repeat(4),
            );
        }
        for budget in [0, 5, 17, 60, 100] {
            let served = h.get(budget);
            let effective = budget.min(60);
            assert!(
                CharCounter.count_tokens(&served) <= effective || served.is_empty(),
                "budget {budget} violated: got {} tokens",
                CharCounter.count_tokens(&served)
            );
        }
    }

    #[test]
    fn oldest_records_fall_off_first() {
        let mut h = history(40);
        h.add("cat /etc/shadow", &"root:!:19000:0:99999:7:::\n".repeat(5));
        h.add(
            "sudo -l",
            &"Sorry, user lowpriv may not run sudo on target.\n".repeat(3),
        );
        h.add(
            "find / -perm -4000",
            &"/usr/bin/newgrp\n/usr/bin/chsh\n".repeat(4),
        );
        let served = h.get(40);
        assert!(served.contains("-perm -4000") || served.contains("/usr/bin/chsh"));
        assert!(!served.contains("shadow"));
        assert!(!served.contains("19000"));
    }

    #[test]
    fn get_caps_at_configured_maximum() {
        let mut h = history(25);
        for i in 0..20 {
            h.add(&format!("cmd{i}"), &"some longer output text here\n".repeat(3));
        }
        // A huge requested budget is still clipped to the instance max.
        let served = h.get(10_000);
        assert!(CharCounter.count_tokens(&served) <= 25);
    }

    #[test]
    fn commands_and_last_output_drops_older_outputs() {
        let mut h = history(1000);
        h.add("whoami", "lowpriv");
        h.add("sudo -l", "Sorry, user lowpriv may not run sudo");
        h.add("find / -perm -4000", "/usr/bin/passwd\n/usr/bin/sudo");
        let served = h.get_commands_and_last_output(1000);

        assert!(served.contains("$ whoami\n"));
        assert!(!served.contains("lowpriv\n"), "older outputs must be gone");
        assert!(served.contains("$ sudo -l\n"));
        assert!(!served.contains("Sorry, user"));
        // Newest record keeps its full output.
        assert!(served.contains("/usr/bin/passwd"));
    }

    #[test]
    fn commands_and_last_output_respects_budget() {
        let mut h = history(30);
        for i in 0..30 {
            h.add(
                &format!("cmd{i}"),
                &"a reasonably long output line for this command\n".repeat(2),
            );
        }
        let served = h.get_commands_and_last_output(30);
        assert!(CharCounter.count_tokens(&served) <= 30);
    }

    #[test]
    fn zero_budget_serves_empty() {
        let mut h = history(100);
        h.add("ls", "bin etc home");
        assert_eq!(h.get(0), "");
    }
}
