//! Cleanup for LLM-produced command lines.
//!
//! Chat models routinely wrap the command they were asked for in markdown
//! code fences, quotes, backticks, or a literal `$ ` shell prompt. The fixer
//! peels those layers off before dispatch so the capability sees the bare
//! command. Already-clean input passes through unchanged, which makes the
//! whole pipeline idempotent.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Characters accepted as a wrapping pair (same character on both ends).
const WRAPPERS: [char; 3] = ['`', '\'', '"'];

static BACKTICK_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \n\r]*```.*\n(.*)\n```$").expect("fence regex is valid")
});

static TILDE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \n\r]*~~~.*\n(.*)\n~~~$").expect("fence regex is valid")
});

/// Strip matching wrapper characters (`` ` ``, `'`, `"`) from both ends,
/// one layer at a time.
///
/// A bounded loop rather than recursion: at most `len / 2` layers can
/// exist, so adversarially nested input (`""""cmd""""`) terminates.
pub fn remove_wrapping_characters(cmd: &str) -> &str {
    let mut cmd = cmd;
    loop {
        let mut chars = cmd.chars();
        let (first, last) = match (chars.next(), chars.next_back()) {
            (Some(f), Some(l)) => (f, l),
            // Zero or one character left: nothing to unwrap.
            _ => return cmd,
        };
        if first != last || !WRAPPERS.contains(&first) {
            return cmd;
        }
        debug!("removing wrapper {first:?} from command");
        let inner = cmd
            .get(first.len_utf8()..cmd.len() - last.len_utf8())
            .unwrap_or(cmd);
        cmd = inner;
    }
}

/// Normalize a raw LLM answer into a dispatchable command line.
///
/// In order: trim spaces/newlines, unwrap a single-line markdown code fence
/// (backtick or tilde style), strip matching wrapper characters, and drop
/// one leading `$ ` shell-prompt marker.
pub fn cmd_output_fixer(cmd: &str) -> String {
    let mut cmd = cmd.trim_matches([' ', '\n']).to_string();
    if cmd.chars().count() < 2 {
        return cmd;
    }

    for fence in [&*BACKTICK_FENCE, &*TILDE_FENCE] {
        if let Some(caps) = fence.captures(&cmd)
            && let Some(inner) = caps.get(1)
        {
            debug!("unwrapping fenced command: {}", inner.as_str());
            cmd = inner.as_str().to_string();
        }
    }

    let mut cmd = remove_wrapping_characters(&cmd).to_string();

    if let Some(stripped) = cmd.strip_prefix("$ ") {
        cmd = stripped.to_string();
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_input_unchanged() {
        assert_eq!(cmd_output_fixer("ls -la"), "ls -la");
        assert_eq!(cmd_output_fixer("sudo -l"), "sudo -l");
    }

    #[test]
    fn backtick_wrapped_command_unwrapped() {
        assert_eq!(cmd_output_fixer("`ls -la`"), "ls -la");
    }

    #[test]
    fn quoted_prompt_prefixed_command_unwrapped() {
        assert_eq!(cmd_output_fixer("\"$ whoami\""), "whoami");
    }

    #[test]
    fn fixer_is_idempotent() {
        for input in ["ls -la", "`cat /etc/passwd`", "\"$ id\"", "find / -perm -4000"] {
            let once = cmd_output_fixer(input);
            let twice = cmd_output_fixer(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn nested_wrappers_all_removed() {
        assert_eq!(cmd_output_fixer("`'\"id\"'`"), "id");
    }

    #[test]
    fn deeply_nested_quotes_terminate() {
        let wrapped = format!("{}id{}", "\"".repeat(200), "\"".repeat(200));
        assert_eq!(cmd_output_fixer(&wrapped), "id");
    }

    #[test]
    fn mismatched_wrappers_kept() {
        assert_eq!(cmd_output_fixer("'ls -la\""), "'ls -la\"");
    }

    #[test]
    fn backtick_fence_unwrapped() {
        assert_eq!(cmd_output_fixer("```bash\nsudo -l\n```"), "sudo -l");
        assert_eq!(cmd_output_fixer("```\nwhoami\n```"), "whoami");
    }

    #[test]
    fn tilde_fence_unwrapped() {
        assert_eq!(cmd_output_fixer("~~~sh\nuname -a\n~~~"), "uname -a");
    }

    #[test]
    fn leading_whitespace_before_fence_tolerated() {
        assert_eq!(cmd_output_fixer("\n ```bash\nid\n```"), "id");
    }

    #[test]
    fn prompt_prefix_stripped_once() {
        assert_eq!(cmd_output_fixer("$ ls"), "ls");
        // Only one layer comes off; an inner marker is part of the command.
        assert_eq!(cmd_output_fixer("$ $ ls"), "$ ls");
    }

    #[test]
    fn short_input_passthrough() {
        assert_eq!(cmd_output_fixer(""), "");
        assert_eq!(cmd_output_fixer("w"), "w");
        assert_eq!(cmd_output_fixer("'"), "'");
    }

    #[test]
    fn interior_quotes_preserved() {
        assert_eq!(
            cmd_output_fixer("grep -r \"password\" /etc"),
            "grep -r \"password\" /etc"
        );
    }

    #[test]
    fn remove_wrapping_characters_single_char() {
        assert_eq!(remove_wrapping_characters("x"), "x");
        assert_eq!(remove_wrapping_characters("''"), "");
    }
}
