//! Character-level trimming against a token budget.
//!
//! Character count and token count are only loosely correlated, so cutting a
//! blob down to `n` tokens cannot be done with a single slice. Re-tokenizing
//! after every removed character would be O(n²) on a multi-megabyte command
//! dump. The compromise:
//!
//! 1. If the text is wildly over budget (more than [`COARSE_CUT_FACTOR`]×),
//!    do one coarse character-level cut to `COARSE_CUT_FACTOR * target`
//!    characters. A token is always at least one character, so this can
//!    never cut below the budget.
//! 2. Repeat a damped binary step — remove `(overshoot + STEP_CUT_TOKENS) / 2`
//!    characters per round — until the count fits. Each step removes at
//!    least `STEP_CUT_TOKENS / 2` characters, so the loop terminates even
//!    for a budget of zero (the text runs out).
//!
//! Two directions are provided: [`trim_front`] removes the oldest (front)
//! content and keeps the tail — used for rolling command history, where
//! recency matters. [`trim_back`] keeps the head — used for a single long
//! command result, where the beginning usually carries the signal.

use super::counter::CountTokens;

/// Tokens reserved out of the context size for the model's own reply and
/// encoding estimation slack.
pub const SAFETY_MARGIN: usize = 128;

/// Damping constant for the per-step character cut.
pub const STEP_CUT_TOKENS: usize = 128;

/// Over-budget factor beyond which a single coarse character cut is applied
/// before the fine-grained loop.
const COARSE_CUT_FACTOR: usize = 3;

/// Trim `text` to at most `target_tokens` tokens by removing characters from
/// the **front**, preserving the most recent (tail) content.
///
/// Returns the empty string if the budget cannot be met any other way
/// (including `target_tokens == 0` on non-empty input).
pub fn trim_front(counter: &dyn CountTokens, target_tokens: usize, text: &str) -> String {
    trim(counter, target_tokens, text, Direction::Front)
}

/// Trim `text` to at most `target_tokens` tokens by removing characters from
/// the **back**, preserving the beginning of the text.
pub fn trim_back(counter: &dyn CountTokens, target_tokens: usize, text: &str) -> String {
    trim(counter, target_tokens, text, Direction::Back)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Front,
    Back,
}

fn trim(counter: &dyn CountTokens, target_tokens: usize, text: &str, dir: Direction) -> String {
    let mut cur = counter.count_tokens(text);
    if cur <= target_tokens {
        return text.to_string();
    }

    let mut text = text.to_string();

    // Coarse cut: characters-per-token >= 1, so keeping COARSE_CUT_FACTOR *
    // target characters cannot undershoot the budget.
    let coarse_chars = COARSE_CUT_FACTOR.saturating_mul(target_tokens);
    if cur > coarse_chars {
        text = match dir {
            Direction::Front => keep_back_chars(&text, coarse_chars).to_string(),
            Direction::Back => keep_front_chars(&text, coarse_chars).to_string(),
        };
        cur = counter.count_tokens(&text);
    }

    while cur > target_tokens {
        let diff = cur - target_tokens;
        let step = (diff + STEP_CUT_TOKENS) / 2;
        text = match dir {
            Direction::Front => drop_front_chars(&text, step).to_string(),
            Direction::Back => {
                let keep = char_len(&text).saturating_sub(step);
                keep_front_chars(&text, keep).to_string()
            }
        };
        cur = counter.count_tokens(&text);
    }

    text
}

// ── Char-boundary-safe cuts ────────────────────────────────────────

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `n` characters of `s` (all of `s` if shorter).
fn keep_front_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => s.get(..i).unwrap_or(s),
        None => s,
    }
}

/// `s` without its first `n` characters (empty if shorter).
fn drop_front_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => s.get(i..).unwrap_or(""),
        None => "",
    }
}

/// The last `n` characters of `s` (all of `s` if shorter).
fn keep_back_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    drop_front_chars(s, len.saturating_sub(n))
}
