//! Context window enforcement: conservative token estimation plus
//! binary-search truncation of the oldest non-system messages.

use crate::model::{Message, MessageRole};

/// Per-model-family multiplier applied to the raw token estimate, since
/// different tokenizers pack the same text into different counts.
pub fn family_multiplier(model_family: &str) -> f64 {
    match model_family {
        "anthropic" => 1.1,
        "google" => 1.05,
        _ => 1.0,
    }
}

/// `max(chars/3.5, words * 1.3)` averaged with itself is just that value;
/// the spec's "then average" refers to averaging the two estimators, not a
/// no-op — see the two terms below.
fn estimate_message_tokens(content: &str) -> f64 {
    let chars = content.chars().count() as f64;
    let words = content.split_whitespace().count() as f64;
    let by_chars = chars / 3.5;
    let by_words = words * 1.3;
    (by_chars + by_words) / 2.0
}

pub fn estimate_tokens(messages: &[Message], model_family: &str) -> f64 {
    let raw: f64 = messages.iter().map(|m| estimate_message_tokens(&m.content)).sum();
    raw * family_multiplier(model_family)
}

pub struct TruncationOutcome {
    pub original_count: usize,
    pub kept_count: usize,
    pub dropped: usize,
}

/// Enforce `limit` tokens over `messages`. When the full set already fits,
/// returns it unmodified. When it doesn't and `allow_truncation` is true,
/// keeps every `system` message plus the largest fitting suffix of
/// non-system messages (binary search over suffix length). When
/// `allow_truncation` is false, returns the messages unchanged so the
/// caller can let the provider's `ContextLimitExceeded` surface.
pub fn enforce_context_window(
    messages: &[Message],
    limit: f64,
    model_family: &str,
    allow_truncation: bool,
) -> (Vec<Message>, Option<TruncationOutcome>) {
    if estimate_tokens(messages, model_family) <= limit {
        return (messages.to_vec(), None);
    }
    if !allow_truncation {
        return (messages.to_vec(), None);
    }

    let system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .cloned()
        .collect();
    let non_system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .cloned()
        .collect();

    let system_tokens = estimate_tokens(&system, model_family);
    let budget = (limit - system_tokens).max(0.0);

    // Binary search the largest tail length of `non_system` whose token
    // estimate fits in `budget`.
    let fits = |tail_len: usize| -> bool {
        let tail = &non_system[non_system.len() - tail_len..];
        estimate_tokens(tail, model_family) <= budget
    };

    let mut lo = 0usize;
    let mut hi = non_system.len();
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let kept_tail = &non_system[non_system.len() - lo..];

    let mut kept = system.clone();
    kept.extend(kept_tail.iter().cloned());

    let outcome = TruncationOutcome {
        original_count: messages.len(),
        kept_count: kept.len(),
        dropped: messages.len() - kept.len(),
    };

    (kept, Some(outcome))
}
