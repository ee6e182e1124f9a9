//! Convergence scoring: how similar the two agents' messages on a turn have
//! become, as a weighted sum of vocabulary overlap, structural similarity,
//! style match, and (optionally) mimicry of the other's previous message.

use std::collections::HashSet;

use crate::model::ConvergenceProfile;

struct Weights {
    vocabulary: f64,
    structural: f64,
    style: f64,
    mimicry: f64,
}

/// `strict` weights structural and vocabulary more heavily than `balanced`;
/// `semantic` weights lexical overlap more heavily than structural. Exact
/// values beyond that ordering are a configuration concern (see DESIGN.md).
fn weights_for(profile: ConvergenceProfile) -> Weights {
    match profile {
        ConvergenceProfile::Balanced => Weights {
            vocabulary: 0.3,
            structural: 0.3,
            style: 0.2,
            mimicry: 0.2,
        },
        ConvergenceProfile::Structural => Weights {
            vocabulary: 0.2,
            structural: 0.5,
            style: 0.2,
            mimicry: 0.1,
        },
        ConvergenceProfile::Semantic => Weights {
            vocabulary: 0.55,
            structural: 0.15,
            style: 0.2,
            mimicry: 0.1,
        },
        ConvergenceProfile::Strict => Weights {
            vocabulary: 0.4,
            structural: 0.4,
            style: 0.1,
            mimicry: 0.1,
        },
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn vocabulary_overlap(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn ratio(a: f64, b: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 1.0;
    }
    let (smaller, larger) = if a < b { (a, b) } else { (b, a) };
    if larger == 0.0 {
        0.0
    } else {
        smaller / larger
    }
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?']).filter(|s| !s.trim().is_empty()).count()
}

fn structural_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let len_ratio = ratio(a.chars().count() as f64, b.chars().count() as f64);
    let punct_a = a.chars().filter(|c| c.is_ascii_punctuation()).count() as f64;
    let punct_b = b.chars().filter(|c| c.is_ascii_punctuation()).count() as f64;
    let punct_ratio = ratio(punct_a, punct_b);
    let sentence_ratio = ratio(sentence_count(a) as f64, sentence_count(b) as f64);
    (len_ratio + punct_ratio + sentence_ratio) / 3.0
}

fn rate(text: &str, ch: char) -> f64 {
    let len = text.chars().count().max(1) as f64;
    text.chars().filter(|c| *c == ch).count() as f64 / len
}

fn style_match(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let question = 1.0 - (rate(a, '?') - rate(b, '?')).abs();
    let exclaim = 1.0 - (rate(a, '!') - rate(b, '!')).abs();
    ((question + exclaim) / 2.0).clamp(0.0, 1.0)
}

fn ngram_set(text: &str, n: usize) -> HashSet<Vec<String>> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < n {
        return HashSet::new();
    }
    words.windows(n).map(|w| w.to_vec()).collect()
}

fn mimicry(current: &str, previous: &str) -> f64 {
    if current.is_empty() || previous.is_empty() {
        return 0.0;
    }
    let a = ngram_set(current, 2);
    let b = ngram_set(previous, 2);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Score one turn: `content_a`/`content_b` are the two messages exchanged at
/// this turn index; `previous_of_b` is agent B's message from the prior
/// turn, used for the mimicry component (absent on turn 1).
pub fn score_turn(
    content_a: &str,
    content_b: &str,
    previous_of_b: Option<&str>,
    profile: ConvergenceProfile,
) -> f64 {
    if content_a.is_empty() && content_b.is_empty() {
        return 0.0;
    }
    if content_a == content_b && !content_a.is_empty() {
        return 1.0;
    }

    let weights = weights_for(profile);
    let vocabulary = vocabulary_overlap(content_a, content_b);
    let structural = structural_similarity(content_a, content_b);
    let style = style_match(content_a, content_b);
    let mimicry_score = previous_of_b.map(|p| mimicry(content_a, p)).unwrap_or(0.0);

    let score = weights.vocabulary * vocabulary
        + weights.structural * structural
        + weights.style * style
        + weights.mimicry * mimicry_score;

    score.clamp(0.0, 1.0)
}
