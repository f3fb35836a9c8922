use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypingStats {
    pub correct_chars: u32,
    pub accuracy: f64,
    pub wpm: f64,
}

/// Compute correct characters, accuracy, and words-per-minute for a typed
/// attempt against the round sentence.
///
/// Correctness is position-based: `typed[i] == sentence[i]`. A single
/// inserted character misaligns every position after it and costs all of
/// them — there is no edit-distance alignment, and that is deliberate.
/// Typed input is compared only up to the sentence length, so over-length
/// input can never score.
///
/// WPM uses the standard 5-characters-per-word convention over *correct*
/// characters only, and clamps to zero below one elapsed second so a single
/// early keystroke cannot produce an absurd rate.
///
/// Pure and deterministic: replayable from the raw typed text alone.
pub fn compute_stats(typed: &str, sentence: &str, elapsed_seconds: f64) -> TypingStats {
    let sentence_len = sentence.chars().count();

    let correct_chars = typed
        .chars()
        .zip(sentence.chars())
        .filter(|(t, s)| t == s)
        .count() as u32;

    let accuracy = if sentence_len > 0 {
        f64::from(correct_chars) / sentence_len as f64
    } else {
        0.0
    };

    let wpm = if elapsed_seconds < 1.0 {
        0.0
    } else {
        let minutes = elapsed_seconds / 60.0;
        f64::from(correct_chars) / 5.0 / minutes
    };

    TypingStats {
        correct_chars,
        accuracy,
        wpm,
    }
}
