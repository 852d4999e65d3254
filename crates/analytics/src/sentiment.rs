//! Keyword-polarity scoring for free-text feedback.
//!
//! This is a deterministic baseline, not language understanding: each token
//! is matched against fixed positive and negative word lists, and the score
//! is the normalized difference of the hit counts.

use serde::{Deserialize, Serialize};

const POSITIVE_WORDS: &[&str] = &[
    "amazing", "awesome", "easy", "excellent", "fast", "friendly", "good", "great", "happy",
    "helpful", "intuitive", "love", "nice", "perfect", "recommend", "simple", "smooth", "useful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "annoying", "awful", "bad", "broken", "bug", "confusing", "difficult", "expensive", "frustrating",
    "hate", "hard", "poor", "slow", "terrible", "unclear", "useless", "worse", "worst",
];

/// Score at or beyond which the label leaves neutral.
const LABEL_THRESHOLD: f64 = 0.2;
/// Repeats of one character that mark keyboard mashing.
const MAX_CHAR_RUN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// `(positive - negative) / (positive + negative)`, 0 with no hits.
    pub score: f64,
    pub positive_hits: usize,
    pub negative_hits: usize,
    pub label: SentimentLabel,
    pub gibberish: bool,
}

pub fn score_sentiment(text: &str) -> SentimentScore {
    let mut positive_hits = 0;
    let mut negative_hits = 0;
    for token in tokens(text) {
        if POSITIVE_WORDS.contains(&token.as_str()) {
            positive_hits += 1;
        } else if NEGATIVE_WORDS.contains(&token.as_str()) {
            negative_hits += 1;
        }
    }

    let total = positive_hits + negative_hits;
    let score = if total > 0 {
        (positive_hits as f64 - negative_hits as f64) / total as f64
    } else {
        0.0
    };
    let label = if score >= LABEL_THRESHOLD {
        SentimentLabel::Positive
    } else if score <= -LABEL_THRESHOLD {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    };

    SentimentScore {
        score,
        positive_hits,
        negative_hits,
        label,
        gibberish: is_gibberish(text),
    }
}

/// Flags answers that are too short, mostly non-letters, vowel-less, or
/// contain a long run of one repeated character.
pub fn is_gibberish(text: &str) -> bool {
    let visible: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if visible.len() < 3 {
        return true;
    }

    let letters = visible.iter().filter(|c| c.is_alphabetic()).count();
    if letters * 2 < visible.len() {
        return true;
    }

    let mut run = 1;
    for w in visible.windows(2) {
        if w[0].to_lowercase().eq(w[1].to_lowercase()) {
            run += 1;
            if run >= MAX_CHAR_RUN {
                return true;
            }
        } else {
            run = 1;
        }
    }

    let words: Vec<String> = tokens(text).filter(|t| t.chars().any(char::is_alphabetic)).collect();
    !words.is_empty() && words.iter().all(|w| !w.chars().any(is_vowel))
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}
