//! Text statistics, readability, complexity, tags, and language detection.
//!
//! Everything here is a pure function of the input text: analyzing the
//! same text twice yields identical results.
//!
//! # Signals
//!
//! | Signal | How |
//! |--------|-----|
//! | words | whitespace split |
//! | sentences | split on `.`, `!`, `?` |
//! | paragraphs | split on blank lines |
//! | syllables | vowel-group transitions per word |
//! | readability | Flesch reading ease, clamped to `[0, 100]` |
//! | complexity | technical terms + code likelihood + long sentences, clamped to `[0, 100]` |
//! | language | stop-word overlap ratio, `"unknown"` below a confidence floor |

use std::collections::{BTreeMap, HashSet};

use crate::chunk::looks_like_code;
use crate::models::DocumentStatistics;

/// Sentences longer than this many words count as long.
const LONG_SENTENCE_WORDS: usize = 25;
/// Minimum stop-word ratio for a language guess.
const LANGUAGE_CONFIDENCE_FLOOR: f64 = 0.08;
/// Words per minute used for the reading-time estimate.
const READING_WPM: f64 = 200.0;
const MAX_TAGS: usize = 8;
const UNKNOWN_LANGUAGE: &str = "unknown";

const TECHNICAL_TERMS: &[&str] = &[
    "algorithm", "api", "architecture", "async", "backend", "bandwidth", "cache",
    "compiler", "concurrency", "configuration", "database", "deployment", "embedding",
    "encryption", "endpoint", "framework", "function", "http", "index", "infrastructure",
    "interface", "kernel", "latency", "middleware", "protocol", "query", "runtime",
    "schema", "server", "throughput", "vector", "variable",
];

const STOP_WORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "was", "of", "to", "in", "that", "it", "for", "on",
            "with", "as", "this", "be", "at", "by", "from", "or", "an", "have", "not", "but",
            "they", "which", "you", "we", "a",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "de", "que", "y", "en", "un", "una", "es", "por", "con",
            "para", "se", "del", "al", "lo", "como", "pero", "su", "sus", "muy",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "de", "des", "et", "est", "un", "une", "du", "que", "qui",
            "dans", "pour", "pas", "sur", "avec", "ce", "il", "elle", "nous", "vous", "au",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "zu", "den", "mit",
            "von", "sich", "des", "auf", "für", "im", "dem", "auch", "es", "wir", "ich",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "la", "gli", "le", "di", "che", "e", "è", "un", "una", "per", "non",
            "con", "sono", "della", "del", "nel", "anche", "come", "questo", "ma",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "as", "de", "que", "e", "é", "um", "uma", "do", "da", "em", "para",
            "com", "não", "por", "mais", "dos", "das", "como", "mas", "ao",
        ],
    ),
];

/// Controls which optional signals [`analyze_text`] computes.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    pub detect_language: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            detect_language: true,
        }
    }
}

/// Result of analyzing one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub language: String,
    pub tags: Vec<String>,
    pub word_count: usize,
    pub character_count: usize,
    pub statistics: DocumentStatistics,
}

/// Analyze a text with default options.
pub fn analyze(text: &str) -> Analysis {
    analyze_text(text, AnalyzeOptions::default())
}

/// Analyze a text.
pub fn analyze_text(text: &str, options: AnalyzeOptions) -> Analysis {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len();
    let sentences = split_sentences(text);
    let sentence_count = sentences.len();
    let paragraph_count = count_paragraphs(text);

    let long_sentence_count = sentences
        .iter()
        .filter(|s| s.split_whitespace().count() > LONG_SENTENCE_WORDS)
        .count();

    let syllables: usize = words.iter().map(|w| count_syllables(w)).sum();
    let avg_words_per_sentence = ratio(word_count, sentence_count);
    let avg_syllables_per_word = ratio(syllables, word_count);

    let readability = if word_count == 0 {
        0.0
    } else {
        (206.835 - 1.015 * avg_words_per_sentence - 84.6 * avg_syllables_per_word)
            .clamp(0.0, 100.0)
    };

    let code = looks_like_code(text);
    let normalized = normalized_words(text);
    let complexity = complexity_score(&words, &normalized, code, long_sentence_count);

    let language = if options.detect_language {
        detect_language(&normalized)
    } else {
        UNKNOWN_LANGUAGE.to_string()
    };

    let mut tags = extract_keywords(&normalized, MAX_TAGS);
    if code {
        tags.push("code".to_string());
    }

    Analysis {
        language,
        tags,
        word_count,
        character_count: text.chars().count(),
        statistics: DocumentStatistics {
            word_count,
            sentence_count,
            paragraph_count,
            avg_words_per_sentence,
            avg_syllables_per_word,
            readability,
            complexity,
            long_sentence_count,
            looks_like_code: code,
            reading_time_minutes: word_count as f64 / READING_WPM,
        },
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Non-empty pieces between sentence-terminal punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Non-empty blocks separated by blank lines.
fn count_paragraphs(text: &str) -> usize {
    let mut count = 0;
    let mut in_paragraph = false;
    for line in text.lines() {
        if line.trim().is_empty() {
            in_paragraph = false;
        } else if !in_paragraph {
            in_paragraph = true;
            count += 1;
        }
    }
    count
}

/// Lowercased alphabetic words with surrounding punctuation removed.
fn normalized_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty() && w.chars().any(char::is_alphabetic))
        .collect()
}

/// Estimate syllables by counting vowel-group transitions.
///
/// `y` counts as a vowel; a trailing silent `e` is discounted; every word
/// has at least one syllable.
pub fn count_syllables(word: &str) -> usize {
    let letters: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();
    if letters.is_empty() {
        return 0;
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
    let mut groups = 0;
    let mut prev_vowel = false;
    for &c in &letters {
        let v = is_vowel(c);
        if v && !prev_vowel {
            groups += 1;
        }
        prev_vowel = v;
    }

    let n = letters.len();
    if groups > 1 && letters[n - 1] == 'e' && !is_vowel(letters[n - 2]) {
        groups -= 1;
    }
    groups.max(1)
}

fn complexity_score(
    words: &[&str],
    normalized: &[String],
    code: bool,
    long_sentences: usize,
) -> f64 {
    let technical_hits = normalized
        .iter()
        .filter(|w| TECHNICAL_TERMS.contains(&w.as_str()))
        .count();

    let mut score = (technical_hits as f64 * 2.0).min(40.0);
    if code {
        score += 20.0;
    }
    score += (long_sentences as f64 * 5.0).min(30.0);

    let total_len: usize = words.iter().map(|w| w.chars().count()).sum();
    if !words.is_empty() && total_len as f64 / words.len() as f64 > 6.0 {
        score += 10.0;
    }
    score.clamp(0.0, 100.0)
}

/// Guess a language tag from stop-word overlap; `"unknown"` when no list
/// reaches the confidence floor.
pub fn detect_language(words: &[String]) -> String {
    if words.is_empty() {
        return UNKNOWN_LANGUAGE.to_string();
    }

    let mut best: Option<(&str, f64)> = None;
    for (lang, list) in STOP_WORDS {
        let hits = words.iter().filter(|w| list.contains(&w.as_str())).count();
        let score = hits as f64 / words.len() as f64;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((lang, score));
        }
    }

    match best {
        Some((lang, score)) if score >= LANGUAGE_CONFIDENCE_FLOOR => lang.to_string(),
        _ => UNKNOWN_LANGUAGE.to_string(),
    }
}

/// Most frequent non-stop-word terms of at least four characters.
/// Ties are broken alphabetically.
fn extract_keywords(words: &[String], limit: usize) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS
        .iter()
        .flat_map(|(_, list)| list.iter().copied())
        .collect();

    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for w in words {
        if w.chars().count() >= 4 && !stop.contains(w.as_str()) {
            *freq.entry(w.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(w, _)| w.to_string())
        .collect()
}
