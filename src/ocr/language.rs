//! Language detection for `auto` recognition and the opt-in dictionary pass.

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::ocr::error::OcrError;

pub const AUTO_LANGUAGE: &str = "auto";
/// Profile used for the preliminary pass when the language is `auto`.
pub const PRELIMINARY_PROFILE: &str = "pol+eng";

const MIN_CORRECTED_TOKEN_LEN: usize = 4;
/// Tokens shorter than this may move by one edit, longer ones by two.
const LONG_TOKEN_LEN: usize = 8;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{L}+").expect("word pattern should compile"));

const POLISH_STOPWORDS: &[&str] = &[
    "i", "w", "z", "na", "się", "nie", "do", "że", "jest", "oraz", "dla", "od", "przez", "po",
    "sprawie", "jako", "lub", "ze", "pan", "pani", "tym", "które", "który",
];

const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "for", "with", "that", "this", "on", "be", "are",
    "by", "from", "as", "we", "you", "your", "our", "please", "dear",
];

fn is_polish_diacritic(c: char) -> bool {
    matches!(
        c,
        'ą' | 'ć' | 'ę' | 'ł' | 'ń' | 'ó' | 'ś' | 'ź' | 'ż' | 'Ą' | 'Ć' | 'Ę' | 'Ł' | 'Ń' | 'Ó'
            | 'Ś' | 'Ź' | 'Ż'
    )
}

/// Picks `pol` or `eng` from stopword hits and diacritic-bearing words.
/// Text with no evidence either way is treated as Polish.
pub fn detect_language(text: &str) -> &'static str {
    let mut polish = 0usize;
    let mut english = 0usize;

    for word in WORD_RE.find_iter(text) {
        let lower = word.as_str().to_lowercase();
        if POLISH_STOPWORDS.contains(&lower.as_str()) || lower.chars().any(is_polish_diacritic) {
            polish += 1;
        }
        if ENGLISH_STOPWORDS.contains(&lower.as_str()) {
            english += 1;
        }
    }

    if english > polish {
        "eng"
    } else {
        "pol"
    }
}

/// Nearest-word token correction against a full word list.
///
/// Only tokens missing from the list are touched, and only when exactly one
/// entry is nearest within the allowed distance.
#[derive(Debug, Clone)]
pub struct DictionaryCorrector {
    words: Vec<String>,
    lookup: HashSet<String>,
}

impl DictionaryCorrector {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lookup: HashSet<String> = words.into_iter().map(|w| w.into().trim().to_lowercase()).collect();
        let mut words: Vec<String> = lookup.iter().filter(|w| !w.is_empty()).cloned().collect();
        words.sort();
        Self { words, lookup }
    }

    /// Reads `<dir>/<code>.txt` (one word per line, `#` starts a comment line)
    /// for each code of a `pol+eng` style combination. Codes without a file
    /// contribute nothing.
    pub fn load(dir: &Path, language: &str) -> Result<Self, OcrError> {
        let mut words: Vec<String> = Vec::new();
        for code in language.split('+').map(str::trim).filter(|c| !c.is_empty()) {
            let path = dir.join(format!("{}.txt", code));
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No word list for '{}' at {}", code, path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let before = words.len();
            words.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
            info!("Loaded {} words for '{}' from {}", words.len() - before, code, path.display());
        }
        Ok(Self::new(words))
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn correct_token(&self, token: &str) -> Option<String> {
        let len = token.chars().count();
        if len < MIN_CORRECTED_TOKEN_LEN || !token.chars().all(char::is_alphabetic) {
            return None;
        }
        let lower = token.to_lowercase();
        if self.lookup.contains(&lower) {
            return None;
        }

        let max_distance = if len < LONG_TOKEN_LEN { 1 } else { 2 };
        let mut best: Option<(&str, usize)> = None;
        let mut tied = false;
        for candidate in &self.words {
            if candidate.chars().count().abs_diff(len) > max_distance {
                continue;
            }
            let distance = strsim::levenshtein(&lower, candidate);
            if distance > max_distance {
                continue;
            }
            match best {
                Some((_, d)) if distance == d => tied = true,
                Some((_, d)) if distance > d => {}
                _ => {
                    best = Some((candidate.as_str(), distance));
                    tied = false;
                }
            }
        }

        if tied {
            return None;
        }
        best.map(|(word, _)| match_case(token, word))
    }

    /// Rewrites alphabetic tokens in place, keeping all other characters
    /// (line breaks included) untouched.
    pub fn correct_text(&self, text: &str) -> String {
        if self.is_empty() {
            return text.to_string();
        }
        WORD_RE
            .replace_all(text, |caps: &Captures| {
                let token = &caps[0];
                self.correct_token(token).unwrap_or_else(|| token.to_string())
            })
            .into_owned()
    }
}

fn match_case(original: &str, replacement: &str) -> String {
    if original.chars().all(|c| !c.is_lowercase()) {
        return replacement.to_uppercase();
    }
    let mut chars = original.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            let mut out: String = replacement.chars().take(1).flat_map(char::to_uppercase).collect();
            out.extend(replacement.chars().skip(1));
            out
        }
        _ => replacement.to_string(),
    }
}
