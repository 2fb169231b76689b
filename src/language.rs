//! Best-effort language identification for text samples.
//!
//! Primary signal: stop-word frequencies for the Latin and Cyrillic
//! languages in [`PROFILES`]. When that is inconclusive (too few tokens, a
//! weak score or a near tie) the dominant Unicode script decides. When
//! neither yields an answer the configured default is returned;
//! [`LanguageSniffer::detect`] never fails.

use std::collections::HashMap;
use tracing::debug;

/// Samples shorter than this (in non-whitespace chars) go straight to the default.
const MIN_SAMPLE_CHARS: usize = 10;
/// Stop-word hits needed before the frequency model is trusted.
const MIN_STOPWORD_HITS: usize = 3;
/// Share of tokens that must be stop words of the winning language.
const MIN_SCORE: f32 = 0.08;
/// The winner must beat the runner-up by this factor.
const TIE_RATIO: f32 = 1.25;

struct Profile {
    code: &'static str,
    words: &'static [&'static str],
}

const PROFILES: &[Profile] = &[
    Profile {
        code: "en",
        words: &[
            "the", "and", "of", "to", "in", "is", "that", "for", "it", "with", "as", "was",
            "on", "are", "be", "this", "by", "which", "or", "from", "have", "not", "at",
        ],
    },
    Profile {
        code: "fr",
        words: &[
            "le", "la", "les", "de", "des", "et", "est", "un", "une", "du", "que", "qui",
            "dans", "pour", "pas", "sur", "au", "avec", "sont", "ce", "nous", "vous", "il",
        ],
    },
    Profile {
        code: "de",
        words: &[
            "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "zu", "den", "von",
            "mit", "sich", "des", "auf", "für", "dem", "auch", "es", "wir", "sie", "im",
        ],
    },
    Profile {
        code: "es",
        words: &[
            "el", "la", "los", "las", "de", "y", "que", "en", "un", "una", "es", "por",
            "con", "para", "del", "se", "no", "al", "lo", "como", "más", "pero", "su",
        ],
    },
    Profile {
        code: "it",
        words: &[
            "il", "la", "di", "che", "e", "è", "un", "una", "per", "non", "del", "della",
            "sono", "con", "gli", "le", "da", "nel", "si", "anche", "ma", "come", "alla",
        ],
    },
    Profile {
        code: "pt",
        words: &[
            "o", "a", "os", "as", "de", "do", "da", "que", "e", "é", "um", "uma", "em",
            "para", "com", "não", "por", "dos", "das", "se", "na", "no", "mais",
        ],
    },
    Profile {
        code: "nl",
        words: &[
            "de", "het", "een", "en", "van", "is", "dat", "niet", "op", "te", "zijn", "voor",
            "met", "die", "ook", "als", "aan", "er", "maar", "om", "bij", "wordt", "naar",
        ],
    },
    Profile {
        code: "ru",
        words: &[
            "и", "в", "не", "на", "что", "с", "по", "как", "это", "он", "к", "но", "из",
            "для", "от", "то", "все", "так", "был", "она", "или", "же", "также", "его",
        ],
    },
    Profile {
        code: "uk",
        words: &[
            "і", "й", "та", "в", "у", "не", "на", "що", "з", "до", "як", "це", "від",
            "для", "але", "його", "є", "також", "був", "вона", "або", "ж", "із", "які",
        ],
    },
];

/// Identifies the language of a text sample.
#[derive(Debug, Clone)]
pub struct LanguageSniffer {
    default: String,
}

impl Default for LanguageSniffer {
    fn default() -> Self {
        Self::new("en")
    }
}

impl LanguageSniffer {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
        }
    }

    /// Best-guess ISO 639-1 code for `sample`.
    pub fn detect(&self, sample: &str) -> String {
        let meaningful = sample.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < MIN_SAMPLE_CHARS {
            debug!("Language sample too short ({} chars), using default", meaningful);
            return self.default.clone();
        }

        if let Some(code) = stopword_vote(sample) {
            debug!("Language detected from stop words: {}", code);
            return code.to_string();
        }
        if let Some(code) = script_vote(sample) {
            debug!("Language detected from script coverage: {}", code);
            return code.to_string();
        }
        self.default.clone()
    }
}

fn stopword_vote(sample: &str) -> Option<&'static str> {
    let tokens: Vec<String> = sample
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut scores: Vec<(&'static str, usize)> = PROFILES
        .iter()
        .map(|p| {
            let hits = tokens.iter().filter(|t| p.words.contains(&t.as_str())).count();
            (p.code, hits)
        })
        .collect();
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (best, best_hits) = scores[0];
    let runner_up = scores.get(1).map_or(0, |s| s.1);
    if best_hits < MIN_STOPWORD_HITS {
        return None;
    }
    if (best_hits as f32) / (tokens.len() as f32) < MIN_SCORE {
        return None;
    }
    if (best_hits as f32) < (runner_up as f32) * TIE_RATIO {
        return None;
    }
    Some(best)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Script {
    Han,
    Kana,
    Hangul,
    Arabic,
    Cyrillic,
    Greek,
    Hebrew,
    Thai,
    Devanagari,
    Latin,
}

fn script_of(c: char) -> Option<Script> {
    let cp = c as u32;
    let script = match cp {
        0x3040..=0x30FF | 0x31F0..=0x31FF => Script::Kana,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF => Script::Han,
        0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => Script::Hangul,
        0x0600..=0x06FF | 0x0750..=0x077F | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => Script::Arabic,
        0x0400..=0x04FF | 0x0500..=0x052F => Script::Cyrillic,
        0x0370..=0x03FF | 0x1F00..=0x1FFF => Script::Greek,
        0x0590..=0x05FF => Script::Hebrew,
        0x0E00..=0x0E7F => Script::Thai,
        0x0900..=0x097F => Script::Devanagari,
        _ if c.is_ascii_alphabetic() => Script::Latin,
        0x00C0..=0x024F => Script::Latin,
        _ => return None,
    };
    Some(script)
}

fn script_vote(sample: &str) -> Option<&'static str> {
    let mut counts: HashMap<Script, usize> = HashMap::new();
    for script in sample.chars().filter_map(script_of) {
        *counts.entry(script).or_default() += 1;
    }
    let kana = counts.get(&Script::Kana).copied().unwrap_or(0);
    let han = counts.get(&Script::Han).copied().unwrap_or(0);

    // Japanese mixes Han with kana; merge them so the CJK total competes as one.
    let mut ranked: Vec<(Script, usize)> = counts
        .into_iter()
        .filter(|(s, _)| *s != Script::Kana)
        .map(|(s, n)| if s == Script::Han { (s, n + kana) } else { (s, n) })
        .collect();
    if han == 0 && kana > 0 {
        ranked.push((Script::Han, kana));
    }
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let (script, _) = ranked.first().copied()?;
    match script {
        Script::Han if kana > 0 => Some("ja"),
        Script::Han => Some("zh"),
        Script::Hangul => Some("ko"),
        Script::Arabic => Some("ar"),
        Script::Cyrillic => Some("ru"),
        Script::Greek => Some("el"),
        Script::Hebrew => Some("he"),
        Script::Thai => Some("th"),
        Script::Devanagari => Some("hi"),
        Script::Latin | Script::Kana => None,
    }
}
