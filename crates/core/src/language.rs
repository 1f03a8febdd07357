//! Language code normalization and embedded-track selection.

use serde::{Deserialize, Serialize};

use crate::media::EmbeddedSubtitle;

/// A configured language: 2-letter code plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
}

impl Language {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// 3-letter ISO 639-2 codes that do not fold to their first two letters.
const ISO3_TABLE: &[(&str, &str)] = &[
    ("jpn", "ja"),
    ("ger", "de"),
    ("deu", "de"),
    ("fre", "fr"),
    ("fra", "fr"),
    ("dut", "nl"),
    ("nld", "nl"),
    ("chi", "zh"),
    ("zho", "zh"),
    ("cze", "cs"),
    ("ces", "cs"),
    ("gre", "el"),
    ("ell", "el"),
    ("swe", "sv"),
    ("dan", "da"),
    ("kor", "ko"),
    ("may", "ms"),
    ("msa", "ms"),
    ("per", "fa"),
    ("fas", "fa"),
    ("rum", "ro"),
    ("ron", "ro"),
    ("slo", "sk"),
    ("slk", "sk"),
    ("ukr", "uk"),
    ("alb", "sq"),
    ("sqi", "sq"),
    ("arm", "hy"),
    ("hye", "hy"),
    ("baq", "eu"),
    ("eus", "eu"),
    ("bur", "my"),
    ("mya", "my"),
    ("geo", "ka"),
    ("kat", "ka"),
    ("ice", "is"),
    ("isl", "is"),
    ("mac", "mk"),
    ("mkd", "mk"),
    ("wel", "cy"),
    ("cym", "cy"),
];

/// Fold a language tag to a lowercase 2-letter base code.
///
/// Handles `xx-YY` region variants (`pt-br` → `pt`), 3-letter ISO codes via
/// the table above (`jpn` → `ja`), and falls back to the first two letters
/// for unknown 3-letter codes (`eng` → `en`).
pub fn normalize(code: &str) -> String {
    let lower = code.trim().to_ascii_lowercase();
    let base = lower
        .split(['-', '_'])
        .next()
        .unwrap_or(&lower)
        .to_string();

    if base.len() == 3 {
        if let Some((_, two)) = ISO3_TABLE.iter().find(|(three, _)| *three == base) {
            return two.to_string();
        }
        return base[..2].to_string();
    }
    base
}

/// Whether two language tags refer to the same base language.
///
/// Empty inputs never match anything.
pub fn matches(a: &str, b: &str) -> bool {
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }
    normalize(a) == normalize(b)
}

/// Minimum score at which a candidate is considered good enough for the
/// language-priority bonus to apply. Keeps a high-priority language's
/// signs-and-songs track from beating a lower-priority full-dialogue track.
const PRIORITY_BONUS_THRESHOLD: i32 = 40;
const PRIORITY_BONUS_STEP: i32 = 80;

/// Score an embedded subtitle track against a preferred language.
///
/// Title keywords and dispositions push full-dialogue tracks up and partial
/// tracks (signs, songs, forced) down.
pub fn score_candidate(sub: &EmbeddedSubtitle, preferred_lang: &str) -> i32 {
    let mut score = 0;

    if matches(&sub.language, preferred_lang) {
        score += 50;
    }

    let title = sub.title.to_ascii_lowercase();
    if title.contains("full") {
        score += 25;
    }
    if title.contains("dialog") || title.contains("dialogue") {
        score += 20;
    }
    if title.contains("sub") || title.contains("subtitle") {
        score += 10;
    }
    if title.contains("signs") || title.contains("songs") || title.contains("karaoke") {
        score -= 40;
    }

    score += if sub.is_forced { -10 } else { 5 };
    if sub.is_default {
        score += 5;
    }

    score
}

/// Pick the best embedded track for an ordered list of configured languages.
///
/// Earlier languages earn a per-position bonus, but only for candidates at
/// or above the quality bar, so a poor track in a preferred language cannot
/// displace a full track in a later one. Ties keep candidate order.
pub fn find_best_match<'a>(
    candidates: &'a [EmbeddedSubtitle],
    configured: &[Language],
) -> Option<&'a EmbeddedSubtitle> {
    let mut best: Option<(&EmbeddedSubtitle, i32)> = None;

    for candidate in candidates {
        for (i, lang) in configured.iter().enumerate() {
            if !matches(&candidate.language, &lang.code) {
                continue;
            }
            let score = score_candidate(candidate, &lang.code);
            let total = if score >= PRIORITY_BONUS_THRESHOLD {
                score + ((configured.len() - i) as i32) * PRIORITY_BONUS_STEP
            } else {
                score
            };
            match best {
                Some((_, best_total)) if total <= best_total => {}
                _ => best = Some((candidate, total)),
            }
        }
    }

    best.map(|(candidate, _)| candidate)
}
