//! Markup stripping and untranslatable-line detection.
//!
//! Text sent to a translation backend is reduced to bare dialogue first:
//! styling overrides, vector drawings, sound cues and credit lines are all
//! noise that either confuses the model or wastes tokens.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static DRAWING_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\\p[1-9]\d*\}.*?(\{\\p0\}|$)").unwrap());
static STYLE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\\[^}]*\}").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static BRACKETED_CUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\[[^\]]*\]|\([^)]*\))$").unwrap());
static CREDIT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(captioning|synced|subtitle|translat|encoded).*\bby\b").unwrap());

const MUSICAL_SYMBOLS: &[char] = &['♪', '♫', '♬', '♩', '🎵', '🎶'];

/// Strip subtitle markup from `text`, returning the bare dialogue.
///
/// Removal order: ASS drawing blocks (`{\p1}…{\p0}`), remaining `{\…}` style
/// runs, HTML-like tags, escape sequences, whitespace collapse, then
/// line-level noise (musical symbols, bracketed sound cues, URL-only lines,
/// credit lines). Idempotent.
pub fn strip_markup(text: &str) -> String {
    let cleaned_lines: Vec<String> = text
        .split('\n')
        .map(strip_line)
        .filter(|l| !l.is_empty())
        .collect();
    cleaned_lines.join("\n")
}

fn strip_line(line: &str) -> String {
    let mut text = DRAWING_BLOCK.replace_all(line, " ").to_string();
    text = STYLE_RUN.replace_all(&text, " ").to_string();
    text = HTML_TAG.replace_all(&text, " ").to_string();
    for escape in ["\\N", "\\n", "\\h", "\\t"] {
        text = text.replace(escape, " ");
    }
    text = text.replace(MUSICAL_SYMBOLS, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.is_empty()
        || BRACKETED_CUE.is_match(&text)
        || CREDIT_LINE.is_match(&text)
        || is_url_only(&text)
    {
        return String::new();
    }
    text
}

fn is_url_only(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    !text.contains(' ')
        && (lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www."))
}

/// Whether a stripped line is an ASS vector drawing rather than dialogue.
///
/// Tokens are classified as drawing-like when they are single-letter drawing
/// commands (`m n l b s p c`) or parseable numbers. Thresholds:
/// - 3+ tokens: drawing when more than 80% of tokens are drawing-like.
/// - 2 tokens: drawing when both are drawing-like and at least one is a
///   command letter.
/// - 1 token: garbage when it is a lone character other than a digit,
///   `i`/`I` or `a`/`A`.
pub fn is_drawing(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.len() {
        0 => false,
        1 => {
            let token = tokens[0];
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => !(c.is_ascii_digit() || matches!(c, 'i' | 'I' | 'a' | 'A')),
                _ => false,
            }
        }
        2 => {
            tokens.iter().all(|t| is_drawing_token(t))
                && tokens.iter().any(|t| is_command_letter(t))
        }
        n => {
            let drawing = tokens.iter().filter(|t| is_drawing_token(t)).count();
            drawing as f64 / n as f64 > 0.8
        }
    }
}

fn is_command_letter(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => matches!(c.to_ascii_lowercase(), 'm' | 'n' | 'l' | 'b' | 's' | 'p' | 'c'),
        _ => false,
    }
}

fn is_drawing_token(token: &str) -> bool {
    is_command_letter(token) || token.parse::<f64>().is_ok()
}

/// Whether stripping left nothing worth sending to a backend.
pub fn is_meaningless(stripped: &str) -> bool {
    stripped.is_empty() || is_drawing(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_style_runs() {
        assert_eq!(strip_markup(r"{\i1}Hello{\i0} world"), "Hello world");
        assert_eq!(strip_markup(r"{\an8}{\fs20}Top text"), "Top text");
    }

    #[test]
    fn test_strip_drawing_blocks() {
        assert_eq!(strip_markup(r"{\p1}m 0 0 l 100 0 100 100{\p0}"), "");
        assert_eq!(strip_markup(r"{\p1}m 0 0 l 10 10"), "");
        assert_eq!(strip_markup(r"before {\p1}m 0 0{\p0} after"), "before after");
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_markup("<i>italic</i> and <b>bold</b>"), "italic and bold");
        assert_eq!(strip_markup("<font color=\"#ff0000\">red</font>"), "red");
    }

    #[test]
    fn test_strip_escapes_and_whitespace() {
        assert_eq!(strip_markup(r"one\Ntwo\hthree"), "one two three");
        assert_eq!(strip_markup("a    b\tc"), "a b c");
    }

    #[test]
    fn test_strip_sound_cues() {
        assert_eq!(strip_markup("[door slams]"), "");
        assert_eq!(strip_markup("(sighs)"), "");
        assert_eq!(strip_markup("♪ ♪ ♪"), "");
        assert_eq!(strip_markup("He said [sic] that"), "He said [sic] that");
    }

    #[test]
    fn test_strip_credits_and_urls() {
        assert_eq!(strip_markup("Subtitles by SomeGroup"), "");
        assert_eq!(strip_markup("Synced and corrected by someone"), "");
        assert_eq!(strip_markup("Translated by a fan"), "");
        assert_eq!(strip_markup("www.example.com"), "");
        assert_eq!(strip_markup("https://example.com/subs"), "");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let inputs = [
            r"{\i1}Hello{\i0} <b>world</b>",
            "[door slams]",
            "plain dialogue",
            r"one\Ntwo",
        ];
        for input in inputs {
            let once = strip_markup(input);
            assert_eq!(strip_markup(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_multiline_drops_empty_lines() {
        let text = "[phone rings]\nHello?";
        assert_eq!(strip_markup(text), "Hello?");
    }

    #[test]
    fn test_is_drawing_many_tokens() {
        assert!(is_drawing("m 0 0 l 100 0 100 100 0 100"));
        assert!(!is_drawing("this is a normal sentence here"));
        // 3 of 4 tokens drawing-like is below the 80% bar.
        assert!(!is_drawing("m 0 0 hello"));
    }

    #[test]
    fn test_is_drawing_two_tokens() {
        assert!(is_drawing("m 0"));
        assert!(is_drawing("0 l"));
        // Two numbers, no command letter.
        assert!(!is_drawing("0 0"));
        assert!(!is_drawing("hi there"));
    }

    #[test]
    fn test_is_drawing_single_token() {
        assert!(is_drawing("-"));
        assert!(is_drawing("m"));
        assert!(!is_drawing("5"));
        assert!(!is_drawing("I"));
        assert!(!is_drawing("a"));
        assert!(!is_drawing("Hello"));
    }

    #[test]
    fn test_is_meaningless() {
        assert!(is_meaningless(""));
        assert!(is_meaningless("-"));
        assert!(!is_meaningless("Hello"));
    }
}
