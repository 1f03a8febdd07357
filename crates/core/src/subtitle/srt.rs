//! SubRip (.srt) parsing and serialization.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::{SubtitleDocument, SubtitleError, SubtitleFormat, SubtitleItem};

static TIME_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2}),(\d{3})").unwrap()
});

/// Parse SRT content. Blocks with missing time lines are skipped rather than
/// failing the whole file; real-world SRT files are frequently sloppy.
pub fn parse(content: &str) -> Result<SubtitleDocument, SubtitleError> {
    let normalized = content.replace("\r\n", "\n");
    let mut items = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() < 2 {
            continue;
        }

        // A block is either "index / time / text…" or "time / text…".
        let (time_line, text_start) = if TIME_RANGE.is_match(lines[0]) {
            (lines[0], 1)
        } else if lines.len() >= 3 && TIME_RANGE.is_match(lines[1]) {
            (lines[1], 2)
        } else {
            continue;
        };

        let caps = match TIME_RANGE.captures(time_line) {
            Some(c) => c,
            None => continue,
        };
        let start_ms = capture_ms(&caps, 1)?;
        let end_ms = capture_ms(&caps, 5)?;

        let text_lines: Vec<String> = lines[text_start..].iter().map(|l| l.to_string()).collect();
        if text_lines.is_empty() {
            continue;
        }

        items.push(SubtitleItem::new(
            items.len() + 1,
            start_ms,
            end_ms,
            text_lines,
        ));
    }

    Ok(SubtitleDocument {
        format: SubtitleFormat::Srt,
        items,
        header: Vec::new(),
    })
}

/// Serialize to the standard CRLF-separated block layout.
pub fn serialize(doc: &SubtitleDocument) -> String {
    let mut out = String::new();
    for (i, item) in doc.items.iter().enumerate() {
        out.push_str(&format!("{}\r\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\r\n",
            format_timestamp(item.start_ms),
            format_timestamp(item.end_ms)
        ));
        for line in item.output_lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
    }
    out
}

fn capture_ms(caps: &regex_lite::Captures, start_group: usize) -> Result<u64, SubtitleError> {
    let field = |i: usize| -> Result<u64, SubtitleError> {
        caps[start_group + i]
            .parse::<u64>()
            .map_err(|e| SubtitleError::Malformed {
                format: "SRT".to_string(),
                reason: format!("bad timestamp component: {}", e),
            })
    };
    Ok(field(0)? * 3_600_000 + field(1)? * 60_000 + field(2)? * 1_000 + field(3)?)
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}
