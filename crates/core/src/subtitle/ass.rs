//! Advanced SubStation Alpha (.ass/.ssa) parsing and serialization.
//!
//! Only the `[Events]` section is interpreted; everything before it (script
//! info, styles, fonts) is carried through verbatim so that a parse/serialize
//! round trip leaves unrelated sections untouched.

use super::{SubtitleDocument, SubtitleError, SubtitleFormat, SubtitleItem};

/// Per-event fields preserved for round-tripping.
///
/// `prefix` holds every comma-separated field before the trailing `Text`
/// field, exactly as it appeared (layer/marked, timings, style, name,
/// margins, effect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssDialogue {
    /// Event kind: `Dialogue` or `Comment`.
    pub kind: String,
    pub prefix: Vec<String>,
}

impl AssDialogue {
    pub fn is_comment(&self) -> bool {
        self.kind.eq_ignore_ascii_case("Comment")
    }
}

pub fn parse(format: SubtitleFormat, content: &str) -> Result<SubtitleDocument, SubtitleError> {
    let mut header = Vec::new();
    let mut items = Vec::new();
    let mut in_events = false;
    let mut field_count: Option<usize> = None;
    let mut text_index: Option<usize> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');

        if !in_events {
            header.push(line.to_string());
            if line.trim().eq_ignore_ascii_case("[Events]") {
                in_events = true;
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.starts_with("Format:") {
            let fields: Vec<&str> = trimmed["Format:".len()..]
                .split(',')
                .map(|f| f.trim())
                .collect();
            text_index = fields.iter().position(|f| f.eq_ignore_ascii_case("Text"));
            field_count = Some(fields.len());
            header.push(line.to_string());
            continue;
        }

        let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("Dialogue:") {
            ("Dialogue", rest)
        } else if let Some(rest) = trimmed.strip_prefix("Comment:") {
            ("Comment", rest)
        } else {
            // Blank lines and anything unrecognised inside [Events] stay in
            // the header so serialization does not silently drop them.
            if !trimmed.is_empty() {
                header.push(line.to_string());
            }
            continue;
        };

        let count = field_count.unwrap_or(10);
        let text_idx = text_index.unwrap_or(count - 1);
        let fields: Vec<&str> = rest.trim_start().splitn(count, ',').collect();
        if fields.len() <= text_idx {
            continue;
        }

        let prefix: Vec<String> = fields[..text_idx].iter().map(|f| f.to_string()).collect();
        let text = fields[text_idx];

        let (start_ms, end_ms) = event_times(&prefix)?;
        let lines: Vec<String> = text.split("\\N").map(|l| l.to_string()).collect();

        items.push(SubtitleItem {
            position: items.len() + 1,
            start_ms,
            end_ms,
            lines,
            translated_lines: None,
            ass: Some(AssDialogue {
                kind: kind.to_string(),
                prefix,
            }),
        });
    }

    Ok(SubtitleDocument {
        format,
        items,
        header,
    })
}

pub fn serialize(doc: &SubtitleDocument) -> String {
    let mut out = String::new();
    for line in &doc.header {
        out.push_str(line);
        out.push('\n');
    }
    for item in &doc.items {
        let (kind, prefix) = match &item.ass {
            Some(meta) => (meta.kind.as_str(), meta.prefix.join(",")),
            // Entries built programmatically (e.g. converted from SRT) get a
            // minimal default prefix.
            None => (
                "Dialogue",
                format!(
                    "0,{},{},Default,,0,0,0,",
                    format_timestamp(item.start_ms),
                    format_timestamp(item.end_ms)
                ),
            ),
        };
        out.push_str(&format!(
            "{}: {},{}\n",
            kind,
            prefix,
            item.output_lines().join("\\N")
        ));
    }
    out
}

/// Pull start/end out of the prefix fields. The `Format:` line puts `Start`
/// and `End` at positions 1 and 2 in both ASS and SSA.
fn event_times(prefix: &[String]) -> Result<(u64, u64), SubtitleError> {
    if prefix.len() < 3 {
        return Err(SubtitleError::Malformed {
            format: "ASS".to_string(),
            reason: format!("event has {} fields before text", prefix.len()),
        });
    }
    Ok((parse_timestamp(&prefix[1])?, parse_timestamp(&prefix[2])?))
}

/// Parse an `H:MM:SS.cc` timestamp into milliseconds.
fn parse_timestamp(value: &str) -> Result<u64, SubtitleError> {
    let malformed = || SubtitleError::Malformed {
        format: "ASS".to_string(),
        reason: format!("bad timestamp: {}", value),
    };

    let value = value.trim();
    let mut parts = value.split(':');
    let hours: u64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let minutes: u64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let seconds_part = parts.next().ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }

    let (secs, centis) = match seconds_part.split_once('.') {
        Some((s, c)) => (s, c),
        None => (seconds_part, "0"),
    };
    let seconds: u64 = secs.parse().map_err(|_| malformed())?;
    let centiseconds: u64 = centis.parse().map_err(|_| malformed())?;

    Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + centiseconds * 10)
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let centis = (ms % 1_000) / 10;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}
