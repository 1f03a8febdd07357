//! Post-extraction cleanup for subtitles pulled out of container streams.
//!
//! Streams demuxed to SRT tend to carry ASS leftovers: vector drawings that
//! became empty-looking blocks, duplicated consecutive entries from overlap
//! splitting, and styling runs. Extraction runs this pass before the file is
//! offered as a translation source.

use super::markup::{is_drawing, strip_markup};
use super::SubtitleItem;

/// Two consecutive entries with identical cleaned text are merged when the
/// second starts within this many milliseconds of the first ending.
const MERGE_GAP_MS: u64 = 100;

/// Clean a freshly extracted item list in place order: drop drawing blocks,
/// merge consecutive duplicates, strip markup on what remains.
pub fn clean_extracted_items(items: Vec<SubtitleItem>) -> Vec<SubtitleItem> {
    let mut cleaned: Vec<SubtitleItem> = Vec::with_capacity(items.len());

    for item in items {
        let stripped = strip_markup(&item.text());
        if stripped.is_empty() || is_drawing(&stripped) {
            continue;
        }

        if let Some(prev) = cleaned.last_mut() {
            let prev_text = strip_markup(&prev.text());
            if prev_text == stripped && item.start_ms <= prev.end_ms + MERGE_GAP_MS {
                prev.end_ms = prev.end_ms.max(item.end_ms);
                continue;
            }
        }

        let mut retained = item;
        retained.lines = stripped.split('\n').map(|l| l.to_string()).collect();
        cleaned.push(retained);
    }

    for (i, item) in cleaned.iter_mut().enumerate() {
        item.position = i + 1;
    }
    cleaned
}
