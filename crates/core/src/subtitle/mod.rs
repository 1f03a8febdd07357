//! Subtitle parsing and serialization for SRT and ASS/SSA files.

mod ass;
mod cleanup;
mod markup;
mod srt;

pub use ass::AssDialogue;
pub use cleanup::clean_extracted_items;
pub use markup::{is_drawing, is_meaningless, strip_markup};

use std::path::Path;

/// Error type for subtitle codec operations.
#[derive(Debug, thiserror::Error)]
pub enum SubtitleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported subtitle format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed {format} content: {reason}")]
    Malformed { format: String, reason: String },
}

/// Supported subtitle file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Ass,
    Ssa,
}

impl SubtitleFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Ass => "ass",
            SubtitleFormat::Ssa => "ssa",
        }
    }

    /// Detect the format from a file path extension.
    pub fn from_path(path: &Path) -> Result<Self, SubtitleError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "ass" => Ok(SubtitleFormat::Ass),
            "ssa" => Ok(SubtitleFormat::Ssa),
            other => Err(SubtitleError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// A single timed subtitle entry.
///
/// Timecodes are milliseconds from the start of the media. `lines` holds the
/// source text split on line breaks; `translated_lines`, when present, holds
/// the target-language rendition written out in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleItem {
    /// 1-based ordinal within the file.
    pub position: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub lines: Vec<String>,
    pub translated_lines: Option<Vec<String>>,
    /// ASS/SSA dialogue fields carried through for round-tripping.
    pub ass: Option<AssDialogue>,
}

impl SubtitleItem {
    /// Create an entry with plain source text.
    pub fn new(position: usize, start_ms: u64, end_ms: u64, lines: Vec<String>) -> Self {
        Self {
            position,
            start_ms,
            end_ms,
            lines,
            translated_lines: None,
            ass: None,
        }
    }

    /// Source text joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// The text to write out: translated lines when present, source otherwise.
    pub fn output_lines(&self) -> &[String] {
        self.translated_lines.as_deref().unwrap_or(&self.lines)
    }
}

/// A parsed subtitle file: the entries plus whatever surrounding structure
/// the format carries (ASS/SSA script headers are preserved verbatim).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleDocument {
    pub format: SubtitleFormat,
    pub items: Vec<SubtitleItem>,
    /// Verbatim lines of every section preceding `[Events]` (ASS/SSA only),
    /// including the `Format:` line of the events section.
    pub header: Vec<String>,
}

impl SubtitleDocument {
    /// Parse subtitle content in the given format.
    pub fn parse(format: SubtitleFormat, content: &str) -> Result<Self, SubtitleError> {
        match format {
            SubtitleFormat::Srt => srt::parse(content),
            SubtitleFormat::Ass | SubtitleFormat::Ssa => ass::parse(format, content),
        }
    }

    /// Serialize the document back to text in its own format.
    pub fn serialize(&self) -> String {
        match self.format {
            SubtitleFormat::Srt => srt::serialize(self),
            SubtitleFormat::Ass | SubtitleFormat::Ssa => ass::serialize(self),
        }
    }

    /// Read and parse a subtitle file, detecting the format from the extension.
    pub fn read_file(path: &Path) -> Result<Self, SubtitleError> {
        let format = SubtitleFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(format, &content)?)
    }

    /// Write the document to `path` atomically (temp file then rename), so a
    /// crash never leaves a truncated file under the final name.
    pub fn write_file(&self, path: &Path) -> Result<(), SubtitleError> {
        let tmp = path.with_extension(format!("{}.tmp", self.format.extension()));
        std::fs::write(&tmp, self.serialize())?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
