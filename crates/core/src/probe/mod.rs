//! Embedded subtitle stream probing and extraction.

mod ffprobe;
mod indexer;

pub use ffprobe::{FfmpegProber, ProberConfig};
pub use indexer::MediaIndexer;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::media::EmbeddedSubtitle;

/// Error type for container tool operations.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Container tool not available: {0}")]
    ToolUnavailable(String),

    #[error("Tool exited with failure: {0}")]
    ToolFailed(String),

    #[error("Failed to parse probe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec names ffmpeg reports for text-based subtitle streams.
pub const TEXT_CODECS: &[&str] = &["ass", "ssa", "srt", "subrip", "webvtt", "vtt", "mov_text", "text"];

/// Codec names of known image-based subtitle streams.
pub const IMAGE_CODECS: &[&str] = &[
    "hdmv_pgs_subtitle",
    "dvd_subtitle",
    "dvb_subtitle",
    "xsub",
    "pgssub",
];

/// Whether a subtitle codec carries text. Unknown codecs are treated as
/// image-based so they are never offered as translation sources.
pub fn is_text_codec(codec: &str) -> bool {
    TEXT_CODECS.contains(&codec.to_ascii_lowercase().as_str())
}

/// A port onto the external container tool (ffprobe/ffmpeg).
#[async_trait]
pub trait ContainerProber: Send + Sync {
    /// Whether the tool binaries are present and runnable.
    async fn is_available(&self) -> bool;

    /// Enumerate embedded subtitle streams of a media file. Stream indices
    /// are renumbered within the subtitle-only subset. A missing tool or a
    /// transient tool failure yields an empty list, not an error.
    async fn probe(&self, path: &Path) -> Result<Vec<EmbeddedSubtitle>, ProbeError>;

    /// Extract one subtitle stream to a sidecar file next to the media.
    ///
    /// Returns the written path, or `None` when the tool failed. Extracted
    /// SRT output is run through the post-extraction cleanup pass.
    async fn extract(
        &self,
        path: &Path,
        stream_index: u32,
        codec: &str,
        language: Option<&str>,
    ) -> Result<Option<PathBuf>, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_text_codec() {
        assert!(is_text_codec("ass"));
        assert!(is_text_codec("subrip"));
        assert!(is_text_codec("MOV_TEXT"));
        assert!(!is_text_codec("hdmv_pgs_subtitle"));
        // Unknown codecs classify as image-based.
        assert!(!is_text_codec("mystery_codec"));
    }
}
