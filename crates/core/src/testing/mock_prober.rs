//! Mock container prober for tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::media::EmbeddedSubtitle;
use crate::probe::{ContainerProber, ProbeError};

const DEFAULT_EXTRACT_CONTENT: &str = "1\r\n00:00:01,000 --> 00:00:02,500\r\nFirst line\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,500\r\nSecond line\r\n\r\n";

/// Scriptable [`ContainerProber`] implementation.
///
/// Probe results are configured up front; `extract` writes a small real SRT
/// (or ASS) file so downstream code can parse what it extracted.
pub struct MockProber {
    available: Arc<RwLock<bool>>,
    streams: Arc<RwLock<Vec<EmbeddedSubtitle>>>,
    extract_content: Arc<RwLock<String>>,
    extract_fails: Arc<RwLock<bool>>,
    recorded_extractions: Arc<RwLock<Vec<(PathBuf, u32)>>>,
}

impl Default for MockProber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProber {
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            streams: Arc::new(RwLock::new(Vec::new())),
            extract_content: Arc::new(RwLock::new(DEFAULT_EXTRACT_CONTENT.to_string())),
            extract_fails: Arc::new(RwLock::new(false)),
            recorded_extractions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append a stream to the probe result. Stream indices are assigned in
    /// insertion order, mirroring the subtitle-subset renumbering.
    pub async fn add_stream(&self, language: &str, title: &str, codec: &str, text_based: bool) {
        let mut streams = self.streams.write().await;
        let stream_index = streams.len() as u32;
        streams.push(EmbeddedSubtitle {
            stream_index,
            language: language.to_string(),
            title: title.to_string(),
            codec: codec.to_string(),
            is_text_based: text_based,
            is_default: false,
            is_forced: false,
            is_extracted: false,
            extracted_path: None,
        });
    }

    /// Flag a stream as forced and/or default after adding it.
    pub async fn set_dispositions(&self, stream_index: u32, is_default: bool, is_forced: bool) {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.iter_mut().find(|s| s.stream_index == stream_index) {
            stream.is_default = is_default;
            stream.is_forced = is_forced;
        }
    }

    pub async fn set_available(&self, available: bool) {
        *self.available.write().await = available;
    }

    /// Override the content written by `extract`.
    pub async fn set_extract_content(&self, content: &str) {
        *self.extract_content.write().await = content.to_string();
    }

    /// Make subsequent `extract` calls return `None`.
    pub async fn fail_extractions(&self, fail: bool) {
        *self.extract_fails.write().await = fail;
    }

    pub async fn recorded_extractions(&self) -> Vec<(PathBuf, u32)> {
        self.recorded_extractions.read().await.clone()
    }
}

#[async_trait]
impl ContainerProber for MockProber {
    async fn is_available(&self) -> bool {
        *self.available.read().await
    }

    async fn probe(&self, _path: &Path) -> Result<Vec<EmbeddedSubtitle>, ProbeError> {
        if !*self.available.read().await {
            return Ok(Vec::new());
        }
        Ok(self.streams.read().await.clone())
    }

    async fn extract(
        &self,
        path: &Path,
        stream_index: u32,
        codec: &str,
        language: Option<&str>,
    ) -> Result<Option<PathBuf>, ProbeError> {
        if *self.extract_fails.read().await {
            return Ok(None);
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("subtitle");
        let tag = language
            .map(|l| l.to_string())
            .unwrap_or_else(|| format!("stream{}", stream_index));
        let ext = match codec.to_ascii_lowercase().as_str() {
            "ass" => "ass",
            "ssa" => "ssa",
            _ => "srt",
        };
        let out_path = path.with_file_name(format!("{}.{}.{}", stem, tag, ext));
        tokio::fs::write(&out_path, self.extract_content.read().await.as_bytes()).await?;

        self.recorded_extractions
            .write()
            .await
            .push((out_path.clone(), stream_index));
        Ok(Some(out_path))
    }
}
