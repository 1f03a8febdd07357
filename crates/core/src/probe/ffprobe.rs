//! ffprobe/ffmpeg-backed implementation of the container prober.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::media::EmbeddedSubtitle;
use crate::subtitle::{clean_extracted_items, SubtitleDocument};

use super::{is_text_codec, ContainerProber, ProbeError};

/// Configuration for the ffmpeg-based prober.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: PathBuf::from("ffprobe"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Probes and extracts embedded subtitle streams via ffprobe/ffmpeg.
pub struct FfmpegProber {
    config: ProberConfig,
}

impl FfmpegProber {
    pub fn new(config: ProberConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ProberConfig::default())
    }

    fn parse_probe_output(output: &str) -> Result<Vec<EmbeddedSubtitle>, ProbeError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            #[serde(default)]
            disposition: HashMap<String, i64>,
            #[serde(default)]
            tags: HashMap<String, String>,
        }

        let probe: ProbeOutput = serde_json::from_str(output)
            .map_err(|e| ProbeError::ParseError(e.to_string()))?;

        let subtitles = probe
            .streams
            .into_iter()
            .filter(|s| s.codec_type == "subtitle")
            .enumerate()
            .map(|(index, stream)| {
                let codec = stream.codec_name.unwrap_or_default();
                EmbeddedSubtitle {
                    stream_index: index as u32,
                    language: stream.tags.get("language").cloned().unwrap_or_default(),
                    title: stream.tags.get("title").cloned().unwrap_or_default(),
                    is_text_based: is_text_codec(&codec),
                    codec,
                    is_default: stream.disposition.get("default").copied().unwrap_or(0) != 0,
                    is_forced: stream.disposition.get("forced").copied().unwrap_or(0) != 0,
                    is_extracted: false,
                    extracted_path: None,
                }
            })
            .collect();

        Ok(subtitles)
    }

    /// Output path for an extracted stream:
    /// `<dir>/<basename>.<lang or streamN>.<ext>`, where ASS/SSA streams
    /// keep their native extension and everything else becomes SRT.
    fn extraction_path(media_path: &Path, stream_index: u32, codec: &str, language: Option<&str>) -> PathBuf {
        let stem = media_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("subtitle");
        let tag = match language {
            Some(lang) if !lang.is_empty() => lang.to_string(),
            _ => format!("stream{}", stream_index),
        };
        let ext = match codec.to_ascii_lowercase().as_str() {
            "ass" => "ass",
            "ssa" => "ssa",
            _ => "srt",
        };
        media_path.with_file_name(format!("{}.{}.{}", stem, tag, ext))
    }

    fn cleanup_extracted_srt(path: &Path) -> Result<(), ProbeError> {
        let mut doc = SubtitleDocument::read_file(path)
            .map_err(|e| ProbeError::ParseError(e.to_string()))?;
        doc.items = clean_extracted_items(doc.items);
        doc.write_file(path)
            .map_err(|e| ProbeError::ParseError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerProber for FfmpegProber {
    async fn is_available(&self) -> bool {
        Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn probe(&self, path: &Path) -> Result<Vec<EmbeddedSubtitle>, ProbeError> {
        let output = Command::new(&self.config.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
            .arg(path)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(path = %path.display(), "ffprobe could not be started: {}", e);
                return Ok(Vec::new());
            }
        };

        if !output.status.success() {
            warn!(
                path = %path.display(),
                status = %output.status,
                "ffprobe exited with failure"
            );
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let subtitles = Self::parse_probe_output(&stdout)?;
        debug!(
            path = %path.display(),
            streams = subtitles.len(),
            "probed embedded subtitle streams"
        );
        Ok(subtitles)
    }

    async fn extract(
        &self,
        path: &Path,
        stream_index: u32,
        codec: &str,
        language: Option<&str>,
    ) -> Result<Option<PathBuf>, ProbeError> {
        let out_path = Self::extraction_path(path, stream_index, codec, language);
        let out_ext = out_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("srt")
            .to_string();
        let subtitle_codec = if out_ext == "srt" { "srt" } else { "copy" };

        let output = Command::new(&self.config.ffmpeg_path)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-map", &format!("0:s:{}", stream_index), "-c:s", subtitle_codec])
            .arg(&out_path)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(path = %path.display(), "ffmpeg could not be started: {}", e);
                return Ok(None);
            }
        };

        if !output.status.success() {
            warn!(
                path = %path.display(),
                stream = stream_index,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "subtitle extraction failed"
            );
            let _ = tokio::fs::remove_file(&out_path).await;
            return Ok(None);
        }

        if out_ext == "srt" {
            if let Err(e) = Self::cleanup_extracted_srt(&out_path) {
                warn!(path = %out_path.display(), "extracted subtitle cleanup failed: {}", e);
            }
        }

        crate::metrics::STREAMS_EXTRACTED.inc();
        debug!(
            path = %path.display(),
            stream = stream_index,
            out = %out_path.display(),
            "extracted embedded subtitle"
        );
        Ok(Some(out_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac"},
            {
                "index": 2,
                "codec_type": "subtitle",
                "codec_name": "ass",
                "disposition": {"default": 1, "forced": 0},
                "tags": {"language": "eng", "title": "Full Subtitles"}
            },
            {
                "index": 3,
                "codec_type": "subtitle",
                "codec_name": "hdmv_pgs_subtitle",
                "disposition": {"default": 0, "forced": 1},
                "tags": {"language": "jpn"}
            }
        ]
    }"#;

    #[test]
    fn test_parse_probe_output_renumbers_subtitle_subset() {
        let subs = FfmpegProber::parse_probe_output(PROBE_JSON).unwrap();
        assert_eq!(subs.len(), 2);

        // Container indices 2 and 3 become subtitle-subset indices 0 and 1.
        assert_eq!(subs[0].stream_index, 0);
        assert_eq!(subs[0].codec, "ass");
        assert_eq!(subs[0].language, "eng");
        assert_eq!(subs[0].title, "Full Subtitles");
        assert!(subs[0].is_text_based);
        assert!(subs[0].is_default);
        assert!(!subs[0].is_forced);

        assert_eq!(subs[1].stream_index, 1);
        assert!(!subs[1].is_text_based);
        assert!(subs[1].is_forced);
        assert!(subs[1].title.is_empty());
    }

    #[test]
    fn test_parse_probe_output_no_streams() {
        let subs = FfmpegProber::parse_probe_output("{}").unwrap();
        assert!(subs.is_empty());
    }

    #[test]
    fn test_parse_probe_output_invalid_json() {
        assert!(FfmpegProber::parse_probe_output("not json").is_err());
    }

    #[test]
    fn test_extraction_path_language_and_extension() {
        let media = Path::new("/library/Movie (2020)/Movie (2020).mkv");
        assert_eq!(
            FfmpegProber::extraction_path(media, 0, "subrip", Some("eng")),
            PathBuf::from("/library/Movie (2020)/Movie (2020).eng.srt")
        );
        assert_eq!(
            FfmpegProber::extraction_path(media, 1, "ass", Some("jpn")),
            PathBuf::from("/library/Movie (2020)/Movie (2020).jpn.ass")
        );
        // Missing language falls back to the stream index.
        assert_eq!(
            FfmpegProber::extraction_path(media, 2, "mov_text", None),
            PathBuf::from("/library/Movie (2020)/Movie (2020).stream2.srt")
        );
    }

    #[tokio::test]
    async fn test_probe_missing_tool_is_empty() {
        let prober = FfmpegProber::new(ProberConfig {
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
        });
        assert!(!prober.is_available().await);
        let subs = prober.probe(Path::new("/media/file.mkv")).await.unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn test_extract_missing_tool_is_none() {
        let prober = FfmpegProber::new(ProberConfig {
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
        });
        let out = prober
            .extract(Path::new("/media/file.mkv"), 0, "subrip", Some("en"))
            .await
            .unwrap();
        assert!(out.is_none());
    }
}
