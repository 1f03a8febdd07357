//! Keeps embedded-subtitle rows in sync with what is on disk.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::media::{Media, MediaStore, MediaStoreError};

use super::{ContainerProber, ProbeError};

const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "mov", "ts", "webm", "wmv"];

/// Error type for indexing operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Media file not found for {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Store(#[from] MediaStoreError),
}

/// Probes media files and maintains their embedded subtitle rows.
pub struct MediaIndexer {
    prober: Arc<dyn ContainerProber>,
    store: Arc<dyn MediaStore>,
}

impl MediaIndexer {
    pub fn new(prober: Arc<dyn ContainerProber>, store: Arc<dyn MediaStore>) -> Self {
        Self { prober, store }
    }

    /// Resolve the media file on disk. The managing system records directory
    /// and base filename but not the extension, so try the usual video
    /// extensions and fall back to scanning the directory for a matching
    /// stem.
    pub fn resolve_media_file(media: &Media) -> Option<PathBuf> {
        for ext in VIDEO_EXTENSIONS {
            let candidate = media.file_path(ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        let entries = std::fs::read_dir(&media.path).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str());
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if stem == Some(media.file_name.as_str())
                && ext.as_deref().map(|e| VIDEO_EXTENSIONS.contains(&e)).unwrap_or(false)
            {
                return Some(path);
            }
        }
        None
    }

    /// Probe the media file and atomically replace its embedded subtitle
    /// rows. Stamps `indexed_at` even when no streams are found, so the
    /// scheduler does not re-probe the same file forever.
    pub async fn sync_embedded(&self, media: &Media) -> Result<usize, IndexError> {
        let Some(file) = Self::resolve_media_file(media) else {
            warn!(
                media_id = media.id,
                path = %media.path.display(),
                "media file missing on disk, skipping probe"
            );
            return Err(IndexError::FileNotFound(media.title.clone()));
        };

        let subtitles = self.prober.probe(&file).await?;
        let count = subtitles.len();
        self.store.replace_embedded(media.kind, media.id, &subtitles)?;

        info!(
            media_id = media.id,
            kind = %media.kind,
            streams = count,
            "embedded subtitle streams synced"
        );
        Ok(count)
    }

    /// Extract every text-based embedded stream of a media item that has not
    /// been extracted yet (the `extract_all` mode of the scheduler).
    pub async fn extract_all_text_streams(&self, media: &Media) -> Result<usize, IndexError> {
        let Some(file) = Self::resolve_media_file(media) else {
            return Err(IndexError::FileNotFound(media.title.clone()));
        };

        let mut extracted = 0;
        for sub in self.store.embedded(media.kind, media.id)? {
            if !sub.is_text_based || sub.is_extracted {
                continue;
            }
            let language = if sub.language.is_empty() {
                None
            } else {
                Some(sub.language.as_str())
            };
            match self
                .prober
                .extract(&file, sub.stream_index, &sub.codec, language)
                .await?
            {
                Some(path) => {
                    self.store.mark_extracted(
                        media.kind,
                        media.id,
                        sub.stream_index,
                        &path.display().to_string(),
                    )?;
                    extracted += 1;
                }
                None => {
                    debug!(
                        media_id = media.id,
                        stream = sub.stream_index,
                        "stream extraction produced no output"
                    );
                }
            }
        }
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, NewMovie, SqliteMediaStore, TranslationState};
    use crate::testing::MockProber;
    use chrono::Utc;

    fn media_with_file(dir: &std::path::Path, name: &str) -> (Arc<SqliteMediaStore>, Media) {
        std::fs::write(dir.join(format!("{}.mkv", name)), "fake video").unwrap();
        let store = Arc::new(SqliteMediaStore::in_memory().unwrap());
        let media = store
            .upsert_movie(NewMovie {
                external_id: 1,
                title: name.to_string(),
                path: dir.display().to_string(),
                file_name: name.to_string(),
                media_hash: None,
                date_added: Utc::now(),
            })
            .unwrap();
        (store, media)
    }

    #[test]
    fn test_resolve_media_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, media) = media_with_file(dir.path(), "Movie");
        let resolved = MediaIndexer::resolve_media_file(&media).unwrap();
        assert_eq!(resolved, dir.path().join("Movie.mkv"));
    }

    #[test]
    fn test_resolve_media_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteMediaStore::in_memory().unwrap());
        let media = store
            .upsert_movie(NewMovie {
                external_id: 1,
                title: "Ghost".to_string(),
                path: dir.path().display().to_string(),
                file_name: "Ghost".to_string(),
                media_hash: None,
                date_added: Utc::now(),
            })
            .unwrap();
        assert!(MediaIndexer::resolve_media_file(&media).is_none());
    }

    #[tokio::test]
    async fn test_sync_embedded_replaces_rows_and_stamps_indexed_at() {
        let dir = tempfile::tempdir().unwrap();
        let (store, media) = media_with_file(dir.path(), "Movie");
        assert_eq!(media.translation_state, TranslationState::Unknown);

        let prober = Arc::new(MockProber::new());
        prober.add_stream("eng", "Full", "ass", true).await;

        let indexer = MediaIndexer::new(prober, store.clone());
        let count = indexer.sync_embedded(&media).await.unwrap();
        assert_eq!(count, 1);

        let reloaded = store.get(MediaKind::Movie, media.id).unwrap().unwrap();
        assert!(reloaded.indexed_at.is_some());
        assert_eq!(store.embedded(MediaKind::Movie, media.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extract_all_text_streams_skips_image_streams() {
        let dir = tempfile::tempdir().unwrap();
        let (store, media) = media_with_file(dir.path(), "Movie");

        let prober = Arc::new(MockProber::new());
        prober.add_stream("eng", "Full", "ass", true).await;
        prober.add_stream("jpn", "", "hdmv_pgs_subtitle", false).await;

        let indexer = MediaIndexer::new(prober.clone(), store.clone());
        indexer.sync_embedded(&media).await.unwrap();

        let extracted = indexer.extract_all_text_streams(&media).await.unwrap();
        assert_eq!(extracted, 1);

        let subs = store.embedded(MediaKind::Movie, media.id).unwrap();
        assert!(subs[0].is_extracted);
        assert!(!subs[1].is_extracted);
    }
}
