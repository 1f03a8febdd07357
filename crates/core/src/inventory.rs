//! Media inventory port and library sync.
//!
//! The managing systems (one for movies, one for shows) own the library;
//! this side only mirrors what they report. Media rows are created and
//! updated here and never deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::media::{MediaStore, MediaStoreError, NewEpisode, NewMovie, NewSeason, NewShow};

/// A movie as reported by the movie manager.
#[derive(Debug, Clone)]
pub struct ExternalMovie {
    pub external_id: i64,
    pub title: String,
    pub path: String,
    pub file_name: String,
    pub date_added: DateTime<Utc>,
}

/// An episode as reported by the show manager.
#[derive(Debug, Clone)]
pub struct ExternalEpisode {
    pub external_id: i64,
    pub season_number: u32,
    pub title: String,
    pub path: String,
    pub file_name: String,
    pub date_added: DateTime<Utc>,
}

/// A show and its episodes as reported by the show manager.
#[derive(Debug, Clone)]
pub struct ExternalShow {
    pub external_id: i64,
    pub title: String,
    pub path: String,
    pub episodes: Vec<ExternalEpisode>,
}

/// Error type for inventory operations.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Media manager unreachable: {0}")]
    Unreachable(String),

    #[error("Media manager returned an invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] MediaStoreError),
}

/// Port onto the external media managers.
#[async_trait]
pub trait MediaInventory: Send + Sync {
    async fn list_movies(&self) -> Result<Vec<ExternalMovie>, InventoryError>;
    async fn list_shows(&self) -> Result<Vec<ExternalShow>, InventoryError>;
}

/// Mirrors the external library into the media store.
pub struct InventorySync {
    inventory: Arc<dyn MediaInventory>,
    store: Arc<dyn MediaStore>,
}

impl InventorySync {
    pub fn new(inventory: Arc<dyn MediaInventory>, store: Arc<dyn MediaStore>) -> Self {
        Self { inventory, store }
    }

    /// Pull the full library and upsert every item. Returns the number of
    /// media rows touched.
    pub async fn sync(&self) -> Result<usize, InventoryError> {
        let mut touched = 0;

        for movie in self.inventory.list_movies().await? {
            let hash = sample_hash(Path::new(&movie.path), &movie.file_name);
            self.store.upsert_movie(NewMovie {
                external_id: movie.external_id,
                title: movie.title,
                path: movie.path,
                file_name: movie.file_name,
                media_hash: hash,
                date_added: movie.date_added,
            })?;
            touched += 1;
        }

        for show in self.inventory.list_shows().await? {
            let stored_show = self.store.upsert_show(NewShow {
                external_id: show.external_id,
                title: show.title,
                path: show.path,
            })?;
            for episode in show.episodes {
                let season = self.store.upsert_season(NewSeason {
                    show_id: stored_show.id,
                    number: episode.season_number,
                })?;
                let hash = sample_hash(Path::new(&episode.path), &episode.file_name);
                self.store.upsert_episode(NewEpisode {
                    external_id: episode.external_id,
                    show_id: stored_show.id,
                    season_id: season.id,
                    title: episode.title,
                    path: episode.path,
                    file_name: episode.file_name,
                    media_hash: hash,
                    date_added: episode.date_added,
                })?;
                touched += 1;
            }
        }

        info!(touched, "library sync finished");
        Ok(touched)
    }
}

/// Sha256 over the first chunk of the media file, enough to notice the file
/// being replaced without hashing gigabytes.
fn sample_hash(dir: &Path, file_name: &str) -> Option<String> {
    const SAMPLE_BYTES: usize = 64 * 1024;

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) != Some(file_name) || !path.is_file() {
            continue;
        }
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), "could not read media file for hashing: {}", e);
                return None;
            }
        };
        let sample = &data[..data.len().min(SAMPLE_BYTES)];
        return Some(format!("{:x}", Sha256::digest(sample)));
    }
    None
}
