//! Mock media inventory for tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::inventory::{
    ExternalEpisode, ExternalMovie, ExternalShow, InventoryError, MediaInventory,
};

/// Scriptable [`MediaInventory`] implementation.
pub struct MockInventory {
    movies: Arc<RwLock<Vec<ExternalMovie>>>,
    shows: Arc<RwLock<Vec<ExternalShow>>>,
    fail: Arc<RwLock<bool>>,
}

impl Default for MockInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInventory {
    pub fn new() -> Self {
        Self {
            movies: Arc::new(RwLock::new(Vec::new())),
            shows: Arc::new(RwLock::new(Vec::new())),
            fail: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn add_movie(&self, external_id: i64, title: &str, path: &str) {
        self.movies.write().await.push(ExternalMovie {
            external_id,
            title: title.to_string(),
            path: path.to_string(),
            file_name: title.to_string(),
            date_added: Utc::now(),
        });
    }

    pub async fn add_show_with_episode(
        &self,
        show_external_id: i64,
        show_title: &str,
        episode_external_id: i64,
        season_number: u32,
        episode_title: &str,
    ) {
        self.shows.write().await.push(ExternalShow {
            external_id: show_external_id,
            title: show_title.to_string(),
            path: format!("/library/tv/{}", show_title),
            episodes: vec![ExternalEpisode {
                external_id: episode_external_id,
                season_number,
                title: episode_title.to_string(),
                path: format!("/library/tv/{}/Season {}", show_title, season_number),
                file_name: episode_title.to_string(),
                date_added: Utc::now(),
            }],
        });
    }

    pub async fn set_failing(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl MediaInventory for MockInventory {
    async fn list_movies(&self) -> Result<Vec<ExternalMovie>, InventoryError> {
        if *self.fail.read().await {
            return Err(InventoryError::Unreachable("injected failure".to_string()));
        }
        Ok(self.movies.read().await.clone())
    }

    async fn list_shows(&self) -> Result<Vec<ExternalShow>, InventoryError> {
        if *self.fail.read().await {
            return Err(InventoryError::Unreachable("injected failure".to_string()));
        }
        Ok(self.shows.read().await.clone())
    }
}
