//! Media entities, persistence and translation-state computation.

mod sidecar;
mod sqlite;
mod state;
mod store;
mod types;

pub use sidecar::{find_language, find_sidecars, has_language, SidecarSubtitle};
pub use sqlite::SqliteMediaStore;
pub use state::{compute_state, StateContext, StateEngine};
pub use store::{MediaStore, MediaStoreError, NewEpisode, NewMovie, NewSeason, NewShow};
pub use types::{EmbeddedSubtitle, Media, MediaKind, Season, Show, TranslationState};
