//! SQLite-backed media store implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::store::{MediaStore, MediaStoreError, NewEpisode, NewMovie, NewSeason, NewShow};
use super::types::{EmbeddedSubtitle, Media, MediaKind, Season, Show, TranslationState};

/// SQLite-backed media store.
pub struct SqliteMediaStore {
    conn: Mutex<Connection>,
}

const MEDIA_COLUMNS: &str = "id, external_id, title, path, file_name, media_hash, date_added, \
     indexed_at, last_subtitle_check_at, exclude_from_translation, is_priority, priority_date, \
     translation_age_threshold, translation_state, state_settings_version, created_at, updated_at";

const EPISODE_COLUMNS: &str = "e.id, e.external_id, e.title, e.path, e.file_name, e.media_hash, \
     e.date_added, e.indexed_at, e.last_subtitle_check_at, \
     (e.exclude_from_translation OR s.exclude_from_translation OR sh.exclude_from_translation), \
     (e.is_priority OR sh.is_priority), e.priority_date, e.translation_age_threshold, \
     e.translation_state, e.state_settings_version, e.created_at, e.updated_at";

const EPISODE_FROM: &str = "FROM episodes e \
     JOIN seasons s ON e.season_id = s.id \
     JOIN shows sh ON e.show_id = sh.id";

impl SqliteMediaStore {
    /// Open (or create) the media store at the given database path.
    pub fn new(path: &Path) -> Result<Self, MediaStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory media store (useful for testing).
    pub fn in_memory() -> Result<Self, MediaStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), MediaStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS shows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL,
                path TEXT NOT NULL,
                exclude_from_translation INTEGER NOT NULL DEFAULT 0,
                is_priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                show_id INTEGER NOT NULL REFERENCES shows(id),
                number INTEGER NOT NULL,
                exclude_from_translation INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(show_id, number)
            );

            CREATE TABLE IF NOT EXISTS movies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id INTEGER NOT NULL UNIQUE,
                title TEXT NOT NULL,
                path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                media_hash TEXT,
                date_added TEXT NOT NULL,
                indexed_at TEXT,
                last_subtitle_check_at TEXT,
                exclude_from_translation INTEGER NOT NULL DEFAULT 0,
                is_priority INTEGER NOT NULL DEFAULT 0,
                priority_date TEXT,
                translation_age_threshold INTEGER,
                translation_state TEXT NOT NULL DEFAULT 'unknown',
                state_settings_version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id INTEGER NOT NULL UNIQUE,
                show_id INTEGER NOT NULL REFERENCES shows(id),
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                title TEXT NOT NULL,
                path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                media_hash TEXT,
                date_added TEXT NOT NULL,
                indexed_at TEXT,
                last_subtitle_check_at TEXT,
                exclude_from_translation INTEGER NOT NULL DEFAULT 0,
                is_priority INTEGER NOT NULL DEFAULT 0,
                priority_date TEXT,
                translation_age_threshold INTEGER,
                translation_state TEXT NOT NULL DEFAULT 'unknown',
                state_settings_version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS embedded_subtitles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                media_kind TEXT NOT NULL,
                media_id INTEGER NOT NULL,
                stream_index INTEGER NOT NULL,
                language TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                codec TEXT NOT NULL,
                is_text_based INTEGER NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                is_forced INTEGER NOT NULL DEFAULT 0,
                is_extracted INTEGER NOT NULL DEFAULT 0,
                extracted_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(media_kind, media_id, stream_index)
            );

            CREATE INDEX IF NOT EXISTS idx_movies_state ON movies(translation_state);
            CREATE INDEX IF NOT EXISTS idx_episodes_state ON episodes(translation_state);
            CREATE INDEX IF NOT EXISTS idx_embedded_media ON embedded_subtitles(media_kind, media_id);
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn table(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Movie => "movies",
            MediaKind::Episode => "episodes",
        }
    }

    fn row_to_media(kind: MediaKind, row: &rusqlite::Row) -> rusqlite::Result<Media> {
        Ok(Media {
            id: row.get(0)?,
            kind,
            external_id: row.get(1)?,
            title: row.get(2)?,
            path: PathBuf::from(row.get::<_, String>(3)?),
            file_name: row.get(4)?,
            media_hash: row.get(5)?,
            date_added: parse_ts(row.get::<_, String>(6)?),
            indexed_at: row.get::<_, Option<String>>(7)?.map(parse_ts),
            last_subtitle_check_at: row.get::<_, Option<String>>(8)?.map(parse_ts),
            excluded: row.get(9)?,
            is_priority: row.get(10)?,
            priority_date: row.get::<_, Option<String>>(11)?.map(parse_ts),
            translation_age_threshold: row.get(12)?,
            translation_state: TranslationState::parse(&row.get::<_, String>(13)?)
                .unwrap_or(TranslationState::Unknown),
            state_settings_version: row.get(14)?,
            created_at: parse_ts(row.get::<_, String>(15)?),
            updated_at: parse_ts(row.get::<_, String>(16)?),
        })
    }

    fn row_to_embedded(row: &rusqlite::Row) -> rusqlite::Result<EmbeddedSubtitle> {
        Ok(EmbeddedSubtitle {
            stream_index: row.get(0)?,
            language: row.get(1)?,
            title: row.get(2)?,
            codec: row.get(3)?,
            is_text_based: row.get(4)?,
            is_default: row.get(5)?,
            is_forced: row.get(6)?,
            is_extracted: row.get(7)?,
            extracted_path: row.get(8)?,
        })
    }

    fn get_with_conn(
        conn: &Connection,
        kind: MediaKind,
        id: i64,
    ) -> Result<Option<Media>, MediaStoreError> {
        let sql = match kind {
            MediaKind::Movie => format!("SELECT {} FROM movies WHERE id = ?", MEDIA_COLUMNS),
            MediaKind::Episode => format!(
                "SELECT {} {} WHERE e.id = ?",
                EPISODE_COLUMNS, EPISODE_FROM
            ),
        };
        let result = conn.query_row(&sql, params![id], |row| Self::row_to_media(kind, row));
        match result {
            Ok(media) => Ok(Some(media)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    fn query_work(
        &self,
        conn: &Connection,
        kind: MediaKind,
        limit: usize,
        priority_first: bool,
    ) -> Result<Vec<Media>, MediaStoreError> {
        let filter = "translation_state IN ('pending', 'stale', 'unknown') \
             OR (translation_state = 'awaiting_source' AND indexed_at IS NULL)";
        let order = if priority_first {
            "work_priority DESC, priority_date ASC, last_subtitle_check_at ASC, date_added ASC"
        } else {
            "last_subtitle_check_at ASC, date_added ASC"
        };
        let sql = match kind {
            MediaKind::Movie => format!(
                "SELECT {}, is_priority AS work_priority FROM movies WHERE {} ORDER BY {} LIMIT ?",
                MEDIA_COLUMNS, filter, order
            ),
            MediaKind::Episode => format!(
                "SELECT {}, (e.is_priority OR sh.is_priority) AS work_priority {} \
                 WHERE ({}) ORDER BY {} LIMIT ?",
                EPISODE_COLUMNS, EPISODE_FROM, filter, order
            ),
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| Self::row_to_media(kind, row))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }
}

impl MediaStore for SqliteMediaStore {
    fn upsert_movie(&self, new: NewMovie) -> Result<Media, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO movies (external_id, title, path, file_name, media_hash, date_added, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(external_id) DO UPDATE SET \
                 title = excluded.title, path = excluded.path, file_name = excluded.file_name, \
                 media_hash = COALESCE(excluded.media_hash, movies.media_hash), \
                 updated_at = excluded.updated_at",
            params![
                new.external_id,
                new.title,
                new.path,
                new.file_name,
                new.media_hash,
                new.date_added.to_rfc3339(),
                now,
                now,
            ],
        )
        .map_err(db_err)?;

        let sql = format!("SELECT {} FROM movies WHERE external_id = ?", MEDIA_COLUMNS);
        conn.query_row(&sql, params![new.external_id], |row| {
            Self::row_to_media(MediaKind::Movie, row)
        })
        .map_err(db_err)
    }

    fn upsert_show(&self, new: NewShow) -> Result<Show, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO shows (external_id, title, path, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(external_id) DO UPDATE SET \
                 title = excluded.title, path = excluded.path, updated_at = excluded.updated_at",
            params![new.external_id, new.title, new.path, now, now],
        )
        .map_err(db_err)?;

        conn.query_row(
            "SELECT id, external_id, title, path, exclude_from_translation, is_priority, created_at, updated_at \
             FROM shows WHERE external_id = ?",
            params![new.external_id],
            |row| {
                Ok(Show {
                    id: row.get(0)?,
                    external_id: row.get(1)?,
                    title: row.get(2)?,
                    path: PathBuf::from(row.get::<_, String>(3)?),
                    exclude_from_translation: row.get(4)?,
                    is_priority: row.get(5)?,
                    created_at: parse_ts(row.get::<_, String>(6)?),
                    updated_at: parse_ts(row.get::<_, String>(7)?),
                })
            },
        )
        .map_err(db_err)
    }

    fn upsert_season(&self, new: NewSeason) -> Result<Season, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO seasons (show_id, number, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(show_id, number) DO UPDATE SET updated_at = excluded.updated_at",
            params![new.show_id, new.number, now, now],
        )
        .map_err(db_err)?;

        conn.query_row(
            "SELECT id, show_id, number, exclude_from_translation, created_at, updated_at \
             FROM seasons WHERE show_id = ? AND number = ?",
            params![new.show_id, new.number],
            |row| {
                Ok(Season {
                    id: row.get(0)?,
                    show_id: row.get(1)?,
                    number: row.get(2)?,
                    exclude_from_translation: row.get(3)?,
                    created_at: parse_ts(row.get::<_, String>(4)?),
                    updated_at: parse_ts(row.get::<_, String>(5)?),
                })
            },
        )
        .map_err(db_err)
    }

    fn upsert_episode(&self, new: NewEpisode) -> Result<Media, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO episodes (external_id, show_id, season_id, title, path, file_name, media_hash, date_added, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(external_id) DO UPDATE SET \
                 show_id = excluded.show_id, season_id = excluded.season_id, \
                 title = excluded.title, path = excluded.path, file_name = excluded.file_name, \
                 media_hash = COALESCE(excluded.media_hash, episodes.media_hash), \
                 updated_at = excluded.updated_at",
            params![
                new.external_id,
                new.show_id,
                new.season_id,
                new.title,
                new.path,
                new.file_name,
                new.media_hash,
                new.date_added.to_rfc3339(),
                now,
                now,
            ],
        )
        .map_err(db_err)?;

        let sql = format!(
            "SELECT {} {} WHERE e.external_id = ?",
            EPISODE_COLUMNS, EPISODE_FROM
        );
        conn.query_row(&sql, params![new.external_id], |row| {
            Self::row_to_media(MediaKind::Episode, row)
        })
        .map_err(db_err)
    }

    fn get(&self, kind: MediaKind, id: i64) -> Result<Option<Media>, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        Self::get_with_conn(&conn, kind, id)
    }

    fn list(&self, kind: MediaKind) -> Result<Vec<Media>, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = match kind {
            MediaKind::Movie => format!("SELECT {} FROM movies", MEDIA_COLUMNS),
            MediaKind::Episode => format!("SELECT {} {}", EPISODE_COLUMNS, EPISODE_FROM),
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_media(kind, row))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn embedded(&self, kind: MediaKind, id: i64) -> Result<Vec<EmbeddedSubtitle>, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT stream_index, language, title, codec, is_text_based, is_default, is_forced, \
                 is_extracted, extracted_path \
                 FROM embedded_subtitles WHERE media_kind = ? AND media_id = ? ORDER BY stream_index",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![kind.as_str(), id], Self::row_to_embedded)
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn replace_embedded(
        &self,
        kind: MediaKind,
        id: i64,
        subtitles: &[EmbeddedSubtitle],
    ) -> Result<(), MediaStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "DELETE FROM embedded_subtitles WHERE media_kind = ? AND media_id = ?",
            params![kind.as_str(), id],
        )
        .map_err(db_err)?;

        for sub in subtitles {
            tx.execute(
                "INSERT INTO embedded_subtitles \
                 (media_kind, media_id, stream_index, language, title, codec, is_text_based, \
                  is_default, is_forced, is_extracted, extracted_path, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    kind.as_str(),
                    id,
                    sub.stream_index,
                    sub.language,
                    sub.title,
                    sub.codec,
                    sub.is_text_based,
                    sub.is_default,
                    sub.is_forced,
                    sub.is_extracted,
                    sub.extracted_path,
                    now,
                    now,
                ],
            )
            .map_err(db_err)?;
        }

        tx.execute(
            &format!(
                "UPDATE {} SET indexed_at = ?, updated_at = ? WHERE id = ?",
                Self::table(kind)
            ),
            params![now, now, id],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)
    }

    fn mark_extracted(
        &self,
        kind: MediaKind,
        id: i64,
        stream_index: u32,
        path: &str,
    ) -> Result<(), MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE embedded_subtitles SET is_extracted = 1, extracted_path = ?, updated_at = ? \
             WHERE media_kind = ? AND media_id = ? AND stream_index = ?",
            params![path, now, kind.as_str(), id, stream_index],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn update_state(
        &self,
        kind: MediaKind,
        id: i64,
        state: TranslationState,
        settings_version: i64,
    ) -> Result<(), MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                &format!(
                    "UPDATE {} SET translation_state = ?, state_settings_version = ?, updated_at = ? \
                     WHERE id = ?",
                    Self::table(kind)
                ),
                params![state.as_str(), settings_version, now, id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(MediaStoreError::NotFound { kind, id });
        }
        Ok(())
    }

    fn set_exclusion(
        &self,
        kind: MediaKind,
        id: i64,
        excluded: bool,
    ) -> Result<(), MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                "UPDATE {} SET exclude_from_translation = ?, updated_at = ? WHERE id = ?",
                Self::table(kind)
            ),
            params![excluded, now, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn set_priority(
        &self,
        kind: MediaKind,
        id: i64,
        is_priority: bool,
        priority_date: Option<DateTime<Utc>>,
    ) -> Result<(), MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                "UPDATE {} SET is_priority = ?, priority_date = ?, updated_at = ? WHERE id = ?",
                Self::table(kind)
            ),
            params![is_priority, priority_date.map(|d| d.to_rfc3339()), now, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn touch_subtitle_check(&self, kind: MediaKind, id: i64) -> Result<(), MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                "UPDATE {} SET last_subtitle_check_at = ?, updated_at = ? WHERE id = ?",
                Self::table(kind)
            ),
            params![now, now, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn mark_all_stale(&self) -> Result<usize, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let mut changed = 0;
        for table in ["movies", "episodes"] {
            changed += conn
                .execute(
                    &format!(
                        "UPDATE {} SET translation_state = 'stale', updated_at = ? \
                         WHERE translation_state != 'not_applicable'",
                        table
                    ),
                    params![now],
                )
                .map_err(db_err)?;
        }
        Ok(changed)
    }

    fn next_work(&self, limit: usize, priority_first: bool) -> Result<Vec<Media>, MediaStoreError> {
        let conn = self.conn.lock().unwrap();
        let movies = self.query_work(&conn, MediaKind::Movie, limit, priority_first)?;
        let episodes = self.query_work(&conn, MediaKind::Episode, limit, priority_first)?;

        // Balanced split: each kind gets at most half, then either side grows
        // into whatever capacity the other leaves unused.
        let half = limit / 2;
        let take_movies = movies.len().min(half);
        let take_episodes = episodes.len().min(limit - take_movies);
        let take_movies = movies.len().min(limit - take_episodes);

        let mut out: Vec<Media> = movies.into_iter().take(take_movies).collect();
        out.extend(episodes.into_iter().take(take_episodes));
        Ok(out)
    }
}

fn db_err(e: impl std::fmt::Display) -> MediaStoreError {
    MediaStoreError::Database(e.to_string())
}

fn parse_ts(value: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
