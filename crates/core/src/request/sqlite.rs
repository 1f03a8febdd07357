//! SQLite-backed request store implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::media::MediaKind;

use super::store::{CreateOutcome, RequestError, RequestFilter, RequestStore};
use super::types::{LogLevel, RequestAttrs, RequestLogEntry, RequestStatus, TranslationRequest};

/// SQLite-backed request store.
pub struct SqliteRequestStore {
    conn: Mutex<Connection>,
}

const REQUEST_COLUMNS: &str = "id, title, source_language, target_language, source_path, \
     translated_path, media_kind, media_id, status, progress, is_priority, completed_at, \
     created_at, updated_at";

impl SqliteRequestStore {
    /// Open (or create) the request store at the given database path.
    pub fn new(path: &Path) -> Result<Self, RequestError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory request store (useful for testing).
    pub fn in_memory() -> Result<Self, RequestError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RequestError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS translation_requests (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source_language TEXT NOT NULL,
                target_language TEXT NOT NULL,
                source_path TEXT,
                translated_path TEXT,
                media_kind TEXT NOT NULL,
                media_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                is_priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active_singleton
                ON translation_requests(media_id, media_kind, source_language, target_language)
                WHERE is_active = 1;

            CREATE INDEX IF NOT EXISTS idx_requests_status ON translation_requests(status);
            CREATE INDEX IF NOT EXISTS idx_requests_media ON translation_requests(media_kind, media_id);

            CREATE TABLE IF NOT EXISTS translation_request_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL REFERENCES translation_requests(id) ON DELETE CASCADE,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_request_logs_request ON translation_request_logs(request_id);
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<TranslationRequest> {
        let kind: String = row.get(6)?;
        Ok(TranslationRequest {
            id: row.get(0)?,
            title: row.get(1)?,
            source_language: row.get(2)?,
            target_language: row.get(3)?,
            source_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
            translated_path: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
            media_kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Movie),
            media_id: row.get(7)?,
            status: RequestStatus::parse(&row.get::<_, String>(8)?)
                .unwrap_or(RequestStatus::Failed),
            progress: row.get(9)?,
            is_priority: row.get(10)?,
            completed_at: row.get::<_, Option<String>>(11)?.map(parse_ts),
            created_at: parse_ts(row.get::<_, String>(12)?),
            updated_at: parse_ts(row.get::<_, String>(13)?),
        })
    }

    fn active_for_with_conn(
        conn: &Connection,
        kind: MediaKind,
        media_id: i64,
        source: &str,
        target: &str,
    ) -> Result<Option<TranslationRequest>, RequestError> {
        let sql = format!(
            "SELECT {} FROM translation_requests \
             WHERE media_kind = ? AND media_id = ? AND source_language = ? AND target_language = ? \
             AND is_active = 1",
            REQUEST_COLUMNS
        );
        let result = conn.query_row(
            &sql,
            params![kind.as_str(), media_id, source, target],
            Self::row_to_request,
        );
        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

impl RequestStore for SqliteRequestStore {
    fn create(&self, attrs: RequestAttrs) -> Result<CreateOutcome, RequestError> {
        let conn = self.conn.lock().unwrap();

        // Cheap short-circuit before paying for an insert attempt.
        if let Some(existing) = Self::active_for_with_conn(
            &conn,
            attrs.media_kind,
            attrs.media_id,
            &attrs.source_language,
            &attrs.target_language,
        )? {
            return Ok(CreateOutcome::Existing(existing));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let insert = conn.execute(
            "INSERT INTO translation_requests \
             (id, title, source_language, target_language, source_path, media_kind, media_id, \
              status, progress, is_priority, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, 1, ?, ?)",
            params![
                id,
                attrs.title,
                attrs.source_language,
                attrs.target_language,
                attrs.source_path.as_ref().map(|p| p.display().to_string()),
                attrs.media_kind.as_str(),
                attrs.media_id,
                attrs.is_priority,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        );

        match insert {
            Ok(_) => Ok(CreateOutcome::Created(TranslationRequest {
                id,
                title: attrs.title,
                source_language: attrs.source_language,
                target_language: attrs.target_language,
                source_path: attrs.source_path,
                translated_path: None,
                media_kind: attrs.media_kind,
                media_id: attrs.media_id,
                status: RequestStatus::Pending,
                progress: 0,
                is_priority: attrs.is_priority,
                completed_at: None,
                created_at: now,
                updated_at: now,
            })),
            // A concurrent create won the race for the unique partial index;
            // the existing active row is the answer.
            Err(e) if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) => {
                let existing = Self::active_for_with_conn(
                    &conn,
                    attrs.media_kind,
                    attrs.media_id,
                    &attrs.source_language,
                    &attrs.target_language,
                )?
                .ok_or_else(|| {
                    RequestError::Database("conflict on insert but no active row".to_string())
                })?;
                Ok(CreateOutcome::Existing(existing))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<TranslationRequest>, RequestError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM translation_requests WHERE id = ?",
            REQUEST_COLUMNS
        );
        let result = conn.query_row(&sql, params![id], Self::row_to_request);
        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    fn list(&self, filter: &RequestFilter) -> Result<Vec<TranslationRequest>, RequestError> {
        let conn = self.conn.lock().unwrap();

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            conditions.push("status = ?".to_string());
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some((kind, id)) = filter.media {
            conditions.push("media_kind = ? AND media_id = ?".to_string());
            params.push(Box::new(kind.as_str().to_string()));
            params.push(Box::new(id));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit_clause = match filter.limit {
            Some(limit) => format!("LIMIT {}", limit),
            None => String::new(),
        };

        let sql = format!(
            "SELECT {} FROM translation_requests {} \
             ORDER BY is_priority DESC, created_at ASC {}",
            REQUEST_COLUMNS, where_clause, limit_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_request)
            .map_err(db_err)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row.map_err(db_err)?);
        }
        Ok(requests)
    }

    fn update_status(
        &self,
        id: &str,
        status: RequestStatus,
    ) -> Result<TranslationRequest, RequestError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM translation_requests WHERE id = ?",
            REQUEST_COLUMNS
        );
        let current = match conn.query_row(&sql, params![id], Self::row_to_request) {
            Ok(request) => request,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(RequestError::NotFound(id.to_string()));
            }
            Err(e) => return Err(db_err(e)),
        };

        if current.status.is_terminal() && status != current.status {
            return Err(RequestError::InvalidStatus {
                id: id.to_string(),
                status: current.status,
                operation: format!("transition to {}", status),
            });
        }

        let now = Utc::now();
        let is_active: Option<i64> = if status.is_active() { Some(1) } else { None };
        let completed_at = if status == RequestStatus::Completed {
            Some(now.to_rfc3339())
        } else {
            None
        };
        conn.execute(
            "UPDATE translation_requests \
             SET status = ?, is_active = ?, completed_at = COALESCE(?, completed_at), updated_at = ? \
             WHERE id = ?",
            params![status.as_str(), is_active, completed_at, now.to_rfc3339(), id],
        )
        .map_err(db_err)?;

        Ok(TranslationRequest {
            status,
            completed_at: if status == RequestStatus::Completed {
                Some(now)
            } else {
                current.completed_at
            },
            updated_at: now,
            ..current
        })
    }

    fn set_progress(&self, id: &str, progress: u8) -> Result<(), RequestError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE translation_requests SET progress = ?, updated_at = ? WHERE id = ?",
                params![progress.min(100), Utc::now().to_rfc3339(), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(RequestError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_translated_path(&self, id: &str, path: &str) -> Result<(), RequestError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE translation_requests SET translated_path = ?, updated_at = ? WHERE id = ?",
                params![path, Utc::now().to_rfc3339(), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(RequestError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn active_for(
        &self,
        kind: MediaKind,
        media_id: i64,
        source: &str,
        target: &str,
    ) -> Result<Option<TranslationRequest>, RequestError> {
        let conn = self.conn.lock().unwrap();
        Self::active_for_with_conn(&conn, kind, media_id, source, target)
    }

    fn latest_completed_for(
        &self,
        kind: MediaKind,
        media_id: i64,
        source: &str,
        target: &str,
    ) -> Result<Option<TranslationRequest>, RequestError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM translation_requests \
             WHERE media_kind = ? AND media_id = ? AND source_language = ? AND target_language = ? \
             AND status = 'completed' ORDER BY completed_at DESC LIMIT 1",
            REQUEST_COLUMNS
        );
        let result = conn.query_row(
            &sql,
            params![kind.as_str(), media_id, source, target],
            Self::row_to_request,
        );
        match result {
            Ok(request) => Ok(Some(request)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    fn has_active(&self, kind: MediaKind, media_id: i64) -> Result<bool, RequestError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM translation_requests \
                 WHERE media_kind = ? AND media_id = ? AND is_active = 1",
                params![kind.as_str(), media_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    fn has_failed(&self, kind: MediaKind, media_id: i64) -> Result<bool, RequestError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM translation_requests \
                 WHERE media_kind = ? AND media_id = ? AND status = 'failed'",
                params![kind.as_str(), media_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    fn fail_interrupted(&self, message: &str) -> Result<usize, RequestError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        let now = Utc::now().to_rfc3339();

        let ids: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT id FROM translation_requests WHERE status = 'in_progress'")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(db_err)?);
            }
            ids
        };

        for id in &ids {
            tx.execute(
                "UPDATE translation_requests SET status = 'failed', is_active = NULL, updated_at = ? \
                 WHERE id = ?",
                params![now, id],
            )
            .map_err(db_err)?;
            tx.execute(
                "INSERT INTO translation_request_logs (request_id, level, message, created_at) \
                 VALUES (?, 'error', ?, ?)",
                params![id, message, now],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(ids.len())
    }

    fn remove(&self, id: &str) -> Result<TranslationRequest, RequestError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM translation_requests WHERE id = ?",
            REQUEST_COLUMNS
        );
        let request = match conn.query_row(&sql, params![id], Self::row_to_request) {
            Ok(request) => request,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(RequestError::NotFound(id.to_string()));
            }
            Err(e) => return Err(db_err(e)),
        };
        if request.status.is_active() {
            return Err(RequestError::InvalidStatus {
                id: id.to_string(),
                status: request.status,
                operation: "remove".to_string(),
            });
        }

        conn.execute(
            "DELETE FROM translation_request_logs WHERE request_id = ?",
            params![id],
        )
        .map_err(db_err)?;
        conn.execute("DELETE FROM translation_requests WHERE id = ?", params![id])
            .map_err(db_err)?;
        Ok(request)
    }

    fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO translation_request_logs (request_id, level, message, details, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                id,
                level.as_str(),
                message,
                details.map(|d| d.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn logs(&self, id: &str) -> Result<Vec<RequestLogEntry>, RequestError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, request_id, level, message, details, created_at \
                 FROM translation_request_logs WHERE request_id = ? ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(RequestLogEntry {
                    id: row.get(0)?,
                    request_id: row.get(1)?,
                    level: LogLevel::parse(&row.get::<_, String>(2)?).unwrap_or(LogLevel::Info),
                    message: row.get(3)?,
                    details: row
                        .get::<_, Option<String>>(4)?
                        .and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: parse_ts(row.get::<_, String>(5)?),
                })
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }
}

fn db_err(e: impl std::fmt::Display) -> RequestError {
    RequestError::Database(e.to_string())
}

fn parse_ts(value: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteRequestStore {
        SqliteRequestStore::in_memory().unwrap()
    }

    fn attrs(media_id: i64, source: &str, target: &str) -> RequestAttrs {
        RequestAttrs {
            title: "Some Movie".to_string(),
            source_language: source.to_string(),
            target_language: target.to_string(),
            source_path: Some(PathBuf::from("/library/Some Movie/Some Movie.en.srt")),
            media_kind: MediaKind::Movie,
            media_id,
            is_priority: false,
        }
    }

    #[test]
    fn test_create_request() {
        let store = store();
        let outcome = store.create(attrs(7, "en", "pl")).unwrap();
        assert!(outcome.was_created());
        let request = outcome.request();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.progress, 0);
        assert!(request.completed_at.is_none());
    }

    #[test]
    fn test_create_dedupes_on_active_tuple() {
        let store = store();
        let first = store.create(attrs(7, "en", "pl")).unwrap().into_request();
        let second = store.create(attrs(7, "en", "pl")).unwrap();
        assert!(!second.was_created());
        assert_eq!(second.request().id, first.id);

        // A different tuple is unaffected.
        let other = store.create(attrs(7, "en", "de")).unwrap();
        assert!(other.was_created());
    }

    #[test]
    fn test_create_after_terminal_is_allowed() {
        let store = store();
        let first = store.create(attrs(7, "en", "pl")).unwrap().into_request();
        store
            .update_status(&first.id, RequestStatus::Cancelled)
            .unwrap();

        let second = store.create(attrs(7, "en", "pl")).unwrap();
        assert!(second.was_created());
        assert_ne!(second.request().id, first.id);
    }

    #[test]
    fn test_update_status_maintains_active_flag() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();

        store
            .update_status(&request.id, RequestStatus::InProgress)
            .unwrap();
        assert!(store.has_active(MediaKind::Movie, 1).unwrap());

        let completed = store
            .update_status(&request.id, RequestStatus::Completed)
            .unwrap();
        assert!(completed.completed_at.is_some());
        assert!(!store.has_active(MediaKind::Movie, 1).unwrap());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        store
            .update_status(&request.id, RequestStatus::Failed)
            .unwrap();

        let result = store.update_status(&request.id, RequestStatus::InProgress);
        assert!(matches!(result, Err(RequestError::InvalidStatus { .. })));
    }

    #[test]
    fn test_has_failed() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        assert!(!store.has_failed(MediaKind::Movie, 1).unwrap());
        store
            .update_status(&request.id, RequestStatus::Failed)
            .unwrap();
        assert!(store.has_failed(MediaKind::Movie, 1).unwrap());
    }

    #[test]
    fn test_list_priority_first() {
        let store = store();
        store.create(attrs(1, "en", "fr")).unwrap();
        let mut urgent = attrs(2, "en", "fr");
        urgent.is_priority = true;
        store.create(urgent).unwrap();

        let pending = store
            .list(&RequestFilter::new().with_status(RequestStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].media_id, 2);
    }

    #[test]
    fn test_fail_interrupted() {
        let store = store();
        let a = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        let b = store.create(attrs(2, "en", "fr")).unwrap().into_request();
        store.update_status(&a.id, RequestStatus::InProgress).unwrap();

        let failed = store.fail_interrupted("process restarted").unwrap();
        assert_eq!(failed, 1);

        let a = store.get(&a.id).unwrap().unwrap();
        assert_eq!(a.status, RequestStatus::Failed);
        let logs = store.logs(&a.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "process restarted");

        // Pending rows are untouched.
        let b = store.get(&b.id).unwrap().unwrap();
        assert_eq!(b.status, RequestStatus::Pending);
    }

    #[test]
    fn test_logs_are_ordered_and_not_deduplicated() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        store
            .append_log(&request.id, LogLevel::Info, "step", None)
            .unwrap();
        store
            .append_log(&request.id, LogLevel::Info, "step", None)
            .unwrap();
        store
            .append_log(
                &request.id,
                LogLevel::Error,
                "failed",
                Some(serde_json::json!({"attempt": 2})),
            )
            .unwrap();

        let logs = store.logs(&request.id).unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "step");
        assert_eq!(logs[1].message, "step");
        assert_eq!(logs[2].level, LogLevel::Error);
        assert_eq!(logs[2].details, Some(serde_json::json!({"attempt": 2})));
    }

    #[test]
    fn test_remove_terminal_only() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        assert!(matches!(
            store.remove(&request.id),
            Err(RequestError::InvalidStatus { .. })
        ));

        store
            .update_status(&request.id, RequestStatus::Cancelled)
            .unwrap();
        store.remove(&request.id).unwrap();
        assert!(store.get(&request.id).unwrap().is_none());
    }

    #[test]
    fn test_latest_completed_for() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        assert!(store
            .latest_completed_for(MediaKind::Movie, 1, "en", "fr")
            .unwrap()
            .is_none());

        store
            .update_status(&request.id, RequestStatus::Completed)
            .unwrap();
        let found = store
            .latest_completed_for(MediaKind::Movie, 1, "en", "fr")
            .unwrap();
        assert_eq!(found.unwrap().id, request.id);
    }

    #[test]
    fn test_set_progress_clamps() {
        let store = store();
        let request = store.create(attrs(1, "en", "fr")).unwrap().into_request();
        store.set_progress(&request.id, 150).unwrap();
        assert_eq!(store.get(&request.id).unwrap().unwrap().progress, 100);
    }
}
