use crate::autosave::DocumentStore;
use crate::datasource::SourceFuture;
use crate::errors::{AppError, AppResult};
use crate::layout::normalize_widget;
use crate::models::{Dashboard, DashboardSettings, DashboardSummary};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "dashboard";

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub path: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    fn connection(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    /// Writes `partial` at `path`. With `merge`, objects are merged key by key
    /// into the stored body and every other value replaces what was there.
    pub fn save_document(&self, path: &str, partial: Value, merge: bool) -> AppResult<()> {
        self.save_document_at(path, partial, merge, Utc::now())
    }

    fn save_document_at(&self, path: &str, partial: Value, merge: bool, now: DateTime<Utc>) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::Invalid("Document path must not be empty".to_string()));
        }
        let conn = self.connection()?;
        let existing = conn
            .query_row(
                "SELECT body_json FROM documents WHERE path = ?1",
                params![path],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        let body = match existing {
            Some(raw) if merge => {
                let mut current = serde_json::from_str::<Value>(&raw)?;
                merge_json(&mut current, partial);
                current
            }
            _ => partial,
        };
        if !body.is_object() {
            return Err(AppError::Invalid(format!("Document {} must be a JSON object", path)));
        }

        let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        conn.execute(
            "INSERT INTO documents (path, body_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(path) DO UPDATE SET body_json = excluded.body_json, updated_at = excluded.updated_at",
            params![path, serde_json::to_string(&body)?, stamp],
        )?;
        debug!(path, merge, "document written");
        Ok(())
    }

    pub fn load_document(&self, path: &str) -> AppResult<Option<Value>> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT body_json FROM documents WHERE path = ?1",
                params![path],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Documents directly under `prefix`, most recently updated first.
    pub fn list_documents(&self, prefix: &str) -> AppResult<Vec<DocumentRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT path, body_json, created_at, updated_at
             FROM documents
             WHERE substr(path, 1, length(?1) + 1) = ?1 || '/'
             ORDER BY updated_at DESC, path ASC",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            let body: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            let updated_at: String = row.get(3)?;
            Ok(DocumentRecord {
                path: row.get(0)?,
                body: serde_json::from_str(&body).unwrap_or(Value::Null),
                created_at: parse_time(&created_at)?,
                updated_at: parse_time(&updated_at)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn list_dashboards(&self, settings: &DashboardSettings) -> AppResult<Vec<DashboardSummary>> {
        let prefix = format!("{}/", settings.collection);
        let records = self.list_documents(&settings.collection)?;
        Ok(records
            .into_iter()
            .map(|record| DashboardSummary {
                id: record.path.strip_prefix(&prefix).unwrap_or(&record.path).to_string(),
                name: record.body.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                widget_count: record
                    .body
                    .get("widgets")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0),
                updated_at: Some(record.updated_at),
            })
            .collect())
    }

    /// Parses a stored dashboard and prepares it for the canvas: runtime
    /// minimums and legacy coordinate rescaling.
    pub fn load_dashboard(&self, id: &str, settings: &DashboardSettings) -> AppResult<Option<Dashboard>> {
        let path = format!("{}/{}", settings.collection, id);
        let Some(raw) = self.load_document(&path)? else {
            return Ok(None);
        };
        let mut dashboard: Dashboard = serde_json::from_value(raw)?;
        dashboard.id = id.to_string();
        for widget in &mut dashboard.widgets {
            normalize_widget(widget, settings.grid_cols);
        }
        Ok(Some(dashboard))
    }

    pub fn get_settings(&self) -> AppResult<DashboardSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                params![SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<DashboardSettings>(&raw).unwrap_or_default()),
            None => Ok(DashboardSettings::default()),
        }
    }

    pub fn update_settings(&self, update: Value) -> AppResult<DashboardSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: DashboardSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Invalid(format!("Invalid settings: {}", error)))?;
        if settings.grid_cols == 0 {
            return Err(AppError::Invalid("gridCols must be at least 1".to_string()));
        }

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            params![SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&DashboardSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

impl DocumentStore for Database {
    fn save<'a>(&'a self, path: &'a str, partial: Value, merge: bool) -> SourceFuture<'a, ()> {
        Box::pin(async move { self.save_document(path, partial, merge) })
    }

    fn load<'a>(&'a self, path: &'a str) -> SourceFuture<'a, Option<Value>> {
        Box::pin(async move { self.load_document(path) })
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

pub(crate) fn merge_json(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
