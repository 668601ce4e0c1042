//! SQLite Record Store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use super::{retry_on_lock, RecordStore};
use crate::models::{Record, Status};
use crate::{Error, Result};

/// Default lock wait for writes
const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

type RecordRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Record Store backed by a SQLite `records` table
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database file and its schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // mode=rwc: read, write, create
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        })
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            path TEXT NOT NULL,
            json_path TEXT,
            status TEXT NOT NULL,
            failure TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON records(status)")
        .execute(pool)
        .await?;

    Ok(())
}

fn row_to_record(row: RecordRow) -> Result<Record> {
    let (id, filename, mime_type, path, json_path, status, failure, created_at, updated_at) = row;
    Ok(Record {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Invalid record id '{}': {}", id, e)))?,
        filename,
        mime_type,
        path,
        json_path,
        status: status.parse::<Status>()?,
        failure,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, id: Uuid) -> Result<Record> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, filename, mime_type, path, json_path, status, failure, created_at, updated_at
            FROM records WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_record(row),
            None => Err(Error::NotFound(format!("record {}", id))),
        }
    }

    async fn create(&self, record: &Record) -> Result<()> {
        let pool = &self.pool;
        let id = record.id.to_string();
        let status = record.status.as_str();

        let result = retry_on_lock("record create", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO records (
                    id, filename, mime_type, path, json_path, status, failure, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&record.filename)
            .bind(&record.mime_type)
            .bind(&record.path)
            .bind(&record.json_path)
            .bind(status)
            .bind(&record.failure)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await;

        match result {
            Err(Error::Database(sqlx::Error::Database(db_err))) if db_err.is_unique_violation() => {
                Err(Error::AlreadyExists(format!("record {}", record.id)))
            }
            other => other,
        }
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let pool = &self.pool;
        let id = record.id.to_string();
        let status = record.status.as_str();

        let rows = retry_on_lock("record update", self.max_lock_wait_ms, || async {
            let done = sqlx::query(
                r#"
                UPDATE records SET
                    filename = ?, mime_type = ?, path = ?, json_path = ?,
                    status = ?, failure = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&record.filename)
            .bind(&record.mime_type)
            .bind(&record.path)
            .bind(&record.json_path)
            .bind(status)
            .bind(&record.failure)
            .bind(record.updated_at)
            .bind(&id)
            .execute(pool)
            .await?;
            Ok(done.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("record {}", record.id)));
        }
        Ok(())
    }
}
