//! PostgreSQL Record Store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use super::RecordStore;
use crate::config::PostgresConfig;
use crate::models::{Record, Status};
use crate::{Error, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

type RecordRow = (
    Uuid,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Record Store backed by a PostgreSQL `records` table
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Connect and create the schema if missing
    pub async fn connect(options: PgConnectOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Connection options from `url` when given, else from the individual fields
pub fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions> {
    if let Some(url) = &config.url {
        return url
            .parse::<PgConnectOptions>()
            .map_err(|e| Error::Config(format!("Invalid database url: {}", e)));
    }

    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.name);
    Ok(match &config.password {
        Some(password) => options.password(password),
        None => options,
    })
}

async fn init_tables(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id UUID PRIMARY KEY,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            path TEXT NOT NULL,
            json_path TEXT,
            status TEXT NOT NULL,
            failure TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
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
        id,
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
impl RecordStore for PostgresRecordStore {
    async fn get(&self, id: Uuid) -> Result<Record> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, filename, mime_type, path, json_path, status, failure, created_at, updated_at
            FROM records WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_record(row),
            None => Err(Error::NotFound(format!("record {}", id))),
        }
    }

    async fn create(&self, record: &Record) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO records (
                id, filename, mime_type, path, json_path, status, failure, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(&record.mime_type)
        .bind(&record.path)
        .bind(&record.json_path)
        .bind(record.status.as_str())
        .bind(&record.failure)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::AlreadyExists(format!("record {}", record.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE records SET
                filename = $1, mime_type = $2, path = $3, json_path = $4,
                status = $5, failure = $6, updated_at = $7
            WHERE id = $8
            "#,
        )
        .bind(&record.filename)
        .bind(&record.mime_type)
        .bind(&record.path)
        .bind(&record.json_path)
        .bind(record.status.as_str())
        .bind(&record.failure)
        .bind(record.updated_at)
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("record {}", record.id)));
        }
        Ok(())
    }
}
