//! Bookkeeping of bulk subscriber imports. The import itself is performed by an external
//! worker which reports its progress through [`ImportJobs::update`].

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};

use crate::domain::list_id::ListId;
use crate::error::{StoreError, StoreResult};

const DEFAULT_IMPORT_TYPE: i16 = 1;

/// How the columns of an import file map onto subscriber fields.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportMapping {
    #[serde(default)]
    pub columns: Vec<serde_json::Value>,
}

impl ImportMapping {
    /// Stored mappings that fail to parse are treated as empty.
    pub fn decode(stored: &str) -> ImportMapping {
        serde_json::from_str(stored).unwrap_or_default()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: i32,
    pub list: i32,
    #[serde(rename = "type")]
    pub import_type: i16,
    pub path: String,
    pub size: i64,
    pub delimiter: String,
    pub status: i16,
    pub error: Option<String>,
    pub processed: i32,
    pub mapping: ImportMapping,
    pub finished: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ImportJob {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ImportJob {
            id: row.try_get("id")?,
            list: row.try_get("list")?,
            import_type: row.try_get("type")?,
            path: row.try_get("path")?,
            size: row.try_get("size")?,
            delimiter: row.try_get("delimiter")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            processed: row.try_get("processed")?,
            mapping: ImportMapping::decode(row.try_get("mapping")?),
            finished: row.try_get("finished")?,
            created: row.try_get("created")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewImport {
    pub import_type: i16,
    pub path: String,
    pub size: i64,
    pub delimiter: String,
    pub mapping: ImportMapping,
}

/// Fields an import worker may change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ImportUpdate {
    pub import_type: Option<i16>,
    pub path: Option<String>,
    pub size: Option<i64>,
    pub delimiter: Option<String>,
    pub status: Option<i16>,
    pub error: Option<Option<String>>,
    pub processed: Option<i32>,
    pub mapping: Option<ImportMapping>,
    pub finished: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ImportJobs {
    db_pool: PgPool,
}

impl ImportJobs {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    #[tracing::instrument(name = "Create an import job", skip(self))]
    pub async fn create(&self, list: ListId, new_import: NewImport) -> StoreResult<i32> {
        let import_type = if new_import.import_type > 0 {
            new_import.import_type
        } else {
            DEFAULT_IMPORT_TYPE
        };

        let id = sqlx::query_scalar(
            r#"
            INSERT INTO importer (list, type, path, size, delimiter, mapping)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(list.as_i32())
        .bind(import_type)
        .bind(new_import.path)
        .bind(new_import.size)
        .bind(new_import.delimiter)
        .bind(serde_json::to_string(&new_import.mapping)?)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(id)
    }

    /// Applies a partial update and returns the number of updated rows.
    #[tracing::instrument(name = "Update an import job", skip(self, update))]
    pub async fn update(
        &self,
        list: ListId,
        import_id: i32,
        update: ImportUpdate,
    ) -> StoreResult<u64> {
        let import_id = required_import_id(import_id)?;

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE importer SET ");
        let mut separated = builder.separated(", ");
        let mut changes = 0;

        if let Some(import_type) = update.import_type {
            separated.push("type = ").push_bind_unseparated(import_type);
            changes += 1;
        }
        if let Some(path) = update.path {
            separated.push("path = ").push_bind_unseparated(path);
            changes += 1;
        }
        if let Some(size) = update.size {
            separated.push("size = ").push_bind_unseparated(size);
            changes += 1;
        }
        if let Some(delimiter) = update.delimiter {
            separated.push("delimiter = ").push_bind_unseparated(delimiter);
            changes += 1;
        }
        if let Some(status) = update.status {
            separated.push("status = ").push_bind_unseparated(status);
            changes += 1;
        }
        if let Some(error) = update.error {
            separated.push("error = ").push_bind_unseparated(error);
            changes += 1;
        }
        if let Some(processed) = update.processed {
            separated.push("processed = ").push_bind_unseparated(processed);
            changes += 1;
        }
        if let Some(mapping) = update.mapping {
            separated
                .push("mapping = ")
                .push_bind_unseparated(serde_json::to_string(&mapping)?);
            changes += 1;
        }
        if let Some(finished) = update.finished {
            separated.push("finished = ").push_bind_unseparated(finished);
            changes += 1;
        }

        if changes == 0 {
            return Ok(0);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(import_id);
        builder.push(" AND list = ");
        builder.push_bind(list.as_i32());

        let result = builder.build().execute(&self.db_pool).await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "Get an import job", skip(self))]
    pub async fn get(&self, list: ListId, import_id: i32) -> StoreResult<Option<ImportJob>> {
        let import_id = required_import_id(import_id)?;

        let job = sqlx::query_as("SELECT * FROM importer WHERE id = $1 AND list = $2")
            .bind(import_id)
            .bind(list.as_i32())
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(job)
    }

    /// Imports that have been started, newest first.
    #[tracing::instrument(name = "List active import jobs", skip(self))]
    pub async fn list_active(&self, list: ListId) -> StoreResult<Vec<ImportJob>> {
        let jobs = sqlx::query_as(
            "SELECT * FROM importer WHERE list = $1 AND status > 0 ORDER BY id DESC",
        )
        .bind(list.as_i32())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(jobs)
    }
}

fn required_import_id(import_id: i32) -> StoreResult<i32> {
    if import_id < 1 {
        return Err(StoreError::Validation(String::from("Missing Import ID")));
    }

    Ok(import_id)
}
