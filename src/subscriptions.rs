use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::collaborators::{FieldRegistry, IdGenerator, NoSegments, SegmentCompiler, SegmentQuery};
use crate::domain::custom_field::{is_valid_column_name, FieldDescriptor, FieldValue};
use crate::domain::list_id::ListId;
use crate::domain::subscriber::{Subscriber, SubscriptionMeta, BASE_COLUMNS};
use crate::domain::subscription_status::SubscriptionStatus;
use crate::error::{StoreError, StoreResult};
use crate::field_mapper::{map_row, MapOptions, MappedColumn};
use crate::sql::{like_pattern, push_segment, push_value, quote_identifier};
use crate::status_ledger::{adjust_subscribers_counter, counter_delta, CounterDelta};

// Two concurrent first inserts of the same address race on the unique index; the loser
// retries and finds the committed row.
const UPSERT_ATTEMPTS: usize = 3;
const DEFAULT_PAGE_LENGTH: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Ordering by the position of a column in the caller's column list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOrder {
    pub column: usize,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default)]
pub struct FilterRequest {
    pub start: i64,
    pub length: i64,
    pub search: Option<String>,
    pub order: Vec<ColumnOrder>,
}

#[derive(Debug)]
pub struct SubscriberPage {
    pub rows: Vec<Subscriber>,
    pub total: i64,
}

#[derive(Debug)]
pub struct FilteredSubscribers {
    pub rows: Vec<Subscriber>,
    pub total: i64,
    pub filtered: i64,
}

#[derive(Clone)]
pub struct SubscriptionStore {
    db_pool: PgPool,
    fields: Arc<dyn FieldRegistry>,
    segments: Arc<dyn SegmentCompiler>,
    ids: Arc<dyn IdGenerator>,
}

impl SubscriptionStore {
    pub fn new(db_pool: PgPool, fields: Arc<dyn FieldRegistry>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            db_pool,
            fields,
            segments: Arc::new(NoSegments),
            ids,
        }
    }

    pub fn with_segment_compiler(mut self, segments: Arc<dyn SegmentCompiler>) -> Self {
        self.segments = segments;
        self
    }

    /// Creates the subscriber table of a list, if it does not exist yet.
    #[tracing::instrument(name = "Create a list subscriber table", skip(self))]
    pub async fn create_table(&self, list: ListId) -> StoreResult<()> {
        let table = list.table_name();

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                cid TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                opt_in_ip TEXT,
                opt_in_country TEXT,
                imported INTEGER,
                status SMALLINT NOT NULL DEFAULT 1,
                status_change TIMESTAMPTZ,
                first_name TEXT,
                last_name TEXT,
                created TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ))
        .execute(&self.db_pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_status_idx ON {table} (status)"
        ))
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Inserts a new subscriber or updates the one matching the email or the cid.
    ///
    /// Returns the id of the row. The list counter is adjusted in the same transaction when
    /// the resolved status crosses the `Subscribed` boundary.
    #[tracing::instrument(
        name = "Upsert a subscription",
        skip(self, meta, subscription),
        fields(email = ?meta.email, cid = ?meta.cid)
    )]
    pub async fn upsert(
        &self,
        list: ListId,
        meta: SubscriptionMeta,
        subscription: &Map<String, Value>,
    ) -> StoreResult<i32> {
        let mut meta = meta;
        meta.email = meta
            .email
            .or_else(|| subscription.get("email").and_then(Value::as_str).map(String::from))
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());

        let email = meta
            .email
            .clone()
            .ok_or_else(|| StoreError::Validation(String::from("Missing email address")))?;
        let cid = meta
            .cid
            .clone()
            .filter(|cid| !cid.trim().is_empty())
            .unwrap_or_else(|| self.ids.new_id());
        if let Some(status) = meta.status {
            SubscriptionStatus::parse(status.as_i16()).map_err(StoreError::Validation)?;
        }

        let schema = self.fields.list_fields(list).await?;

        let mut attempt = 1;
        loop {
            let result = self
                .try_upsert(list, &meta, &email, &cid, &schema, subscription)
                .await;

            match result {
                Err(err) if err.is_unique_violation() && attempt < UPSERT_ATTEMPTS => {
                    tracing::warn!(
                        "Concurrent insert of {} into list {}, retrying: {:?}",
                        email,
                        list,
                        err
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_upsert(
        &self,
        list: ListId,
        meta: &SubscriptionMeta,
        email: &str,
        cid: &str,
        schema: &[FieldDescriptor],
        subscription: &Map<String, Value>,
    ) -> StoreResult<i32> {
        let table = list.table_name();
        let mut transaction = self.db_pool.begin().await?;

        let existing: Option<(i32, i16)> = sqlx::query_as(&format!(
            "SELECT id, status FROM {} WHERE email = $1 OR cid = $2 LIMIT 1 FOR UPDATE",
            table
        ))
        .bind(email)
        .bind(cid)
        .fetch_optional(&mut transaction)
        .await?;

        let previous = existing.map(|(_, status)| SubscriptionStatus::from(status));
        let status = meta
            .status
            .or(previous)
            .unwrap_or(SubscriptionStatus::Subscribed);
        let status_changed = previous != Some(status);

        let mut columns = map_row(
            schema,
            subscription,
            MapOptions {
                for_insert: existing.is_none(),
                for_update: existing.is_some(),
                allow_email: false,
            },
        );

        if status_changed {
            columns.push(column("status", FieldValue::Integer(status.as_i16().into())));
            columns.push(column("status_change", FieldValue::Timestamp(Utc::now())));
        }

        let id = match existing {
            None => {
                let mut system_columns = vec![
                    column("email", FieldValue::Text(email.to_string())),
                    column("cid", FieldValue::Text(cid.to_string())),
                    column("opt_in_ip", optional_text(&meta.opt_in_ip)),
                    column("opt_in_country", optional_text(&meta.opt_in_country)),
                    column(
                        "imported",
                        meta.imported
                            .map_or(FieldValue::Null, |import| FieldValue::Integer(import.into())),
                    ),
                ];
                system_columns.append(&mut columns);

                let mut builder = insert_builder(&table, system_columns);
                builder
                    .build()
                    .fetch_one(&mut transaction)
                    .await?
                    .try_get::<i32, _>("id")?
            }
            Some((id, _)) => {
                if !columns.is_empty() {
                    let mut builder = update_builder(&table, columns);
                    builder.push(" WHERE id = ");
                    builder.push_bind(id);
                    builder.build().execute(&mut transaction).await?;
                }
                id
            }
        };

        if let Some(delta) = counter_delta(previous, status) {
            adjust_subscribers_counter(&mut transaction, list, delta).await?;
        }

        transaction.commit().await?;

        Ok(id)
    }

    /// A page of subscribers ordered by email, with the total number of rows of the list.
    #[tracing::instrument(name = "List subscribers", skip(self))]
    pub async fn list(&self, list: ListId, offset: i64, limit: i64) -> StoreResult<SubscriberPage> {
        let table = list.table_name();

        let rows: Vec<Subscriber> = sqlx::query_as(&format!(
            "SELECT * FROM {} ORDER BY email LIMIT $1 OFFSET $2",
            table
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.db_pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.db_pool)
            .await?;

        Ok(SubscriberPage { rows, total })
    }

    /// Pages through the subscribers of a list, optionally scoped to a segment and narrowed
    /// by a free text search over email and names.
    ///
    /// `columns` maps the column indexes of `request.order` to column names.
    #[tracing::instrument(name = "Filter subscribers", skip(self, columns))]
    pub async fn filter(
        &self,
        list: ListId,
        request: &FilterRequest,
        columns: &[&str],
        segment_id: Option<i32>,
    ) -> StoreResult<FilteredSubscribers> {
        let table = list.table_name();
        let schema = self.fields.list_fields(list).await?;

        let segment = match segment_id.filter(|id| *id > 0) {
            Some(segment_id) => {
                let segment = self.segments.compile(list, segment_id).await?;
                if segment.is_none() {
                    tracing::warn!("Segment {} of list {} is unknown", segment_id, list);
                }
                segment
            }
            None => None,
        };
        let search = request
            .search
            .as_deref()
            .filter(|term| !term.is_empty())
            .map(like_pattern);

        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", table));
        push_conditions(&mut count, segment.as_ref(), None)?;
        let total: i64 = count.build().fetch_one(&self.db_pool).await?.try_get(0)?;

        let filtered: i64 = match &search {
            Some(_) => {
                let mut count =
                    QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", table));
                push_conditions(&mut count, segment.as_ref(), search.as_deref())?;
                count.build().fetch_one(&self.db_pool).await?.try_get(0)?
            }
            None => total,
        };

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {}", table));
        push_conditions(&mut query, segment.as_ref(), search.as_deref())?;
        query.push(" ORDER BY ");
        query.push(order_clause(&request.order, columns, &table_columns(&schema)));
        query.push(" LIMIT ");
        query.push_bind(if request.length > 0 {
            request.length
        } else {
            DEFAULT_PAGE_LENGTH
        });
        query.push(" OFFSET ");
        query.push_bind(request.start.max(0));

        let rows = query
            .build_query_as::<Subscriber>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(FilteredSubscribers {
            rows,
            total,
            filtered,
        })
    }

    #[tracing::instrument(name = "Get a subscriber", skip(self))]
    pub async fn get(&self, list: ListId, cid: &str) -> StoreResult<Option<Subscriber>> {
        let cid = required_cid(cid)?;

        let subscriber = sqlx::query_as(&format!(
            "SELECT * FROM {} WHERE cid = $1",
            list.table_name()
        ))
        .bind(cid)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(subscriber)
    }

    /// Patches the name and custom fields of a subscriber, and its email when
    /// `allow_email` is set. Returns the number of updated rows.
    #[tracing::instrument(name = "Update a subscriber", skip(self, updates))]
    pub async fn update(
        &self,
        list: ListId,
        cid: &str,
        updates: &Map<String, Value>,
        allow_email: bool,
    ) -> StoreResult<u64> {
        let cid = required_cid(cid)?;
        let schema = self.fields.list_fields(list).await?;

        let columns = map_row(
            &schema,
            updates,
            MapOptions {
                for_insert: false,
                for_update: true,
                allow_email,
            },
        );

        if columns.is_empty() {
            return Ok(0);
        }

        let mut builder = update_builder(&list.table_name(), columns);
        builder.push(" WHERE cid = ");
        builder.push_bind(cid.to_string());

        let result = builder.build().execute(&self.db_pool).await?;

        Ok(result.rows_affected())
    }

    /// Removes a subscriber and returns its email, so the caller can notify the address.
    #[tracing::instrument(name = "Delete a subscriber", skip(self))]
    pub async fn delete(&self, list: ListId, cid: &str) -> StoreResult<Option<String>> {
        let cid = required_cid(cid)?;
        let mut transaction = self.db_pool.begin().await?;

        let deleted: Option<(String, i16)> = sqlx::query_as(&format!(
            "DELETE FROM {} WHERE cid = $1 RETURNING email, status",
            list.table_name()
        ))
        .bind(cid)
        .fetch_optional(&mut transaction)
        .await?;

        let (email, status) = match deleted {
            Some(deleted) => deleted,
            None => {
                transaction.rollback().await?;
                return Ok(None);
            }
        };

        if SubscriptionStatus::from(status).is_subscribed() {
            adjust_subscribers_counter(&mut transaction, list, CounterDelta::Decrement).await?;
        }

        transaction.commit().await?;

        Ok(Some(email))
    }
}

fn column(name: &str, value: FieldValue) -> MappedColumn {
    MappedColumn {
        column: name.to_string(),
        value,
    }
}

fn optional_text(value: &Option<String>) -> FieldValue {
    value
        .clone()
        .map_or(FieldValue::Null, FieldValue::Text)
}

fn required_cid(cid: &str) -> StoreResult<&str> {
    let cid = cid.trim();

    if cid.is_empty() {
        return Err(StoreError::Validation(String::from("Missing subscription ID")));
    }

    Ok(cid)
}

fn insert_builder(table: &str, columns: Vec<MappedColumn>) -> QueryBuilder<'static, Postgres> {
    let names = columns
        .iter()
        .map(|mapped| quote_identifier(&mapped.column))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!("INSERT INTO {} ({}) VALUES (", table, names));
    for (index, mapped) in columns.into_iter().enumerate() {
        if index > 0 {
            builder.push(", ");
        }
        push_value(&mut builder, mapped.value);
    }
    builder.push(") RETURNING id");

    builder
}

fn update_builder(table: &str, columns: Vec<MappedColumn>) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("UPDATE {} SET ", table));

    for (index, mapped) in columns.into_iter().enumerate() {
        if index > 0 {
            builder.push(", ");
        }
        builder.push(quote_identifier(&mapped.column));
        builder.push(" = ");
        push_value(&mut builder, mapped.value);
    }

    builder
}

fn push_conditions(
    builder: &mut QueryBuilder<'_, Postgres>,
    segment: Option<&SegmentQuery>,
    search: Option<&str>,
) -> StoreResult<()> {
    let mut has_condition = false;

    if let Some(pattern) = search {
        builder.push(" WHERE (");
        for (index, column) in ["email", "first_name", "last_name"].iter().enumerate() {
            if index > 0 {
                builder.push(" OR ");
            }
            builder.push(format!("{} ILIKE ", column));
            builder.push_bind(pattern.to_string());
            builder.push(r" ESCAPE '\'");
        }
        builder.push(")");
        has_condition = true;
    }

    if let Some(segment) = segment {
        builder.push(if has_condition { " AND " } else { " WHERE " });
        push_segment(builder, segment)?;
    }

    Ok(())
}

/// Columns of a list's subscriber table: the base columns plus its custom fields.
fn table_columns(schema: &[FieldDescriptor]) -> Vec<&str> {
    BASE_COLUMNS
        .iter()
        .copied()
        .chain(schema.iter().map(|field| field.key.as_str()))
        .collect()
}

/// Resolves the requested ordering against the caller's columns, falling back to email.
///
/// Names that are not in `known` are skipped.
pub fn order_clause(order: &[ColumnOrder], columns: &[&str], known: &[&str]) -> String {
    let ordering: Vec<String> = order
        .iter()
        .filter_map(|order| {
            columns
                .get(order.column)
                .filter(|name| is_valid_column_name(name) && known.contains(*name))
                .map(|name| format!("{} {}", quote_identifier(name), order.direction.as_sql()))
        })
        .collect();

    if ordering.is_empty() {
        return String::from("\"email\" ASC");
    }

    ordering.join(", ")
}
