//! Seams to the services this crate consumes but does not own: the custom field registry,
//! the segment compiler, geo-IP lookup and public id generation.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::PgPool;

use crate::domain::custom_field::{FieldDescriptor, FieldValue, StorageType};
use crate::domain::list_id::ListId;
use crate::error::StoreResult;

const SHORT_ID_LENGTH: usize = 10;

#[async_trait::async_trait]
pub trait FieldRegistry: Send + Sync {
    async fn list_fields(&self, list: ListId) -> StoreResult<Vec<FieldDescriptor>>;
}

/// Reads the custom field definitions of a list from the `custom_fields` table.
#[derive(Debug, Clone)]
pub struct PgFieldRegistry {
    db_pool: PgPool,
}

impl PgFieldRegistry {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl FieldRegistry for PgFieldRegistry {
    #[tracing::instrument(name = "Fetch custom fields of a list", skip(self))]
    async fn list_fields(&self, list: ListId) -> StoreResult<Vec<FieldDescriptor>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT column_name, name, type
            FROM custom_fields
            WHERE list = $1
            ORDER BY id
            "#,
        )
        .bind(list.as_i32())
        .fetch_all(&self.db_pool)
        .await?;

        let fields = rows
            .into_iter()
            .filter_map(|(column, name, field_type)| {
                FieldDescriptor::parse(column, name, StorageType::from_field_type(&field_type))
                    .map_err(|err| tracing::warn!("Skipping custom field: {}", err))
                    .ok()
            })
            .collect();

        Ok(fields)
    }
}

/// A precompiled subscriber predicate. Placeholders in `where_fragment` are written as `?`
/// and are bound, in order, to `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentQuery {
    pub where_fragment: String,
    pub params: Vec<FieldValue>,
}

#[async_trait::async_trait]
pub trait SegmentCompiler: Send + Sync {
    async fn compile(&self, list: ListId, segment_id: i32) -> StoreResult<Option<SegmentQuery>>;
}

/// Compiler used when no segment support is wired in. Every segment is unknown.
#[derive(Debug, Clone, Default)]
pub struct NoSegments;

#[async_trait::async_trait]
impl SegmentCompiler for NoSegments {
    async fn compile(&self, _list: ListId, _segment_id: i32) -> StoreResult<Option<SegmentQuery>> {
        Ok(None)
    }
}

pub trait GeoLookup: Send + Sync {
    /// Country code of the address, if known. Must never fail.
    fn country_for_ip(&self, ip: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn country_for_ip(&self, _ip: &str) -> Option<String> {
        None
    }
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Short random alphanumeric ids, used as public subscriber and confirmation ids.
#[derive(Debug, Clone, Default)]
pub struct ShortIdGenerator;

impl IdGenerator for ShortIdGenerator {
    fn new_id(&self) -> String {
        generate_token(SHORT_ID_LENGTH)
    }
}

pub fn generate_token(length: usize) -> String {
    let mut rng = rand::thread_rng();

    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(length)
        .collect()
}
