use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, FromRow, Row};
use std::collections::BTreeMap;

use crate::domain::custom_field::FieldValue;
use crate::domain::subscription_status::SubscriptionStatus;

/// Columns every subscriber table has. Anything else is a custom field.
pub const BASE_COLUMNS: [&str; 11] = [
    "id",
    "cid",
    "email",
    "opt_in_ip",
    "opt_in_country",
    "imported",
    "status",
    "status_change",
    "first_name",
    "last_name",
    "created",
];

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: i32,
    pub cid: String,
    pub email: String,
    pub status: SubscriptionStatus,
    pub status_change: Option<DateTime<Utc>>,
    pub opt_in_ip: Option<String>,
    pub opt_in_country: Option<String>,
    pub imported: Option<i32>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created: DateTime<Utc>,
    pub custom_fields: BTreeMap<String, FieldValue>,
}

impl<'r> FromRow<'r, PgRow> for Subscriber {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let mut custom_fields = BTreeMap::new();

        for column in row.columns() {
            if BASE_COLUMNS.contains(&column.name()) {
                continue;
            }
            custom_fields.insert(
                column.name().to_string(),
                FieldValue::decode(row, column.ordinal())?,
            );
        }

        Ok(Subscriber {
            id: row.try_get("id")?,
            cid: row.try_get("cid")?,
            email: row.try_get("email")?,
            status: SubscriptionStatus::from(row.try_get::<i16, _>("status")?),
            status_change: row.try_get("status_change")?,
            opt_in_ip: row.try_get("opt_in_ip")?,
            opt_in_country: row.try_get("opt_in_country")?,
            imported: row.try_get("imported")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            created: row.try_get("created")?,
            custom_fields,
        })
    }
}

/// System fields of a subscription, as opposed to the user supplied ones.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionMeta {
    pub email: Option<String>,
    pub cid: Option<String>,
    pub opt_in_ip: Option<String>,
    pub opt_in_country: Option<String>,
    pub imported: Option<i32>,
    pub status: Option<SubscriptionStatus>,
}

impl SubscriptionMeta {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }
}
