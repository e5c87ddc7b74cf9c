use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

/// Storage type of a column in a list's subscriber table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Text,
    Number,
    Boolean,
    Date,
    Timestamp,
}

impl StorageType {
    /// Resolves the type names used by the field registry. Unknown names are stored as text.
    pub fn from_field_type(field_type: &str) -> StorageType {
        match field_type.trim().to_lowercase().as_str() {
            "number" => StorageType::Number,
            "checkbox" | "option" | "boolean" => StorageType::Boolean,
            "date" | "date-us" | "date-eu" | "birthday" | "birthday-us" | "birthday-eu" => {
                StorageType::Date
            }
            "timestamp" | "datetime" => StorageType::Timestamp,
            _ => StorageType::Text,
        }
    }
}

/// A custom field declared for a list. `key` is the column name in the subscriber table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub key: String,
    pub name: String,
    pub storage: StorageType,
}

impl FieldDescriptor {
    pub fn parse(key: String, name: String, storage: StorageType) -> Result<Self, String> {
        if !is_valid_column_name(&key) {
            return Err(format!("{} is not a valid column name", key));
        }

        Ok(Self { key, name, storage })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Coerces an arbitrary JSON input into the declared storage type.
    ///
    /// Values that cannot be represented become `Null`.
    pub fn coerce(value: &serde_json::Value, storage: StorageType) -> FieldValue {
        use serde_json::Value;

        match (storage, value) {
            (_, Value::Null) => FieldValue::Null,
            (StorageType::Text, Value::String(text)) => FieldValue::Text(text.clone()),
            (StorageType::Text, other) => FieldValue::Text(other.to_string()),
            (_, Value::String(text)) if text.trim().is_empty() => FieldValue::Null,
            (StorageType::Number, Value::Number(number)) => number
                .as_i64()
                .map(FieldValue::Integer)
                .or_else(|| number.as_f64().map(FieldValue::Number))
                .unwrap_or(FieldValue::Null),
            (StorageType::Number, Value::String(text)) => {
                let text = text.trim();
                text.parse::<i64>()
                    .map(FieldValue::Integer)
                    .or_else(|_| text.parse::<f64>().map(FieldValue::Number))
                    .unwrap_or(FieldValue::Null)
            }
            (StorageType::Boolean, Value::Bool(flag)) => FieldValue::Boolean(*flag),
            (StorageType::Boolean, Value::Number(number)) => {
                FieldValue::Boolean(number.as_f64().map_or(false, |n| n != 0.0))
            }
            (StorageType::Boolean, Value::String(text)) => {
                match text.trim().to_lowercase().as_str() {
                    "1" | "true" | "on" | "yes" => FieldValue::Boolean(true),
                    "0" | "false" | "off" | "no" => FieldValue::Boolean(false),
                    _ => FieldValue::Null,
                }
            }
            (StorageType::Date, Value::String(text)) => {
                NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                    .map(FieldValue::Date)
                    .unwrap_or(FieldValue::Null)
            }
            (StorageType::Timestamp, Value::String(text)) => {
                DateTime::parse_from_rfc3339(text.trim())
                    .map(|timestamp| FieldValue::Timestamp(timestamp.with_timezone(&Utc)))
                    .unwrap_or(FieldValue::Null)
            }
            _ => FieldValue::Null,
        }
    }

    /// Decodes a column of a subscriber row whose type is only known at runtime.
    pub fn decode(row: &PgRow, index: usize) -> Result<FieldValue, sqlx::Error> {
        let type_name = row.column(index).type_info().name().to_string();

        let value = match type_name.as_str() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)?
                .map(FieldValue::Boolean),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(|n| FieldValue::Integer(n.into())),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(|n| FieldValue::Integer(n.into())),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)?
                .map(FieldValue::Integer),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)?
                .map(|n| FieldValue::Number(n.into())),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)?
                .map(FieldValue::Number),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)?
                .map(FieldValue::Date),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(FieldValue::Timestamp),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(index)?
                .map(FieldValue::Text),
            other => {
                tracing::warn!(
                    "Column {} has unsupported type {}",
                    row.column(index).name(),
                    other
                );
                None
            }
        };

        Ok(value.unwrap_or(FieldValue::Null))
    }
}

/// Column names are spliced into SQL, so only lowercase ASCII identifiers are accepted.
pub fn is_valid_column_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }

    name.len() <= 63
        && chars.all(|char| char.is_ascii_lowercase() || char.is_ascii_digit() || char == '_')
}
