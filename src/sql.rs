use sqlx::{Postgres, QueryBuilder};

use crate::collaborators::SegmentQuery;
use crate::domain::custom_field::FieldValue;
use crate::error::{StoreError, StoreResult};

/// Binds a dynamically typed value. NULL is written inline so Postgres infers the column type.
pub fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: FieldValue) {
    match value {
        FieldValue::Null => builder.push("NULL"),
        FieldValue::Text(text) => builder.push_bind(text),
        FieldValue::Integer(number) => builder.push_bind(number),
        FieldValue::Number(number) => builder.push_bind(number),
        FieldValue::Boolean(flag) => builder.push_bind(flag),
        FieldValue::Date(date) => builder.push_bind(date),
        FieldValue::Timestamp(timestamp) => builder.push_bind(timestamp),
    };
}

/// Appends a segment predicate, replacing each `?` placeholder with the next bound parameter.
///
/// The number of placeholders must match the number of parameters.
pub fn push_segment(
    builder: &mut QueryBuilder<'_, Postgres>,
    segment: &SegmentQuery,
) -> StoreResult<()> {
    let parts = split_placeholders(&segment.where_fragment);

    if parts.len() - 1 != segment.params.len() {
        return Err(StoreError::Validation(format!(
            "Segment has {} placeholders but {} parameters",
            parts.len() - 1,
            segment.params.len()
        )));
    }

    builder.push("(");
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            push_value(builder, segment.params[index - 1].clone());
        }
        builder.push(*part);
    }
    builder.push(")");

    Ok(())
}

pub fn split_placeholders(fragment: &str) -> Vec<&str> {
    fragment.split('?').collect()
}

/// Turns a free text search into a substring pattern for `LIKE ... ESCAPE '\'`.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");

    format!("%{}%", escaped)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}
