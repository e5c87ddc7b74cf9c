//! Maps loosely shaped input records onto the columns of a list's subscriber table.
//!
//! Only the custom fields declared for the list and a small allow-list of name fields are
//! kept. Everything else is dropped without error, so callers can pass whole form bodies or
//! import rows.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::domain::custom_field::{FieldDescriptor, FieldValue, StorageType};

const NAME_COLUMNS: [&str; 2] = ["first_name", "last_name"];

#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions {
    /// Boolean fields missing from the input are written as `false`.
    pub for_insert: bool,
    /// Fields missing from the input are left untouched instead of being cleared.
    pub for_update: bool,
    pub allow_email: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedColumn {
    pub column: String,
    pub value: FieldValue,
}

impl MappedColumn {
    fn new(column: impl Into<String>, value: FieldValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

pub fn map_row(
    schema: &[FieldDescriptor],
    input: &Map<String, Value>,
    options: MapOptions,
) -> Vec<MappedColumn> {
    let input = normalize_keys(input);
    let mut columns = Vec::new();

    if options.allow_email {
        if let Some(value) = input.get("email") {
            columns.push(MappedColumn::new(
                "email",
                FieldValue::coerce(value, StorageType::Text),
            ));
        }
    }

    for name_column in NAME_COLUMNS {
        if let Some(value) = input.get(name_column) {
            columns.push(MappedColumn::new(
                name_column,
                FieldValue::coerce(value, StorageType::Text),
            ));
        }
    }

    let mut seen = HashSet::new();
    for field in schema {
        // A custom field can never shadow a system column
        if is_reserved(&field.key) || !seen.insert(field.key.as_str()) {
            continue;
        }

        match input.get(&field.key) {
            Some(value) => columns.push(MappedColumn::new(
                field.key.clone(),
                FieldValue::coerce(value, field.storage),
            )),
            None if field.storage == StorageType::Boolean && options.for_insert => {
                columns.push(MappedColumn::new(field.key.clone(), FieldValue::Boolean(false)))
            }
            None if options.for_update || field.storage == StorageType::Boolean => {}
            None if !options.for_insert => {
                columns.push(MappedColumn::new(field.key.clone(), FieldValue::Null))
            }
            None => {}
        }
    }

    columns
}

/// Converts camelCase keys into their snake_case column form (`firstName` -> `first_name`).
pub fn to_db_key(key: &str) -> String {
    let mut db_key = String::with_capacity(key.len() + 4);

    for char in key.trim().chars() {
        if char.is_ascii_uppercase() {
            if !db_key.is_empty() && !db_key.ends_with('_') {
                db_key.push('_');
            }
            db_key.push(char.to_ascii_lowercase());
        } else if char == '-' || char == ' ' {
            db_key.push('_');
        } else {
            db_key.push(char);
        }
    }

    db_key
}

fn normalize_keys(input: &Map<String, Value>) -> Map<String, Value> {
    input
        .iter()
        .map(|(key, value)| (to_db_key(key), value.clone()))
        .collect()
}

fn is_reserved(column: &str) -> bool {
    crate::domain::subscriber::BASE_COLUMNS.contains(&column)
}
