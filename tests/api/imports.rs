use chrono::Utc;
use serde_json::json;

use list_subscriptions::imports::{ImportMapping, ImportUpdate, NewImport};

use crate::helpers::TestApp;

fn csv_import(import_type: i16) -> NewImport {
    NewImport {
        import_type,
        path: String::from("/uploads/subscribers.csv"),
        size: 2048,
        delimiter: String::from(";"),
        mapping: ImportMapping {
            columns: vec![json!("email"), json!("first_name")],
        },
    }
}

#[tokio::test]
async fn created_import_can_be_read_back() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let imports = &test_app.app.imports;

    let id = imports.create(list, csv_import(2)).await.unwrap();
    let job = imports.get(list, id).await.unwrap().unwrap();

    assert_eq!(job.list, list.as_i32());
    assert_eq!(job.import_type, 2);
    assert_eq!(job.path, "/uploads/subscribers.csv");
    assert_eq!(job.size, 2048);
    assert_eq!(job.delimiter, ";");
    assert_eq!(job.status, 0);
    assert_eq!(job.processed, 0);
    assert_eq!(job.mapping.columns.len(), 2);
    assert!(job.error.is_none());
    assert!(job.finished.is_none());
}

#[tokio::test]
async fn import_type_defaults_when_missing() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let imports = &test_app.app.imports;

    let id = imports.create(list, csv_import(0)).await.unwrap();
    let job = imports.get(list, id).await.unwrap().unwrap();

    assert_eq!(job.import_type, 1);
}

#[tokio::test]
async fn import_of_another_list_is_not_found() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let other_list = test_app.create_list().await;
    let imports = &test_app.app.imports;

    let id = imports.create(list, csv_import(1)).await.unwrap();

    assert!(imports.get(other_list, id).await.unwrap().is_none());
    assert!(imports.get(list, 0).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn malformed_stored_mapping_reads_as_empty() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let imports = &test_app.app.imports;
    let id = imports.create(list, csv_import(1)).await.unwrap();

    sqlx::query("UPDATE importer SET mapping = $1 WHERE id = $2")
        .bind("{not json")
        .bind(id)
        .execute(&test_app.db_pool)
        .await
        .unwrap();

    let job = imports.get(list, id).await.unwrap().unwrap();
    assert_eq!(job.mapping, ImportMapping::default());
}

#[tokio::test]
async fn update_only_touches_the_given_fields() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let imports = &test_app.app.imports;
    let id = imports.create(list, csv_import(1)).await.unwrap();
    let finished = Utc::now();

    let updated = imports
        .update(
            list,
            id,
            ImportUpdate {
                status: Some(3),
                processed: Some(120),
                error: Some(Some(String::from("Line 121 has no email"))),
                finished: Some(finished),
                ..ImportUpdate::default()
            },
        )
        .await
        .unwrap();

    let job = imports.get(list, id).await.unwrap().unwrap();
    assert_eq!(updated, 1);
    assert_eq!(job.status, 3);
    assert_eq!(job.processed, 120);
    assert_eq!(job.error.as_deref(), Some("Line 121 has no email"));
    assert!(job.finished.is_some());
    assert_eq!(job.path, "/uploads/subscribers.csv");
    assert_eq!(job.delimiter, ";");

    imports
        .update(
            list,
            id,
            ImportUpdate {
                error: Some(None),
                ..ImportUpdate::default()
            },
        )
        .await
        .unwrap();

    let job = imports.get(list, id).await.unwrap().unwrap();
    assert!(job.error.is_none());
    assert_eq!(job.processed, 120);
}

#[tokio::test]
async fn empty_update_changes_nothing() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let imports = &test_app.app.imports;
    let id = imports.create(list, csv_import(1)).await.unwrap();

    let updated = imports
        .update(list, id, ImportUpdate::default())
        .await
        .unwrap();

    assert_eq!(updated, 0);
}

#[tokio::test]
async fn active_imports_are_listed_newest_first() {
    let test_app = TestApp::spawn_app().await;
    let list = test_app.create_list().await;
    let imports = &test_app.app.imports;

    let idle = imports.create(list, csv_import(1)).await.unwrap();
    let first = imports.create(list, csv_import(1)).await.unwrap();
    let second = imports.create(list, csv_import(1)).await.unwrap();
    for id in [first, second] {
        imports
            .update(
                list,
                id,
                ImportUpdate {
                    status: Some(1),
                    ..ImportUpdate::default()
                },
            )
            .await
            .unwrap();
    }

    let active: Vec<i32> = imports
        .list_active(list)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();

    assert_eq!(active, vec![second, first]);
    assert!(!active.contains(&idle));
}
