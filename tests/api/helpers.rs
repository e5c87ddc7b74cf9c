use sqlx::{migrate, Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;
use wiremock::MockServer;

use list_subscriptions::{
    config::{get_configuration, DatabaseSettings, Settings},
    domain::{list_id::ListId, subscriber::Subscriber},
    startup::{get_connection_db_pool, Application},
};

pub struct TestApp {
    pub config: Settings,
    pub app: Application,
    pub db_pool: PgPool,
    pub email_server: MockServer,
}

impl TestApp {
    pub async fn spawn_app() -> TestApp {
        let mut config = get_configuration().expect("Missing configuration file.");
        let db_test_name = format!("db_{}", Uuid::new_v4().to_string().replace('-', "_"));
        let email_server = MockServer::start().await;

        config.set_email_client_base_url(email_server.uri());
        config.set_service_url(String::from("http://127.0.0.1:3000"));

        let db_pool = configure_db(&mut config.database, db_test_name).await;

        let app = Application::build(config.clone()).expect("Failed to build application.");

        TestApp {
            config,
            app,
            db_pool,
            email_server,
        }
    }

    /// Inserts a list row and provisions its subscriber table.
    pub async fn create_list(&self) -> ListId {
        let id: i32 =
            sqlx::query_scalar("INSERT INTO lists (cid, name) VALUES ($1, $2) RETURNING id")
                .bind(Uuid::new_v4().to_string())
                .bind("Weekly digest")
                .fetch_one(&self.db_pool)
                .await
                .expect("Failed to create list.");
        let list = ListId::parse(id).unwrap();

        self.app
            .subscriptions
            .create_table(list)
            .await
            .expect("Failed to create subscriber table.");

        list
    }

    pub async fn create_campaign(&self, list: ListId) -> String {
        let cid = Uuid::new_v4().simple().to_string();

        sqlx::query("INSERT INTO campaigns (cid, name, list) VALUES ($1, $2, $3)")
            .bind(&cid)
            .bind("Spring sale")
            .bind(list.as_i32())
            .execute(&self.db_pool)
            .await
            .expect("Failed to create campaign.");

        cid
    }

    /// Declares a custom field and adds the matching column to the list's table.
    pub async fn add_custom_field(
        &self,
        list: ListId,
        column: &str,
        field_type: &str,
        sql_type: &str,
    ) {
        sqlx::query("INSERT INTO custom_fields (list, name, column_name, type) VALUES ($1, $2, $3, $4)")
            .bind(list.as_i32())
            .bind(column)
            .bind(column)
            .bind(field_type)
            .execute(&self.db_pool)
            .await
            .expect("Failed to declare custom field.");

        self.db_pool
            .execute(&*format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                list.table_name(),
                column,
                sql_type
            ))
            .await
            .expect("Failed to add custom column.");
    }

    pub async fn subscribers_counter(&self, list: ListId) -> i32 {
        sqlx::query_scalar("SELECT subscribers FROM lists WHERE id = $1")
            .bind(list.as_i32())
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to fetch list counter.")
    }

    /// Sets the counter of `list` to zero and forbids negative counters, so the next
    /// decrement fails inside its transaction.
    pub async fn freeze_counter_at_zero(&self, list: ListId) {
        sqlx::query(
            "ALTER TABLE lists ADD CONSTRAINT subscribers_not_negative CHECK (subscribers >= 0)",
        )
        .execute(&self.db_pool)
        .await
        .expect("Failed to add counter constraint.");

        sqlx::query("UPDATE lists SET subscribers = 0 WHERE id = $1")
            .bind(list.as_i32())
            .execute(&self.db_pool)
            .await
            .expect("Failed to reset list counter.");
    }

    /// Number of active subscribers, recomputed from the rows.
    pub async fn active_rows(&self, list: ListId) -> i64 {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE status = 1",
            list.table_name()
        ))
        .fetch_one(&self.db_pool)
        .await
        .expect("Failed to count active subscribers.")
    }

    pub async fn campaign_unsubscribed(&self, campaign: &str) -> i32 {
        sqlx::query_scalar("SELECT unsubscribed FROM campaigns WHERE cid = $1")
            .bind(campaign)
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to fetch campaign counter.")
    }

    pub async fn subscriber_by_email(&self, list: ListId, email: &str) -> Subscriber {
        sqlx::query_as(&format!(
            "SELECT * FROM {} WHERE email = $1",
            list.table_name()
        ))
        .bind(email)
        .fetch_one(&self.db_pool)
        .await
        .expect("Failed to fetch subscriber.")
    }
}

async fn configure_db(db_config: &mut DatabaseSettings, db_test_name: String) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect_with(&db_config.get_server_options())
        .await
        .expect("Failed to connect to Postgres.");

    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, db_test_name))
        .await
        .expect("Failed to create database.");

    connection
        .close()
        .await
        .expect("Failed to close connection.");

    // Execute migrations
    db_config.set_name(db_test_name);

    let db_pool = get_connection_db_pool(db_config);

    migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run migrations.");

    db_pool
}
