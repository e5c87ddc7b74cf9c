use list_subscriptions::config::get_configuration;
use list_subscriptions::startup::get_connection_db_pool;
use list_subscriptions::telemetry::{get_subscriber, init_subscriber};

// Brings the database schema up to date. The stores are meant to be embedded by the
// services that own the mailing lists.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = get_subscriber(
        String::from("list_subscriptions"),
        String::from("info"),
        std::io::stdout,
    );

    init_subscriber(subscriber)?;

    let config = get_configuration()?;
    let db_pool = get_connection_db_pool(&config.database);

    sqlx::migrate!("./migrations").run(&db_pool).await?;

    tracing::info!("Database {} is up to date", config.get_db_name());

    Ok(())
}
