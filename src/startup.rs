use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::sync::Arc;

use crate::collaborators::{NoGeoLookup, PgFieldRegistry, ShortIdGenerator};
use crate::config::{DatabaseSettings, Settings};
use crate::confirmations::ConfirmationFlow;
use crate::email_client::EmailClient;
use crate::error::{StoreError, StoreResult};
use crate::imports::ImportJobs;
use crate::passwords::PasswordService;
use crate::status_ledger::StatusLedger;
use crate::subscriptions::SubscriptionStore;
use crate::users::UserAccounts;

/// Every store, wired to one connection pool.
#[derive(Clone)]
pub struct Application {
    pub db_pool: PgPool,
    pub subscriptions: SubscriptionStore,
    pub status_ledger: StatusLedger,
    pub confirmations: ConfirmationFlow,
    pub imports: ImportJobs,
    pub users: UserAccounts,
}

impl Application {
    pub fn build(config: Settings) -> StoreResult<Self> {
        let db_pool = get_connection_db_pool(&config.database);
        let sender_email = config
            .get_email_client_sender()
            .map_err(StoreError::Validation)?;
        let email_client = EmailClient::new(
            config.get_email_client_base_url(),
            sender_email,
            config.get_email_client_api(),
            Some(config.get_email_client_timeout()),
        )
        .map_err(|err| StoreError::Validation(format!("Invalid email client: {}", err)))?;

        let ids = Arc::new(ShortIdGenerator);
        let subscriptions = SubscriptionStore::new(
            db_pool.clone(),
            Arc::new(PgFieldRegistry::new(db_pool.clone())),
            ids.clone(),
        );
        let confirmations = ConfirmationFlow::new(
            db_pool.clone(),
            subscriptions.clone(),
            Arc::new(NoGeoLookup),
            ids,
        );
        let users = UserAccounts::new(
            db_pool.clone(),
            PasswordService::new()?,
            Arc::new(email_client),
            config.get_service_url(),
        );

        Ok(Self {
            status_ledger: StatusLedger::new(db_pool.clone()),
            imports: ImportJobs::new(db_pool.clone()),
            db_pool,
            subscriptions,
            confirmations,
            users,
        })
    }
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
