use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::collaborators::{GeoLookup, IdGenerator};
use crate::domain::email_address::EmailAddress;
use crate::domain::list_id::ListId;
use crate::domain::subscriber::SubscriptionMeta;
use crate::domain::subscription_status::SubscriptionStatus;
use crate::error::{StoreError, StoreResult};
use crate::subscriptions::SubscriptionStore;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConfirmedSubscription {
    pub list: ListId,
    pub email: String,
}

/// Double opt-in: a pending confirmation is stored until the subscriber follows the link
/// carrying its cid, at which point it becomes an active subscription.
#[derive(Clone)]
pub struct ConfirmationFlow {
    db_pool: PgPool,
    subscriptions: SubscriptionStore,
    geo: Arc<dyn GeoLookup>,
    ids: Arc<dyn IdGenerator>,
}

impl ConfirmationFlow {
    pub fn new(
        db_pool: PgPool,
        subscriptions: SubscriptionStore,
        geo: Arc<dyn GeoLookup>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            db_pool,
            subscriptions,
            geo,
            ids,
        }
    }

    #[tracing::instrument(name = "Store a pending confirmation", skip(self, payload))]
    pub async fn add_confirmation(
        &self,
        list: ListId,
        email: &str,
        payload: &Map<String, Value>,
    ) -> StoreResult<String> {
        let email = EmailAddress::parse(email.to_string())
            .map_err(|_| StoreError::InvalidEmail(email.to_string()))?;
        let cid = self.ids.new_id();
        let data = serde_json::to_string(payload)?;

        sqlx::query("INSERT INTO confirmations (cid, list, email, data) VALUES ($1, $2, $3, $4)")
            .bind(&cid)
            .bind(list.as_i32())
            .bind(email.as_ref())
            .bind(data)
            .execute(&self.db_pool)
            .await
            .map_err(|err| {
                tracing::error!("Failed to store confirmation: {:?}", err);
                err
            })?;

        Ok(cid)
    }

    /// Redeems a confirmation. Returns `None` when the cid is unknown or already used.
    #[tracing::instrument(name = "Confirm a subscription", skip(self))]
    pub async fn confirm(
        &self,
        cid: &str,
        opt_in_ip: Option<&str>,
    ) -> StoreResult<Option<ConfirmedSubscription>> {
        let cid = cid.trim();

        let pending: Option<(i32, String, String)> =
            sqlx::query_as("SELECT list, email, data FROM confirmations WHERE cid = $1")
                .bind(cid)
                .fetch_optional(&self.db_pool)
                .await?;

        let (list, email, data) = match pending {
            Some(pending) => pending,
            None => return Ok(None),
        };

        let list = ListId::parse(list).map_err(StoreError::Validation)?;
        let subscription = decode_payload(&data);
        let opt_in_country = opt_in_ip.and_then(|ip| self.geo.country_for_ip(ip));

        self.subscriptions
            .upsert(
                list,
                SubscriptionMeta {
                    email: Some(email.clone()),
                    cid: Some(cid.to_string()),
                    opt_in_ip: opt_in_ip.map(String::from),
                    opt_in_country,
                    imported: None,
                    status: Some(SubscriptionStatus::Subscribed),
                },
                &subscription,
            )
            .await?;

        // The subscriber exists now, so a leftover confirmation must not fail the call
        if let Err(err) = sqlx::query("DELETE FROM confirmations WHERE cid = $1")
            .bind(cid)
            .execute(&self.db_pool)
            .await
        {
            tracing::warn!("Failed to remove confirmation {}: {:?}", cid, err);
        }

        Ok(Some(ConfirmedSubscription { list, email }))
    }
}

fn decode_payload(data: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(payload)) => payload,
        _ => Map::new(),
    }
}
