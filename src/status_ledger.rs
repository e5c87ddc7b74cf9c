//! Subscription status transitions.
//!
//! `lists.subscribers` is a denormalized count of the rows with status `Subscribed`. Every
//! write that changes a status also adjusts that counter, inside the transaction that holds
//! the row lock, so the counter can never drift from the rows.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::list_id::ListId;
use crate::domain::subscription_status::SubscriptionStatus;
use crate::error::{StoreError, StoreResult};

/// Change applied to `lists.subscribers` by a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDelta {
    Increment,
    Decrement,
}

impl CounterDelta {
    pub fn as_i32(&self) -> i32 {
        match self {
            CounterDelta::Increment => 1,
            CounterDelta::Decrement => -1,
        }
    }
}

/// Only transitions entering or leaving `Subscribed` move the counter. A brand new row has no
/// previous status, so it can only ever increment.
pub fn counter_delta(
    previous: Option<SubscriptionStatus>,
    next: SubscriptionStatus,
) -> Option<CounterDelta> {
    match previous {
        Some(previous) if previous == next => None,
        Some(previous) if previous.is_subscribed() => Some(CounterDelta::Decrement),
        _ if next.is_subscribed() => Some(CounterDelta::Increment),
        _ => None,
    }
}

#[tracing::instrument(name = "Adjust list subscribers counter", skip(transaction))]
pub async fn adjust_subscribers_counter(
    transaction: &mut Transaction<'_, Postgres>,
    list: ListId,
    delta: CounterDelta,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE lists SET subscribers = subscribers + $1 WHERE id = $2")
        .bind(delta.as_i32())
        .bind(list.as_i32())
        .execute(transaction)
        .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct StatusLedger {
    db_pool: PgPool,
}

impl StatusLedger {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Moves a subscriber to `status`.
    ///
    /// Returns `false` when the subscriber does not exist. Applying the current status again
    /// is a no-op that returns `true` without touching the row or any counter.
    #[tracing::instrument(name = "Change subscription status", skip(self))]
    pub async fn change_status(
        &self,
        list: ListId,
        subscriber_id: i32,
        campaign: Option<&str>,
        status: SubscriptionStatus,
    ) -> StoreResult<bool> {
        let status = SubscriptionStatus::parse(status.as_i16()).map_err(StoreError::Validation)?;
        let campaign = campaign.map(str::trim).filter(|cid| !cid.is_empty());
        let mut transaction = self.db_pool.begin().await?;

        let current: Option<i16> = sqlx::query_scalar(&format!(
            "SELECT status FROM {} WHERE id = $1 FOR UPDATE",
            list.table_name()
        ))
        .bind(subscriber_id)
        .fetch_optional(&mut transaction)
        .await?;

        let current = match current {
            Some(current) => SubscriptionStatus::from(current),
            None => {
                transaction.rollback().await?;
                return Ok(false);
            }
        };

        if current == status {
            transaction.rollback().await?;
            return Ok(true);
        }

        sqlx::query(&format!(
            "UPDATE {} SET status = $1, status_change = $2 WHERE id = $3",
            list.table_name()
        ))
        .bind(status.as_i16())
        .bind(Utc::now())
        .bind(subscriber_id)
        .execute(&mut transaction)
        .await?;

        if let Some(delta) = counter_delta(Some(current), status) {
            adjust_subscribers_counter(&mut transaction, list, delta).await?;

            if let Some(campaign) = campaign {
                sqlx::query("UPDATE campaigns SET unsubscribed = unsubscribed + 1 WHERE cid = $1")
                    .bind(campaign)
                    .execute(&mut transaction)
                    .await?;
            }
        }

        transaction.commit().await?;

        tracing::info!(
            "Subscriber {} of list {} moved from {} to {}",
            subscriber_id,
            list,
            current.as_i16(),
            status.as_i16()
        );

        Ok(true)
    }

    /// Unsubscribes an active subscriber. Returns `false` when there is no active
    /// subscription for `email`.
    #[tracing::instrument(name = "Unsubscribe an email address", skip(self))]
    pub async fn unsubscribe(
        &self,
        list: ListId,
        email: &str,
        campaign: Option<&str>,
    ) -> StoreResult<bool> {
        let email = email.trim();

        if email.is_empty() {
            return Err(StoreError::Validation(String::from("Missing email address")));
        }

        let subscription: Option<(i32, i16)> = sqlx::query_as(&format!(
            "SELECT id, status FROM {} WHERE email = $1",
            list.table_name()
        ))
        .bind(email)
        .fetch_optional(&self.db_pool)
        .await?;

        match subscription {
            Some((id, status)) if SubscriptionStatus::from(status).is_subscribed() => {
                self.change_status(list, id, campaign, SubscriptionStatus::Unsubscribed)
                    .await
            }
            _ => Ok(false),
        }
    }
}
