/// Status of a row in a list's subscriber table, stored as a SMALLINT.
///
/// Only `Subscribed` counts towards `lists.subscribers`. Any other positive value is
/// carried through untouched as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(into = "i16")]
pub enum SubscriptionStatus {
    Subscribed,
    Unsubscribed,
    Other(i16),
}

impl SubscriptionStatus {
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscriptionStatus::Subscribed)
    }

    pub fn is_unsubscribed(&self) -> bool {
        matches!(self, SubscriptionStatus::Unsubscribed)
    }

    pub fn parse(status: i16) -> Result<SubscriptionStatus, String> {
        if status < 1 {
            return Err(format!("{} is not a valid subscription status", status));
        }

        Ok(Self::from(status))
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            SubscriptionStatus::Subscribed => 1,
            SubscriptionStatus::Unsubscribed => 2,
            SubscriptionStatus::Other(status) => *status,
        }
    }
}

impl From<i16> for SubscriptionStatus {
    fn from(status: i16) -> Self {
        match status {
            1 => SubscriptionStatus::Subscribed,
            2 => SubscriptionStatus::Unsubscribed,
            other => SubscriptionStatus::Other(other),
        }
    }
}

impl From<SubscriptionStatus> for i16 {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_i16()
    }
}
