use std::sync::Arc;

use reqwest::Url;
use secrecy::{ExposeSecret, Secret};
use sqlx::PgPool;

use crate::collaborators::generate_token;
use crate::domain::email_address::EmailAddress;
use crate::email_client::EmailClient;
use crate::error::{StoreError, StoreResult};
use crate::passwords::PasswordService;

const RESET_TOKEN_LENGTH: usize = 22;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub email: String,
    pub current_password: Option<Secret<String>>,
    pub password: Option<Secret<String>>,
    pub password2: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub username: String,
    pub reset_token: String,
    pub password: Secret<String>,
    pub password2: Secret<String>,
}

#[derive(Clone)]
pub struct UserAccounts {
    db_pool: PgPool,
    passwords: PasswordService,
    email_client: Arc<EmailClient>,
    service_url: String,
}

impl UserAccounts {
    pub fn new(
        db_pool: PgPool,
        passwords: PasswordService,
        email_client: Arc<EmailClient>,
        service_url: String,
    ) -> Self {
        Self {
            db_pool,
            passwords,
            email_client,
            service_url,
        }
    }

    #[tracing::instrument(name = "Get a user", skip(self))]
    pub async fn get(&self, id: i32) -> StoreResult<Option<User>> {
        let user = sqlx::query_as("SELECT id, username, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;

        Ok(user)
    }

    /// Creates an account. Used to seed the first administrator.
    #[tracing::instrument(name = "Create a user", skip(self, password))]
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password: &Secret<String>,
    ) -> StoreResult<i32> {
        let email = EmailAddress::parse(email.to_string())
            .map_err(|_| StoreError::InvalidEmail(email.to_string()))?;
        let hash = self.passwords.hash_password(password)?;

        let id = sqlx::query_scalar(
            "INSERT INTO users (username, email, password) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(username.trim())
        .bind(email.as_ref())
        .bind(hash)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(id)
    }

    /// Looks an account up by username or email and checks the password.
    ///
    /// An unknown account and a wrong password both yield `None`.
    #[tracing::instrument(name = "Authenticate a user", skip(self, password))]
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &Secret<String>,
    ) -> StoreResult<Option<AuthenticatedUser>> {
        let identifier = identifier.trim();

        let account: Option<(i32, String, String)> = sqlx::query_as(
            "SELECT id, username, password FROM users WHERE username = $1 OR email = $1 LIMIT 1",
        )
        .bind(identifier)
        .fetch_optional(&self.db_pool)
        .await?;

        let (id, username, hash) = match account {
            Some(account) => account,
            None => return Ok(None),
        };

        match self.passwords.verify_password(password, &hash) {
            Ok(true) => Ok(Some(AuthenticatedUser { id, username })),
            Ok(false) => Ok(None),
            Err(err) => {
                tracing::error!("Stored password hash of user {} is unreadable: {:?}", id, err);
                Ok(None)
            }
        }
    }

    /// Changes the email of an account and, optionally, its password.
    #[tracing::instrument(name = "Update a user account", skip(self, update))]
    pub async fn update_account(&self, id: i32, update: AccountUpdate) -> StoreResult<u64> {
        let email = EmailAddress::parse(update.email.clone())
            .map_err(|_| StoreError::InvalidEmail(update.email.clone()))?;

        let hash: Option<String> = sqlx::query_scalar("SELECT password FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        let hash =
            hash.ok_or_else(|| StoreError::Validation(String::from("Failed to check user data")))?;

        let new_hash = if password_change_requested(&update) {
            let verified = match &update.current_password {
                Some(current) => self.passwords.verify_password(current, &hash)?,
                None => false,
            };
            if !verified {
                return Err(StoreError::IncorrectPassword);
            }
            Some(self.passwords.hash_password(new_password(&update)?)?)
        } else {
            None
        };

        let result = sqlx::query(
            "UPDATE users SET email = $1, password = COALESCE($2, password) WHERE id = $3",
        )
        .bind(email.as_ref())
        .bind(new_hash)
        .bind(id)
        .execute(&self.db_pool)
        .await
        .map_err(|err| match StoreError::from(err) {
            err if err.is_unique_violation() => StoreError::DuplicateEmail,
            err => err,
        })?;

        Ok(result.rows_affected())
    }

    /// Issues a password reset token valid for one hour and mails the reset link.
    ///
    /// Returns `false` when no account matches. Mail delivery failures are only logged.
    #[tracing::instrument(name = "Send a password reset", skip(self))]
    pub async fn send_reset(&self, identifier: &str) -> StoreResult<bool> {
        let identifier = identifier.trim();

        if identifier.is_empty() {
            return Err(StoreError::Validation(String::from("Username must be set")));
        }

        let reset_token = generate_token(RESET_TOKEN_LENGTH);

        let account: Option<User> = sqlx::query_as(
            r#"
            UPDATE users
            SET reset_token = $1, reset_expire = NOW() + INTERVAL '1 hour'
            WHERE id = (SELECT id FROM users WHERE username = $2 OR email = $2 LIMIT 1)
            RETURNING id, username, email
            "#,
        )
        .bind(&reset_token)
        .bind(identifier)
        .fetch_optional(&self.db_pool)
        .await?;

        let account = match account {
            Some(account) => account,
            None => return Ok(false),
        };

        if let Err(err) = self.send_reset_email(&account, &reset_token).await {
            tracing::error!(
                "Failed to send a password reset email to {}: {}",
                account.email,
                err
            );
        }

        Ok(true)
    }

    #[tracing::instrument(name = "Check a password reset token", skip(self, reset_token))]
    pub async fn check_reset_token(&self, username: &str, reset_token: &str) -> StoreResult<bool> {
        if username.is_empty() || reset_token.is_empty() {
            return Err(StoreError::Validation(String::from(
                "Missing username or reset token",
            )));
        }

        let found: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM users WHERE username = $1 AND reset_token = $2 AND reset_expire > NOW()",
        )
        .bind(username)
        .bind(reset_token)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(found.is_some())
    }

    /// Sets a new password with a reset token. The token is consumed on success.
    #[tracing::instrument(name = "Reset a password", skip(self, reset), fields(username = %reset.username))]
    pub async fn reset_password(&self, reset: PasswordReset) -> StoreResult<bool> {
        if reset.username.is_empty() || reset.reset_token.is_empty() {
            return Err(StoreError::Validation(String::from(
                "Missing username or reset token",
            )));
        }

        let password = reset.password.expose_secret();
        if password.is_empty() || password != reset.password2.expose_secret() {
            return Err(StoreError::Validation(String::from("Invalid new password")));
        }

        let hash = self.passwords.hash_password(&reset.password)?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET password = $1, reset_token = NULL, reset_expire = NULL
            WHERE username = $2 AND reset_token = $3 AND reset_expire > NOW()
            "#,
        )
        .bind(hash)
        .bind(&reset.username)
        .bind(&reset.reset_token)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn send_reset_email(&self, account: &User, reset_token: &str) -> Result<(), String> {
        let recipient = EmailAddress::parse(account.email.clone())?;
        let reset_link = self.reset_link(&account.username, reset_token)?;

        let html_body = format!(
            r#"
                <div>
                    <p>Hi {},</p>
                    <p>Click <a href="{}">here</a> to choose a new password. The link expires in one hour.</p>
                </div>
            "#,
            account.username, reset_link
        );
        let text_body = format!(
            "Hi {},\nVisit {} to choose a new password. The link expires in one hour.",
            account.username, reset_link
        );

        self.email_client
            .send_email(
                &recipient,
                "Mailer password change request",
                &html_body,
                &text_body,
            )
            .await
            .map_err(|err| err.to_string())
    }

    fn reset_link(&self, username: &str, reset_token: &str) -> Result<String, String> {
        let mut url = Url::parse(&self.service_url)
            .and_then(|base| base.join("/users/reset"))
            .map_err(|err| format!("Invalid service url {}: {}", self.service_url, err))?;

        url.query_pairs_mut()
            .append_pair("token", reset_token)
            .append_pair("username", username);

        Ok(url.to_string())
    }
}

fn password_change_requested(update: &AccountUpdate) -> bool {
    [&update.password, &update.password2]
        .iter()
        .any(|password| matches!(password, Some(password) if !password.expose_secret().is_empty()))
}

fn new_password(update: &AccountUpdate) -> StoreResult<&Secret<String>> {
    let password = update
        .password
        .as_ref()
        .filter(|password| !password.expose_secret().is_empty())
        .ok_or_else(|| StoreError::Validation(String::from("New password not set")))?;

    match &update.password2 {
        Some(password2) if password2.expose_secret() == password.expose_secret() => Ok(password),
        _ => Err(StoreError::Validation(String::from("Passwords do not match"))),
    }
}
