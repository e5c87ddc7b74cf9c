pub type StoreResult<T> = Result<T, StoreError>;

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} is not a valid email address.")]
    InvalidEmail(String),
    #[error("Incorrect current password.")]
    IncorrectPassword,
    #[error("Can't change email as another user with the same email address already exists.")]
    DuplicateEmail,
    #[error("Failed to execute a storage operation.")]
    Storage(#[from] sqlx::Error),
    #[error("Failed to hash or verify a password: {0}")]
    PasswordHash(String),
    #[error("Failed to serialize a stored payload.")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::Validation(_)
                | StoreError::InvalidEmail(_)
                | StoreError::IncorrectPassword
        )
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Storage(sqlx::Error::Database(err)) => {
                err.code().as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}

// Postgres SQLSTATE for "unique_violation"
const UNIQUE_VIOLATION: &str = "23505";

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub fn error_chain_fmt(
    err: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}", err)?;

    let mut current = err.source();

    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }

    Ok(())
}
