use argon2::{
    password_hash::SaltString, Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};

use crate::error::{StoreError, StoreResult};

const SALT_LEN: usize = 16;

/// One-way password hashing (Argon2id, PHC string format).
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new() -> StoreResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(19 * 1024); // 19 MiB
        builder.t_cost(2);
        builder.p_cost(1);
        let params = builder
            .build()
            .map_err(|err| StoreError::PasswordHash(err.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        Ok(Self { argon2 })
    }

    pub fn hash_password(&self, password: &Secret<String>) -> StoreResult<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| StoreError::PasswordHash(err.to_string()))?;

        let hash = self
            .argon2
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|err| StoreError::PasswordHash(err.to_string()))?
            .to_string();

        Ok(hash)
    }

    /// `Ok(false)` on a wrong password. Errors are reserved for unreadable hashes.
    pub fn verify_password(&self, password: &Secret<String>, encoded: &str) -> StoreResult<bool> {
        let parsed =
            PasswordHash::new(encoded).map_err(|err| StoreError::PasswordHash(err.to_string()))?;

        match self
            .argon2
            .verify_password(password.expose_secret().as_bytes(), &parsed)
        {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(StoreError::PasswordHash(err.to_string())),
        }
    }
}
