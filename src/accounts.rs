//! User registration: a user and its profile are created together

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use bigdecimal::BigDecimal;
use tracing::info;

use crate::traits::*;
use crate::types::*;

/// Registers users with a fresh profile carrying the base school fee
pub struct Registrar<S: ClearanceStorage> {
    storage: S,
    validator: Box<dyn RegistrationValidator>,
    base_school_fee: BigDecimal,
}

impl<S: ClearanceStorage> Registrar<S> {
    /// Create a registrar with the default validator and base fee
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultRegistrationValidator),
            base_school_fee: BigDecimal::from(DEFAULT_SCHOOL_FEE),
        }
    }

    /// Create a registrar with a custom validator
    pub fn with_validator(storage: S, validator: Box<dyn RegistrationValidator>) -> Self {
        Self {
            validator,
            ..Self::new(storage)
        }
    }

    pub fn with_base_school_fee(mut self, fee: BigDecimal) -> Self {
        self.base_school_fee = fee;
        self
    }

    /// Register a user; duplicates of email, username or matricule are conflicts
    pub async fn register(&self, new_user: NewUser) -> ClearanceResult<(User, Profile)> {
        self.validator.validate_registration(&new_user)?;

        let password = new_user.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ClearanceError::Storage(format!("password hashing task failed: {}", e)))??;
        let user = new_user.into_user(password_hash);
        let profile = Profile::new(
            user.email.clone(),
            user.username.clone(),
            self.base_school_fee.clone(),
        );
        self.storage.register_user(&user, &profile).await?;

        info!(username = %user.username, "user registered");
        Ok((user, profile))
    }
}

/// Argon2id hash in PHC string form with a fresh random salt
pub fn hash_password(password: &str) -> ClearanceResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ClearanceError::Storage(format!("password hashing failed: {}", e)))
}
