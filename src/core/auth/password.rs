//! Password hashing with bcrypt
//!
//! bcrypt embeds a random salt in every hash and `bcrypt::verify` compares in
//! constant time.

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const DEFAULT_BCRYPT_COST: u32 = 12;

#[derive(Debug, thiserror::Error)]
#[error("Password hashing failed: {0}")]
pub struct HashingError(String);

/// bcrypt hasher with a configurable cost
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String, HashingError> {
        bcrypt::hash(password, self.cost).map_err(|e| HashingError(e.to_string()))
    }

    /// Verify a password against a bcrypt hash
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, HashingError> {
        bcrypt::verify(password, hash).map_err(|e| HashingError(e.to_string()))
    }
}
