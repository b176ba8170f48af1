//! Password reset codes
//!
//! A reset code is a six-digit number handed to a [`ResetCodeSender`]; only
//! its SHA-256 hash is stored on the account.

use async_trait::async_trait;
use rand::Rng;

/// Reset code lifetime
pub const RESET_CODE_TTL_MINUTES: i64 = 15;

/// Wrong guesses a reset code survives before it is cleared
pub const MAX_RESET_ATTEMPTS: i32 = 5;

#[derive(Debug, thiserror::Error)]
#[error("Reset code delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Outbound channel for reset codes (email in production)
#[async_trait]
pub trait ResetCodeSender: Send + Sync {
    async fn send(&self, email: &str, code: &str) -> Result<(), DeliveryError>;
}

/// Sender that only records the delivery in the log.
///
/// The code itself is logged at `debug` so local setups without a mailer can
/// still complete a reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResetCodeSender;

#[async_trait]
impl ResetCodeSender for LogResetCodeSender {
    async fn send(&self, email: &str, code: &str) -> Result<(), DeliveryError> {
        tracing::info!(email = %email, "Password reset code issued");
        tracing::debug!(email = %email, code = %code, "Reset code (log delivery)");
        Ok(())
    }
}

/// Generate a zero-padded six-digit code
pub fn generate_reset_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

/// Sender that keeps every delivered code, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingResetCodeSender {
    sent: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingResetCodeSender {
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl ResetCodeSender for RecordingResetCodeSender {
    async fn send(&self, email: &str, code: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}
