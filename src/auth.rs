//! Username/password gate in front of the studio.

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Default)]
pub struct CredentialGate {
    username: String,
    password: String,
}

impl CredentialGate {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.username.as_deref().unwrap_or_default(),
            config.password.as_deref().unwrap_or_default(),
        )
    }

    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Check supplied credentials. Both sides are trimmed before comparing.
    pub fn check(&self, username: &str, password: &str) -> Result<(), AppError> {
        if !self.is_configured() {
            return Err(AppError::Config(
                "APP_USERNAME and APP_PASSWORD must be set".into(),
            ));
        }
        if username.trim() == self.username && password.trim() == self.password {
            Ok(())
        } else {
            log::warn!(target: "voxover::auth", "rejected login for {:?}", username.trim());
            Err(AppError::Unauthorized)
        }
    }
}
