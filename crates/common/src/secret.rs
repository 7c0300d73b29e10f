//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types for
//! every credential the service handles: the bot token and any store
//! connection string that may embed a password.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` and holds a secret is safe to log via `{:?}` or tracing. Secrets are
//! zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BotCredentials {
//!     application: String,
//!     token: SecretString,
//! }
//!
//! let creds = BotCredentials {
//!     application: "room-controller".to_string(),
//!     token: SecretString::from("bot-token"),
//! };
//!
//! // Safe: the token is redacted
//! println!("{:?}", creds);
//!
//! // Reading the value requires an explicit call
//! let token: &str = creds.token.expose_secret();
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("bot-token-value");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("bot-token-value"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("redis://:pw@localhost:6379");
        assert_eq!(secret.expose_secret(), "redis://:pw@localhost:6379");
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            application: String,
            token: SecretString,
        }

        let json = r#"{"application": "rc", "token": "my-bot-token"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.token.expose_secret(), "my-bot-token");

        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-bot-token"));
        assert!(debug.contains("REDACTED"));
    }
}
