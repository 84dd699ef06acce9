mod message;
mod smtp;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use message::compose_notification;
pub use smtp::{DEFAULT_SMTP_PORT, DEFAULT_SMTP_TIMEOUT, SmtpConfig, SmtpMailTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid email address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("could not build email: {0}")]
    Build(String),

    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("mail transport timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound mail. A successful return means the transport accepted the
/// message; there is no delivery receipt beyond that.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError>;
}
