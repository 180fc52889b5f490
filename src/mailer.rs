use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Outbound confirmation mail. No retry, backoff, or queuing; a failure
/// aborts the caller's remaining work.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Connectivity/auth check, run before a batch so a dead transport
    /// fails the job before any mail goes out.
    async fn verify(&self) -> Result<(), AppError>;
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| AppError::Config(format!("smtp relay {}: {e}", config.host)))?
            .port(config.port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .build();
        let from = config
            .username
            .parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("invalid sender address {:?}: {e}", config.username)))?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn verify(&self) -> Result<(), AppError> {
        let reachable = self
            .transport
            .test_connection()
            .await
            .map_err(|e| AppError::MailVerify(e.to_string()))?;
        if !reachable {
            return Err(AppError::MailVerify("transport connection test failed".to_string()));
        }
        Ok(())
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let recipient = to
            .parse::<Mailbox>()
            .map_err(|e| AppError::MailSend(format!("invalid recipient {to:?}: {e}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| AppError::MailSend(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::MailSend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMail {
        pub to: String,
        pub subject: String,
        pub body: String,
    }

    /// Records sends instead of delivering them; can be scripted to fail
    /// verification or a specific recipient.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<SentMail>>,
        fail_verify: bool,
        fail_recipient: Option<String>,
    }

    impl RecordingMailer {
        pub fn failing_verify() -> Self {
            Self {
                fail_verify: true,
                ..Self::default()
            }
        }

        pub fn failing_send_to(recipient: &str) -> Self {
            Self {
                fail_recipient: Some(recipient.to_string()),
                ..Self::default()
            }
        }

        pub fn sent_mail(&self) -> Vec<SentMail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn verify(&self) -> Result<(), AppError> {
            if self.fail_verify {
                Err(AppError::MailVerify("transport connection test failed".to_string()))
            } else {
                Ok(())
            }
        }

        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
            if self.fail_recipient.as_deref() == Some(to) {
                return Err(AppError::MailSend(format!("delivery to {to} refused")));
            }
            self.sent.lock().unwrap().push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            Ok(())
        }
    }
}
