use crate::db::entities::email_configs;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends mail through the SMTP account described by an [`email_configs::Model`]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Connect and authenticate without sending anything
    async fn verify(&self, config: &email_configs::Model) -> AppResult<()>;

    async fn send(&self, config: &email_configs::Model, mail: &OutgoingMail) -> AppResult<()>;
}

pub struct SmtpMailer {
    sender_name: String,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(sender_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sender_name: sender_name.into(),
            timeout,
        }
    }

    fn transport(&self, config: &email_configs::Model) -> AppResult<AsyncSmtpTransport<Tokio1Executor>> {
        let port = u16::try_from(config.smtp_port)
            .map_err(|_| AppError::Mail(format!("invalid SMTP port {}", config.smtp_port)))?;

        // Implicit TLS for SSL configs, STARTTLS upgrade otherwise
        let builder = if config.is_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
        }
        .map_err(|e| AppError::Mail(format!("SMTP setup failed: {}", e)))?;

        Ok(builder
            .port(port)
            .credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build())
    }

    fn message(&self, config: &email_configs::Model, mail: &OutgoingMail) -> AppResult<Message> {
        let from_address: Address = config
            .smtp_user
            .parse()
            .map_err(|e| AppError::Mail(format!("invalid sender '{}': {}", config.smtp_user, e)))?;
        let to_address: Address = mail
            .to
            .parse()
            .map_err(|e| AppError::Mail(format!("invalid receiver '{}': {}", mail.to, e)))?;

        Message::builder()
            .from(Mailbox::new(Some(self.sender_name.clone()), from_address))
            .to(Mailbox::new(None, to_address))
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| AppError::Mail(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn verify(&self, config: &email_configs::Model) -> AppResult<()> {
        let transport = self.transport(config)?;
        let connected = tokio::time::timeout(self.timeout, transport.test_connection())
            .await
            .map_err(|_| AppError::Mail(format!("SMTP connection timed out after {:?}", self.timeout)))?
            .map_err(|e| AppError::Mail(format!("SMTP connection failed: {}", e)))?;

        if !connected {
            return Err(AppError::Mail(format!(
                "could not connect to {}:{}",
                config.smtp_server, config.smtp_port
            )));
        }
        Ok(())
    }

    async fn send(&self, config: &email_configs::Model, mail: &OutgoingMail) -> AppResult<()> {
        let message = self.message(config, mail)?;
        let transport = self.transport(config)?;

        tokio::time::timeout(self.timeout, transport.send(message))
            .await
            .map_err(|_| AppError::Mail(format!("SMTP send timed out after {:?}", self.timeout)))?
            .map_err(|e| AppError::Mail(format!("SMTP send failed: {}", e)))?;
        Ok(())
    }
}
