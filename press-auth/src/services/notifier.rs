//! Outbound delivery of verification tokens. Delivery is best effort: the
//! caller logs failures and never lets them change the flow's outcome.

use crate::config::SmtpConfig;
use crate::models::TokenPurpose;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Clone)]
pub struct Notification {
    pub channel: Channel,
    pub recipient: String,
    pub purpose: TokenPurpose,
    pub token: String,
    pub ttl_minutes: i64,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("channel", &self.channel)
            .field("recipient", &self.recipient)
            .field("purpose", &self.purpose)
            .finish_non_exhaustive()
    }
}

impl Notification {
    /// Subject line and plain-text body.
    pub fn render(&self, public_base_url: &str) -> (String, String) {
        let base = public_base_url.trim_end_matches('/');
        match self.purpose {
            TokenPurpose::Email => (
                "Verify your email address".to_string(),
                format!(
                    "Please confirm your email address by visiting:\n\n{}/auth/verify-email?token={}\n\nThis link expires in {} minutes. If you did not request it, ignore this message.",
                    base, self.token, self.ttl_minutes
                ),
            ),
            TokenPurpose::Phone => (
                "Your verification code".to_string(),
                format!(
                    "Your verification code is {}. It expires in {} minutes.",
                    self.token, self.ttl_minutes
                ),
            ),
            TokenPurpose::PasswordReset => (
                "Reset your password".to_string(),
                format!(
                    "We received a request to reset your password. Set a new one at:\n\n{}/auth/reset-password?token={}\n\nThis link expires in {} minutes. If you did not request it, ignore this message.",
                    base, self.token, self.ttl_minutes
                ),
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), anyhow::Error>;
}

/// Sends email over SMTP. There is no SMS gateway, so SMS deliveries fail.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    public_base_url: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig, host: &str) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow::anyhow!("Failed to create SMTP relay: {}", e))?
            .credentials(creds)
            .timeout(Some(std::time::Duration::from_secs(10)))
            .build();

        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid SMTP_FROM address: {}", e))?;

        tracing::info!(host = %host, "SMTP notifier initialized");

        Ok(Self {
            transport,
            from,
            public_base_url: config.public_base_url.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        if notification.channel != Channel::Email {
            return Err(anyhow::anyhow!("No SMS gateway configured"));
        }

        let to: Mailbox = notification
            .recipient
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid recipient: {}", e))?;
        let (subject, body) = notification.render(&self.public_base_url);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| anyhow::anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("SMTP send failed: {}", e))?;

        tracing::info!(purpose = %notification.purpose, "Notification email sent");
        Ok(())
    }
}

/// Development notifier: logs deliveries instead of sending them.
pub struct LogNotifier {
    public_base_url: String,
}

impl LogNotifier {
    pub fn new(public_base_url: String) -> Self {
        Self { public_base_url }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        let (subject, body) = notification.render(&self.public_base_url);
        tracing::info!(
            channel = ?notification.channel,
            purpose = %notification.purpose,
            subject = %subject,
            "Notification not sent: no SMTP host configured"
        );
        tracing::debug!(body = %body, "Suppressed notification body");
        Ok(())
    }
}

/// Records every delivery for inspection in tests.
#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Token of the most recent delivery to `recipient` for `purpose`.
    pub fn last_token(&self, recipient: &str, purpose: TokenPurpose) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|n| n.recipient == recipient && n.purpose == purpose)
            .map(|n| n.token.clone())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(purpose: TokenPurpose) -> Notification {
        Notification {
            channel: Channel::Email,
            recipient: "alice@example.com".to_string(),
            purpose,
            token: "tok123".to_string(),
            ttl_minutes: 30,
        }
    }

    #[test]
    fn links_point_at_the_matching_flow() {
        let (_, body) = notification(TokenPurpose::Email).render("https://press.example/");
        assert!(body.contains("https://press.example/auth/verify-email?token=tok123"));

        let (_, body) = notification(TokenPurpose::PasswordReset).render("https://press.example");
        assert!(body.contains("https://press.example/auth/reset-password?token=tok123"));
    }

    #[test]
    fn debug_does_not_print_token() {
        assert!(!format!("{:?}", notification(TokenPurpose::Email)).contains("tok123"));
    }

    #[tokio::test]
    async fn mock_records_latest_token() -> Result<(), anyhow::Error> {
        let mock = MockNotifier::new();
        mock.deliver(&notification(TokenPurpose::Email)).await?;
        let mut second = notification(TokenPurpose::Email);
        second.token = "tok456".to_string();
        mock.deliver(&second).await?;

        assert_eq!(
            mock.last_token("alice@example.com", TokenPurpose::Email),
            Some("tok456".to_string())
        );
        assert_eq!(mock.last_token("alice@example.com", TokenPurpose::Phone), None);
        Ok(())
    }
}
