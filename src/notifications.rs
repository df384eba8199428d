//! Outbound notification delivery (C15), adapted from the teacher's
//! `alert_engine.rs` per-channel dispatch (email via `lettre`, Slack and
//! generic webhooks via `reqwest`): attempts email if SMTP is configured,
//! then every Slack webhook, then every generic webhook, logging but never
//! failing the caller on delivery errors.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub enum NotificationChannel {
    Email { to: String },
    Slack { webhook_url: String },
    Webhook { url: String },
}

pub fn build_smtp_transport(cfg: &SmtpConfig) -> Option<AsyncSmtpTransport<Tokio1Executor>> {
    let host = cfg.host.as_deref()?;
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host).ok()?;
    builder = builder.port(cfg.port);
    if let (Some(user), Some(pass)) = (&cfg.user, &cfg.pass) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }
    Some(builder.build())
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub event: String,
    pub message: String,
}

/// Deliver `message` to every channel, logging and swallowing per-channel
/// failures. Never returns an error: the caller's own flow must not be
/// interrupted by a delivery failure.
pub async fn send_notifications(
    message: &str,
    event_kind: &str,
    channels: &[NotificationChannel],
    smtp_config: Option<&SmtpConfig>,
    smtp_transport: Option<&AsyncSmtpTransport<Tokio1Executor>>,
    http_client: &reqwest::Client,
) {
    for channel in channels {
        match channel {
            NotificationChannel::Email { to } => {
                let Some(transport) = smtp_transport else {
                    tracing::warn!("email channel configured but SMTP is not set up");
                    continue;
                };
                let Some(smtp_config) = smtp_config else { continue };
                let email = Message::builder()
                    .from(smtp_config.from.parse().unwrap_or_else(|_| "piwardrive@localhost".parse().unwrap()))
                    .to(to.parse().unwrap_or_else(|_| "noreply@localhost".parse().unwrap()))
                    .subject(format!("[piwardrive] {event_kind}"))
                    .header(ContentType::TEXT_PLAIN)
                    .body(message.to_string());
                match email {
                    Ok(email) => {
                        if let Err(e) = transport.send(email).await {
                            tracing::warn!(to, error = %e, "notification email failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to build notification email"),
                }
            }
            NotificationChannel::Slack { webhook_url } => {
                let payload = json!({"text": message});
                if let Err(e) = http_client.post(webhook_url).json(&payload).send().await {
                    tracing::warn!(error = %e, "slack webhook delivery failed");
                }
            }
            NotificationChannel::Webhook { url } => {
                let payload = WebhookEvent { event: event_kind.to_string(), message: message.to_string() };
                if let Err(e) = http_client.post(url).json(&payload).send().await {
                    tracing::warn!(error = %e, "generic webhook delivery failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_transport_is_none_without_host() {
        let cfg = SmtpConfig { host: None, port: 587, user: None, pass: None, from: "a@b.com".to_string() };
        assert!(build_smtp_transport(&cfg).is_none());
    }

    #[tokio::test]
    async fn send_notifications_skips_email_without_transport() {
        let client = reqwest::Client::new();
        // Should not panic even though no transport/smtp config is provided.
        send_notifications(
            "test message",
            "suspicious_activity",
            &[NotificationChannel::Email { to: "ops@example.com".to_string() }],
            None,
            None,
            &client,
        )
        .await;
    }
}
