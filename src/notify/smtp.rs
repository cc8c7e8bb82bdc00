use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error, info};

use super::{Notifier, NotifyError, UploadNotice};
use crate::config::EmailConfig;

/// Sends upload notices through an SMTP relay.
pub struct SmtpNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .field("transport", &"<AsyncSmtpTransport>")
            .finish()
    }
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from = config
            .from
            .parse()
            .map_err(|e| NotifyError::Configuration(format!("invalid from address: {e}")))?;
        let transport = build_transport(config)?;
        info!(host = %config.smtp_host, port = config.smtp_port, "SMTP notifier configured");
        Ok(Self { from, transport })
    }
}

fn build_transport(config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let builder = if config.smtp_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NotifyError::Configuration(format!("SMTP TLS relay error: {e}")))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
    };

    let builder = builder.port(config.smtp_port);

    let builder = match (&config.username, &config.password) {
        (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
        _ => builder,
    };

    Ok(builder.build())
}

fn build_message(from: &Mailbox, notice: &UploadNotice) -> Result<Message, NotifyError> {
    let to: Mailbox = notice
        .recipient
        .parse()
        .map_err(|e| NotifyError::InvalidAddress(format!("{}: {e}", notice.recipient)))?;

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(notice.subject())
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(notice.text_body()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(notice.html_body()),
                ),
        )
        .map_err(|e| NotifyError::Message(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notice: &UploadNotice) -> Result<(), NotifyError> {
        let message = build_message(&self.from, notice)?;

        debug!(to = %notice.recipient, "Sending upload notification");
        self.transport.send(message).await.map_err(|e| {
            error!(error = %e, to = %notice.recipient, "SMTP send failed");
            NotifyError::Delivery(e.to_string())
        })?;

        info!(to = %notice.recipient, "Upload notification sent");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "smtp"
    }
}
