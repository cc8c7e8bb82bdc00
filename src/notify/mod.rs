//! Upload notifications
//!
//! Delivery is best-effort: callers log a failure and carry on.

pub mod smtp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

pub use self::smtp::SmtpNotifier;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("notifier configuration error: {0}")]
    Configuration(String),
}

/// What the recipient is told about a freshly uploaded file.
#[derive(Debug, Clone)]
pub struct UploadNotice {
    pub recipient: String,
    pub file_name: String,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
}

impl UploadNotice {
    pub fn subject(&self) -> String {
        format!("Your file {} is ready for download", self.file_name)
    }

    /// Expiry date as `dd-mm-yyyy`.
    pub fn formatted_expiry(&self) -> String {
        self.expires_at.format("%d-%m-%Y").to_string()
    }

    pub fn text_body(&self) -> String {
        format!(
            "You can download your file: {}\nLink expires on: {}\nDownload: {}\n",
            self.file_name,
            self.formatted_expiry(),
            self.download_url
        )
    }

    pub fn html_body(&self) -> String {
        format!(
            "<p>You can download your file: {} <br>Link expires on: {} <br><a href=\"{}\">click here to download</a>.</p>",
            escape_html(&self.file_name),
            self.formatted_expiry(),
            escape_html(&self.download_url)
        )
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notice: &UploadNotice) -> Result<(), NotifyError>;

    fn backend_name(&self) -> &'static str;
}

/// Writes notices to the log instead of sending them. For development.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &UploadNotice) -> Result<(), NotifyError> {
        info!(
            recipient = %notice.recipient,
            subject = %notice.subject(),
            download_url = %notice.download_url,
            expires = %notice.formatted_expiry(),
            "Upload notification (not sent, log provider)"
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "log"
    }
}
