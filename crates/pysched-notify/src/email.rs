//! Best-effort SMTP notifications for execution outcomes.

use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, warn};

use pysched_core::config::EmailConfig;
use pysched_core::types::ExecutionStatus;

use crate::error::{NotifyError, Result};

/// Output characters included in a notification body.
const BODY_OUTPUT_MAX: usize = 2_000;

/// Sends execution notifications over SMTP (STARTTLS relay).
///
/// Delivery is best-effort end to end: per-recipient failures are logged
/// and the result is advisory — callers must not let an execution's fate
/// depend on it.
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let creds = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        );
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| NotifyError::Config(format!("SMTP relay: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }

    /// Send one notification to each recipient in the comma-separated list.
    /// Returns true when at least one delivery succeeded.
    pub async fn send_script_notification(
        &self,
        script_name: &str,
        status: ExecutionStatus,
        output: &str,
        recipients: &str,
    ) -> bool {
        let (subject, body) = build_notification(script_name, status, output);
        let mut delivered = 0usize;

        for recipient in split_recipients(recipients) {
            match self.send_one(&recipient, &subject, &body).await {
                Ok(()) => {
                    debug!(%recipient, %script_name, "notification sent");
                    delivered += 1;
                }
                Err(e) => warn!(%recipient, %script_name, error = %e, "notification failed"),
            }
        }

        delivered > 0
    }

    async fn send_one(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let from: Mailbox = self
            .from_email
            .parse()
            .map_err(|e| NotifyError::Config(format!("invalid from address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Config(format!("invalid recipient: {e}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Config(format!("build message: {e}")))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| NotifyError::Config(format!("SMTP send: {e}")))?;
        Ok(())
    }
}

/// Subject and plain-text body for one outcome notification.
fn build_notification(
    script_name: &str,
    status: ExecutionStatus,
    output: &str,
) -> (String, String) {
    let status_label = match status {
        ExecutionStatus::Success => "Success",
        ExecutionStatus::Failed => "Failed",
        ExecutionStatus::Running => "Running",
    };
    let subject = format!("PySched: {script_name} - {status_label}");

    let shown: String = output.chars().take(BODY_OUTPUT_MAX).collect();
    let ellipsis = if output.chars().count() > BODY_OUTPUT_MAX {
        "…"
    } else {
        ""
    };

    let body = format!(
        "Script: {script_name}\n\
         Status: {status_label}\n\
         Time: {}\n\n\
         Output:\n{shown}{ellipsis}\n\n\
         ---\nPySched Notification\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    );

    (subject, body)
}

/// Split and trim a comma-separated recipient list, dropping empties.
fn split_recipients(recipients: &str) -> Vec<String> {
    recipients
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
