//! Outbound transports.
//!
//! Any `Err` from a sender is recorded as a failed delivery attempt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use recap_core::config::DeliveryConfig;
use recap_core::error::RecapError;

use crate::error::SendError;

/// One rendered report addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// Delivers rendered reports.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl MessageSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        check_message(message)?;
        info!(
            recipient = %message.recipient,
            subject = %message.subject,
            body_len = message.body.len(),
            "Report delivered to log"
        );
        Ok(())
    }
}

/// Drops one RFC 822 style file per message into a directory for an MTA
/// to pick up.
#[derive(Debug, Clone)]
pub struct OutboxSender {
    dir: PathBuf,
    from: String,
}

impl OutboxSender {
    pub fn new(dir: impl Into<PathBuf>, from: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            from: from.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn format(&self, message: &OutboundMessage) -> String {
        let mut out = String::new();
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("To: {}\r\n", message.recipient));
        out.push_str(&format!("Subject: {}\r\n", message.subject));
        out.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        for (name, value) in &message.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(&message.body.replace("\r\n", "\n").replace('\n', "\r\n"));
        out
    }
}

#[async_trait]
impl MessageSender for OutboxSender {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        check_message(message)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = format!(
            "{}-{}.eml",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            Uuid::new_v4()
        );
        let path = self.dir.join(file_name);
        // Write then rename so a watcher never picks up a partial file.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, self.format(message)).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(
            recipient = %message.recipient,
            path = %path.display(),
            "Report written to outbox"
        );
        Ok(())
    }
}

/// Reject recipients and header values that could break the message framing.
fn check_message(message: &OutboundMessage) -> Result<(), SendError> {
    let recipient = message.recipient.trim();
    if recipient.is_empty() || !recipient.contains('@') || has_line_break(recipient) {
        return Err(SendError::InvalidRecipient(message.recipient.clone()));
    }
    if has_line_break(&message.subject) {
        return Err(SendError::Transport("subject contains a line break".to_string()));
    }
    for (name, value) in &message.headers {
        if has_line_break(name) || has_line_break(value) {
            return Err(SendError::Transport(format!(
                "header {} contains a line break",
                name.trim()
            )));
        }
    }
    Ok(())
}

fn has_line_break(s: &str) -> bool {
    s.contains('\r') || s.contains('\n')
}

/// Build the sender selected by configuration. A relative outbox directory
/// resolves against `data_dir`.
pub fn sender_from_config(
    config: &DeliveryConfig,
    data_dir: &Path,
) -> Result<Box<dyn MessageSender>, RecapError> {
    match config.transport.as_str() {
        "log" => Ok(Box::new(LogSender)),
        "outbox" => {
            let dir = Path::new(&config.outbox_dir);
            let dir = if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                data_dir.join(dir)
            };
            Ok(Box::new(OutboxSender::new(dir, config.from_address.clone())))
        }
        other => Err(RecapError::Config(format!(
            "unknown delivery transport: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(recipient: &str) -> OutboundMessage {
        let mut headers = BTreeMap::new();
        headers.insert("X-Recap-Report".to_string(), "abc".to_string());
        OutboundMessage {
            recipient: recipient.to_string(),
            subject: "[Recap] Weekly report".to_string(),
            body: "line one\nline two".to_string(),
            headers,
        }
    }

    #[tokio::test]
    async fn test_log_sender_accepts_valid_message() {
        assert!(LogSender.send(&message("ops@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected() {
        let err = LogSender.send(&message("not-an-address")).await.unwrap_err();
        assert!(matches!(err, SendError::InvalidRecipient(_)));

        let err = LogSender
            .send(&message("a@example.com\r\nBcc: x@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn test_header_injection_rejected() {
        let mut msg = message("a@example.com");
        msg.subject = "hi\nBcc: evil@example.com".to_string();
        assert!(matches!(
            LogSender.send(&msg).await.unwrap_err(),
            SendError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_outbox_sender_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sender = OutboxSender::new(dir.path().join("outbox"), "recap@example.com");
        sender.send(&message("ops@example.com")).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(sender.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extension().unwrap(), "eml");

        let content = std::fs::read_to_string(&entries[0]).unwrap();
        assert!(content.starts_with("From: recap@example.com\r\nTo: ops@example.com\r\n"));
        assert!(content.contains("Subject: [Recap] Weekly report\r\n"));
        assert!(content.contains("X-Recap-Report: abc\r\n"));
        assert!(content.ends_with("\r\n\r\nline one\r\nline two"));
    }

    #[test]
    fn test_sender_from_config() {
        let data_dir = Path::new("/var/lib/recap");
        let mut config = DeliveryConfig::default();
        assert_eq!(sender_from_config(&config, data_dir).unwrap().name(), "log");

        config.transport = "outbox".to_string();
        assert_eq!(sender_from_config(&config, data_dir).unwrap().name(), "outbox");

        config.transport = "pigeon".to_string();
        assert!(matches!(
            sender_from_config(&config, data_dir),
            Err(RecapError::Config(_))
        ));
    }
}
