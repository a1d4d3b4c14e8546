use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_sdk_sesv2::{
    config::Region,
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::{EmailBackend, EmailConfig};

/// A fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Delivers one message and returns the transport's message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String>;
}

pub async fn build_mailer(config: &EmailConfig) -> Arc<dyn Mailer> {
    match config.backend {
        EmailBackend::Ses => Arc::new(SesMailer::new(&config.aws_region).await),
        EmailBackend::Console => Arc::new(ConsoleMailer),
        EmailBackend::Memory => Arc::new(MemoryMailer::default()),
    }
}

#[derive(Clone)]
pub struct SesMailer {
    client: Client,
}

impl SesMailer {
    pub async fn new(region: &str) -> Self {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&shared),
        }
    }
}

fn utf8(data: &str) -> anyhow::Result<Content> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .context("build ses content")
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String> {
        let body = Body::builder()
            .html(utf8(&email.html)?)
            .text(utf8(&email.text)?)
            .build();
        let message = Message::builder()
            .subject(utf8(&email.subject)?)
            .body(body)
            .build();
        let response = self
            .client
            .send_email()
            .from_email_address(&email.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .context("ses send_email")?;
        Ok(response.message_id().unwrap_or_default().to_string())
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Clone, Default)]
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String> {
        let message_id = format!("console-{}", Uuid::new_v4());
        info!(
            to = %email.to,
            from = %email.from,
            subject = %email.subject,
            %message_id,
            "email (console backend)\n{}",
            email.text
        );
        Ok(message_id)
    }
}

/// In-process outbox. Recipients listed in `failing` are rejected.
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<OutgoingEmail>>,
    failing: Mutex<Vec<String>>,
}

impl MemoryMailer {
    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.outbox.lock().await.clone()
    }

    pub async fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        self.outbox
            .lock()
            .await
            .iter()
            .filter(|email| email.to == address)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.outbox.lock().await.clear();
    }

    pub async fn fail_for(&self, address: &str) {
        self.failing.lock().await.push(address.to_string());
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String> {
        if self.failing.lock().await.contains(&email.to) {
            anyhow::bail!("mailbox unavailable: {}", email.to);
        }
        self.outbox.lock().await.push(email.clone());
        Ok(format!("memory-{}", Uuid::new_v4()))
    }
}

/// Plain-text alternative derived from the HTML body.
pub fn html_to_text(html: &str) -> String {
    lazy_static! {
        static ref BLOCK_RE: Regex =
            Regex::new(r"(?is)<(style|script|head)[^>]*>.*?</(style|script|head)>").unwrap();
        static ref BREAK_RE: Regex = Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr)>").unwrap();
        static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
        static ref BLANK_RE: Regex = Regex::new(r"\n\s*\n+").unwrap();
    }
    let text = BLOCK_RE.replace_all(html, "");
    let text = BREAK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    BLANK_RE
        .replace_all(lines.join("\n").trim(), "\n\n")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            from: "noreply@organisize.com".into(),
            to: to.into(),
            subject: "Hello".into(),
            html: "<p>Hi</p>".into(),
            text: "Hi".into(),
        }
    }

    #[test]
    fn strips_markup() {
        let html = "<html><head><style>p { color: red }</style></head><body><h1>Welcome</h1><p>Plan &amp; go<br>today</p></body></html>";
        assert_eq!(html_to_text(html), "Welcome\nPlan & go\ntoday");
    }

    #[tokio::test]
    async fn memory_mailer_records_and_fails() {
        let mailer = MemoryMailer::default();
        mailer.fail_for("bounce@example.com").await;
        assert!(mailer.send(&email("bounce@example.com")).await.is_err());
        let id = mailer.send(&email("friend@example.com")).await.unwrap();
        assert!(id.starts_with("memory-"));
        assert_eq!(mailer.sent().await.len(), 1);
        assert_eq!(mailer.sent_to("friend@example.com").await.len(), 1);
    }
}
