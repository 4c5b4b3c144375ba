use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mailer
///
/// Contract for the message-delivery collaborator. Delivery is fire-and-forget
/// from the caller's point of view: the `Err` case exists so implementations
/// can report failures for logging, but no handler surfaces it to a client.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Shared handle for the mailer across the application state.
pub type MailerState = Arc<dyn Mailer>;

/// HttpMailer
///
/// Production implementation: posts a JSON payload to an HTTP mail gateway
/// (anything that accepts `{from, to, subject, body}` — a relay sidecar
/// locally, a transactional mail API in production).
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    sender: String,
}

impl HttpMailer {
    pub fn new(endpoint: &str, sender: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            sender: sender.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "from": self.sender,
                "to": to,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("mail gateway responded {}", response.status()));
        }
        Ok(())
    }
}

/// A single recorded outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// MockMailer
///
/// Test double: records every message in a shared outbox so tests can read
/// back delivered confirmation codes, and can simulate gateway failure.
#[derive(Clone, Default)]
pub struct MockMailer {
    outbox: Arc<Mutex<Vec<OutboundMail>>>,
    should_fail: bool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Snapshot of everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutboundMail> {
        self.outbox.lock().expect("outbox lock").clone()
    }

    /// The most recently delivered message, if any.
    pub fn last(&self) -> Option<OutboundMail> {
        self.sent().pop()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        if self.should_fail {
            return Err("mock mail gateway failure".to_string());
        }
        self.outbox.lock().expect("outbox lock").push(OutboundMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
