use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmailConfig;
use crate::error::{ControlError, ControlResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailReceipt {
    pub id: String,
}

/// Outbound email capability. Implementations never retry.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_email(&self, message: EmailMessage) -> ControlResult<EmailReceipt>;
}

/// Delivers through the hosted `send-email` function.
pub struct HttpEmailNotifier {
    client: Client,
    config: EmailConfig,
}

#[derive(Serialize)]
struct SendEmailPayload<'a> {
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
}

#[derive(Deserialize)]
struct ProviderError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpEmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Notifier for HttpEmailNotifier {
    async fn send_email(&self, message: EmailMessage) -> ControlResult<EmailReceipt> {
        let endpoint = self
            .config
            .function_url
            .as_deref()
            .ok_or_else(|| ControlError::Configuration("EMAIL_FUNCTION_URL is not set".into()))?;

        let payload = SendEmailPayload {
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            from: self.config.from_address.as_deref(),
        };

        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(key) = self.config.function_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ControlError::Notification(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ControlError::Notification(err.to_string()))?;

        if !status.is_success() {
            return Err(ControlError::Notification(provider_message(status, &body)));
        }

        let receipt: EmailReceipt = serde_json::from_str(&body).map_err(|err| {
            ControlError::Notification(format!("unexpected email function response: {err}"))
        })?;
        debug!(message_id = %receipt.id, subject = %message.subject, "email accepted");
        Ok(receipt)
    }
}

fn provider_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ProviderError>(body)
        .ok()
        .and_then(|parsed| parsed.error.or(parsed.message))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("email function returned {status}")
            } else {
                trimmed.to_string()
            }
        })
}

/// Escapes text interpolated into notification HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
