//! Message dispatch — sends a rendered quiz to the configured endpoints.
//! Supports: Telegram Bot API, generic HTTP webhook.
//!
//! Endpoints are tried in order; the first one that accepts the message
//! wins. Each attempt is bounded so a hung endpoint cannot block the next.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizcast_core::config::{QuizcastConfig, TransportConfig};
use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::traits::Transport;
use quizcast_core::types::PushMessage;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API — `sendMessage` with the group id as chat id.
pub struct TelegramTransport {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &PushMessage) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": message.group_id,
                "text": message.render(),
            }))
            .send()
            .await
            .map_err(|e| QuizcastError::delivery(format!("Telegram send failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(QuizcastError::delivery(format!("Telegram API error {status}: {body}")))
        }
    }
}

/// Generic HTTP webhook — POST with a JSON body.
pub struct WebhookTransport {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(name: impl Into<String>, url: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &PushMessage) -> Result<()> {
        let mut req = self.client.post(&self.url).json(&serde_json::json!({
            "group_id": message.group_id,
            "domain": message.domain_name,
            "problem_ids": message.problem_ids(),
            "mentions": message.mentions,
            "text": message.render(),
        }));
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| QuizcastError::delivery(format!("Webhook send failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(QuizcastError::delivery(format!("Webhook error {}", resp.status())))
        }
    }
}

/// Ordered endpoint list plus the per-attempt bound.
#[derive(Clone)]
pub struct Dispatcher {
    transports: Vec<Arc<dyn Transport>>,
    attempt_timeout: Duration,
}

impl Dispatcher {
    pub fn new(transports: Vec<Arc<dyn Transport>>, attempt_timeout: Duration) -> Self {
        Self {
            transports,
            attempt_timeout,
        }
    }

    /// Build the endpoint list from `[[transports]]`, in file order.
    pub fn from_config(config: &QuizcastConfig) -> Self {
        let transports = config
            .transports
            .iter()
            .map(|t| -> Arc<dyn Transport> {
                match t {
                    TransportConfig::Telegram { bot_token, api_base } => {
                        Arc::new(TelegramTransport::new(bot_token.clone(), api_base.clone()))
                    }
                    TransportConfig::Webhook { url, name, headers } => Arc::new(WebhookTransport::new(
                        name.clone().unwrap_or_else(|| "webhook".to_string()),
                        url.clone(),
                        headers.clone(),
                    )),
                }
            })
            .collect();
        Self::new(
            transports,
            Duration::from_secs(config.delivery.attempt_timeout_secs),
        )
    }

    pub fn endpoint_count(&self) -> usize {
        self.transports.len()
    }

    /// Try every endpoint in turn until one accepts the message.
    /// Returns the name of the endpoint that delivered it.
    pub async fn deliver(&self, message: &PushMessage) -> Result<String> {
        if self.transports.is_empty() {
            return Err(QuizcastError::delivery("no transport endpoint configured"));
        }

        let mut timeouts = 0;
        for transport in &self.transports {
            match tokio::time::timeout(self.attempt_timeout, transport.send(message)).await {
                Ok(Ok(())) => {
                    tracing::info!(
                        "✅ Quiz for group {} sent via {}",
                        message.group_id,
                        transport.name()
                    );
                    return Ok(transport.name().to_string());
                }
                Ok(Err(e)) => {
                    tracing::debug!("📭 Endpoint {} failed: {e}", transport.name());
                }
                Err(_) => {
                    timeouts += 1;
                    tracing::debug!(
                        "⏱️ Endpoint {} timed out after {:?}",
                        transport.name(),
                        self.attempt_timeout
                    );
                }
            }
        }

        if timeouts == self.transports.len() {
            return Err(QuizcastError::Timeout(format!(
                "all {} endpoints timed out after {:?} for group {}",
                timeouts, self.attempt_timeout, message.group_id
            )));
        }
        Err(QuizcastError::delivery(format!(
            "all {} endpoints failed for group {}",
            self.transports.len(),
            message.group_id
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::FakeTransport;
    use super::*;
    use quizcast_core::types::Problem;

    fn message() -> PushMessage {
        PushMessage {
            group_id: "100".into(),
            domain_name: "rust".into(),
            problems: vec![Problem {
                id: 1,
                domain_id: 1,
                question: "q".into(),
                answer: "a".into(),
            }],
            mentions: vec![],
        }
    }

    #[tokio::test]
    async fn test_first_success_stops() {
        let a = FakeTransport::ok("a");
        let b = FakeTransport::ok("b");
        let dispatcher = Dispatcher::new(vec![a.clone(), b.clone()], Duration::from_secs(1));
        assert_eq!(dispatcher.deliver(&message()).await.unwrap(), "a");
        assert_eq!(a.sent_count(), 1);
        assert_eq!(b.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_through_failures() {
        let a = FakeTransport::failing("a");
        let b = FakeTransport::ok("b");
        let dispatcher = Dispatcher::new(vec![a, b.clone()], Duration::from_secs(1));
        assert_eq!(dispatcher.deliver(&message()).await.unwrap(), "b");
        assert_eq!(b.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_hung_endpoint_is_bounded() {
        let slow = FakeTransport::slow("slow", Duration::from_secs(30));
        let b = FakeTransport::ok("b");
        let dispatcher = Dispatcher::new(vec![slow.clone(), b.clone()], Duration::from_millis(50));
        let started = std::time::Instant::now();
        assert_eq!(dispatcher.deliver(&message()).await.unwrap(), "b");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(slow.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_all_fail() {
        let dispatcher = Dispatcher::new(
            vec![FakeTransport::failing("a"), FakeTransport::failing("b")],
            Duration::from_secs(1),
        );
        let err = dispatcher.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, QuizcastError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_all_timed_out() {
        let dispatcher = Dispatcher::new(
            vec![
                FakeTransport::slow("a", Duration::from_secs(30)),
                FakeTransport::slow("b", Duration::from_secs(30)),
            ],
            Duration::from_millis(20),
        );
        let err = dispatcher.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, QuizcastError::Timeout(_)));

        // A mix of timeouts and refusals is a plain delivery failure.
        let dispatcher = Dispatcher::new(
            vec![
                FakeTransport::slow("a", Duration::from_secs(30)),
                FakeTransport::failing("b"),
            ],
            Duration::from_millis(20),
        );
        let err = dispatcher.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, QuizcastError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let dispatcher = Dispatcher::new(vec![], Duration::from_secs(1));
        assert!(dispatcher.deliver(&message()).await.is_err());
    }

    #[test]
    fn test_from_config_keeps_order() {
        let config = QuizcastConfig::parse(
            r#"
[[transports]]
kind = "webhook"
url = "http://localhost:9/hook"
name = "backup"

[[transports]]
kind = "telegram"
bot_token = "123:abc"
"#,
        )
        .unwrap();
        let dispatcher = Dispatcher::from_config(&config);
        let names: Vec<&str> = dispatcher.transports.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["backup", "telegram"]);
    }
}
