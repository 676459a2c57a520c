use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::RwLock;
use tokio::time::sleep;

use super::types::{PushTicketResponse, RetryConfig};
use super::{NotificationBridge, NotifyError, OfferNotice};

pub const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Sends offers through the Expo push service.
///
/// Transient failures (429, 5xx, network) are retried with exponential
/// backoff. Tokens registered through [`NotificationBridge::register_token`]
/// are kept in memory and, when a path is configured, mirrored to a JSON file.
pub struct ExpoPushBridge {
    client: Client,
    endpoint: String,
    access_token: String,
    retry: RetryConfig,
    tokens: RwLock<HashMap<String, String>>,
    tokens_path: Option<PathBuf>,
}

impl ExpoPushBridge {
    pub fn new(access_token: String, retry: RetryConfig) -> Result<Self, NotifyError> {
        Self::with_endpoint(EXPO_PUSH_URL.to_string(), access_token, retry)
    }

    /// Create a bridge pointing at a custom endpoint (useful for testing).
    pub fn with_endpoint(
        endpoint: String,
        access_token: String,
        retry: RetryConfig,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            access_token,
            retry,
            tokens: RwLock::new(HashMap::new()),
            tokens_path: None,
        })
    }

    /// Back the token registry with `path`, loading whatever it already holds.
    pub async fn with_token_file(mut self, path: PathBuf) -> Result<Self, NotifyError> {
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) if !contents.trim().is_empty() => {
                let stored: HashMap<String, String> = serde_json::from_str(&contents)
                    .map_err(|e| NotifyError::TokenStore(format!("{}: {e}", path.display())))?;
                *self.tokens.get_mut() = stored;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(NotifyError::TokenStore(e.to_string())),
        }
        self.tokens_path = Some(path);
        Ok(self)
    }

    pub async fn token_for(&self, contractor_id: &str) -> Option<String> {
        self.tokens.read().await.get(contractor_id).cloned()
    }

    async fn send_once(&self, notice: &OfferNotice, token: &str) -> Result<Option<String>, NotifyError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json")
            .header("accept-encoding", "gzip, deflate")
            .header("content-type", "application/json")
            .json(&notice.to_push(token));
        if !self.access_token.is_empty() {
            request = request.bearer_auth(&self.access_token);
        }
        let response = request.send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(self.retry.base_delay_ms);
            return Err(NotifyError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(NotifyError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<PushTicketResponse>().await?;
        match body.data {
            Some(ticket) if ticket.status == "error" => Err(NotifyError::Rejected(
                ticket.message.unwrap_or_else(|| "unknown push error".to_string()),
            )),
            Some(ticket) => Ok(ticket.id),
            // Accepted without a ticket id.
            None => Ok(None),
        }
    }

    async fn persist_tokens(&self, tokens: &HashMap<String, String>) -> Result<(), NotifyError> {
        let Some(path) = &self.tokens_path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(tokens)
            .map_err(|e| NotifyError::TokenStore(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| NotifyError::TokenStore(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl NotificationBridge for ExpoPushBridge {
    async fn notify_offer(&self, notice: &OfferNotice) -> Result<Option<String>, NotifyError> {
        let contractor_id = &notice.assignment.contractor_id;
        let token = self
            .token_for(contractor_id)
            .await
            .ok_or_else(|| NotifyError::NoToken(contractor_id.clone()))?;

        let mut attempt = 0;
        loop {
            match self.send_once(notice, &token).await {
                Ok(ticket) => return Ok(ticket),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay_ms = match &e {
                        NotifyError::RateLimited { retry_after_ms } => *retry_after_ms,
                        _ => self.retry.delay_for_attempt(attempt),
                    };
                    tracing::debug!(
                        assignment_id = %notice.assignment.id,
                        attempt,
                        max = self.retry.max_retries,
                        delay_ms,
                        error = %e,
                        "Retrying push delivery"
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn register_token(&self, contractor_id: &str, token: &str) -> Result<(), NotifyError> {
        let mut tokens = self.tokens.write().await;
        let mut updated = tokens.clone();
        updated.insert(contractor_id.to_string(), token.to_string());
        self.persist_tokens(&updated).await?;
        *tokens = updated;
        Ok(())
    }
}
