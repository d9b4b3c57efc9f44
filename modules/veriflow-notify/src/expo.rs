use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use veriflow_common::PushMessage;

use crate::backend::{PushBackend, PushError};

/// Expo push API backend.
pub struct ExpoPushBackend {
    endpoint: String,
    access_token: Option<String>,
    http: reqwest::Client,
}

impl ExpoPushBackend {
    pub fn new(endpoint: String, access_token: Option<String>) -> Self {
        Self {
            endpoint,
            access_token,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl PushBackend for ExpoPushBackend {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<bool, PushError> {
        let payload = json!({
            "to": token,
            "title": message.title,
            "body": message.body,
            "sound": "default",
            "data": message.data,
        });
        debug!(kind = message.kind.as_str(), "Sending push notification");

        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(access_token) = &self.access_token {
            request = request.bearer_auth(access_token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Push provider returned non-success");
            return Err(PushError::from_status(status.as_u16()));
        }
        Ok(status.as_u16() == 200)
    }
}
