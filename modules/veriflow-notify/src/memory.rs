use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;
use veriflow_common::PushMessage;

use crate::backend::{PushBackend, PushError};

/// Push backend that only logs. Used when no provider is configured.
pub struct NoopBackend;

#[async_trait]
impl PushBackend for NoopBackend {
    async fn send(&self, _token: &str, message: &PushMessage) -> Result<bool, PushError> {
        info!(kind = message.kind.as_str(), title = %message.title, "Push delivery disabled");
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct SentPush {
    pub token: String,
    pub message: PushMessage,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    sent: Vec<SentPush>,
    attempts: usize,
    rejected: HashSet<String>,
    flaky: HashMap<String, u32>,
}

/// Records deliveries for assertions. Tokens can be set to fail.
#[derive(Default)]
pub struct MemoryPushBackend {
    state: Mutex<State>,
}

impl MemoryPushBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `token` fails with a client error.
    pub fn reject(&self, token: &str) {
        self.state.lock().unwrap().rejected.insert(token.to_string());
    }

    /// The next `n` sends to `token` fail with a 503.
    pub fn fail_times(&self, token: &str, n: u32) {
        self.state.lock().unwrap().flaky.insert(token.to_string(), n);
    }

    pub fn sent(&self) -> Vec<SentPush> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, token: &str) -> Vec<PushMessage> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|s| s.token == token)
            .map(|s| s.message.clone())
            .collect()
    }

    /// Calls to `send`, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

#[async_trait]
impl PushBackend for MemoryPushBackend {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<bool, PushError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.rejected.contains(token) {
            return Err(PushError::Client(400));
        }
        if let Some(remaining) = state.flaky.get_mut(token) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PushError::Server(503));
            }
        }
        state.sent.push(SentPush {
            token: token.to_string(),
            message: message.clone(),
            at: Instant::now(),
        });
        Ok(true)
    }
}
