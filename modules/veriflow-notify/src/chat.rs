use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use veriflow_common::{NotificationKind, NotificationRecord, PushMessage};

use crate::dispatcher::NotificationDispatcher;

const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub room_id: String,
    pub text: String,
}

impl ChatMessage {
    pub fn push_message(&self) -> PushMessage {
        PushMessage::new(NotificationKind::NewMessage, self.sender_name.clone(), preview(&self.text))
            .with_data("roomId", self.room_id.clone())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

struct Scheduled {
    generation: u64,
    handle: JoinHandle<()>,
}

type Key = (String, String);

/// Debounces chat pushes per (recipient, room): a new message cancels the
/// pending push and reschedules, so only the latest one is sent.
pub struct ChatDebouncer {
    dispatcher: Arc<NotificationDispatcher>,
    delay: Duration,
    pending: Arc<Mutex<HashMap<Key, Scheduled>>>,
    next_generation: Mutex<u64>,
}

impl ChatDebouncer {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, delay: Duration) -> Self {
        Self {
            dispatcher,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Mutex::new(0),
        }
    }

    pub fn schedule(&self, message: ChatMessage) {
        let key = (message.recipient_id.clone(), message.room_id.clone());
        let generation = {
            let mut next = self.next_generation.lock().unwrap();
            *next += 1;
            *next
        };

        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.remove(&key) {
            previous.handle.abort();
            debug!(recipient = %key.0, room = %key.1, "Rescheduled chat notification");
        }

        let dispatcher = self.dispatcher.clone();
        let registry = self.pending.clone();
        let delay = self.delay;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut pending = registry.lock().unwrap();
                match pending.get(&task_key) {
                    Some(s) if s.generation == generation => {
                        pending.remove(&task_key);
                    }
                    _ => return,
                }
            }

            deliver(&dispatcher, &message).await;
        });

        pending.insert(key, Scheduled { generation, handle });
    }

    /// Conversations with a push still waiting on the debounce window.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Drop for ChatDebouncer {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, scheduled) in pending.drain() {
                scheduled.handle.abort();
            }
        }
    }
}

async fn deliver(dispatcher: &NotificationDispatcher, message: &ChatMessage) {
    let push = message.push_message();
    let record = NotificationRecord::new(
        message.recipient_id.clone(),
        NotificationKind::NewMessage,
        json!({ "title": push.title, "body": push.body, "roomId": message.room_id }),
    )
    .from_sender(message.sender_id.clone());

    if let Err(e) = dispatcher.records().record(&record).await {
        warn!(recipient = %message.recipient_id, error = %e, "Failed to record chat notification");
    }
    dispatcher.notify_user(&message.recipient_id, &push).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_messages_are_truncated() {
        let text = "a".repeat(80);
        assert_eq!(preview(&text), format!("{}...", "a".repeat(50)));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn push_carries_room_id() {
        let msg = ChatMessage {
            sender_id: "u1".into(),
            sender_name: "Nino".into(),
            recipient_id: "u2".into(),
            room_id: "room-7".into(),
            text: "hello".into(),
        };
        let push = msg.push_message();
        assert_eq!(push.title, "Nino");
        assert_eq!(push.data["roomId"], "room-7");
        assert_eq!(push.data["type"], "new_message");
    }
}
