use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FactCheckStarted,
    FactCheckCompleted,
    FactCheckFailed,
    VideoAnalysisComplete,
    VideoTooLong,
    Like,
    Impression,
    NewMessage,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::FactCheckStarted => "fact_check_started",
            NotificationKind::FactCheckCompleted => "fact_check_completed",
            NotificationKind::FactCheckFailed => "fact_check_failed",
            NotificationKind::VideoAnalysisComplete => "video_analysis_complete",
            NotificationKind::VideoTooLong => "video_too_long",
            NotificationKind::Like => "like",
            NotificationKind::Impression => "impression",
            NotificationKind::NewMessage => "new_message",
        }
    }
}

/// What gets pushed to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Extra payload for the client; always carries `type`.
    pub data: Value,
}

impl PushMessage {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            data: serde_json::json!({ "type": kind.as_str() }),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn for_verification(self, id: Uuid) -> Self {
        self.with_data("verificationId", id.to_string())
    }
}

/// Persisted record of a notification. Write-once apart from `read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient: String,
    #[serde(default)]
    pub sender: Option<String>,
    pub kind: NotificationKind,
    #[serde(default)]
    pub verification_id: Option<Uuid>,
    pub payload: Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(recipient: impl Into<String>, kind: NotificationKind, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            sender: None,
            kind,
            verification_id: None,
            payload,
            read: false,
            created_at: Utc::now(),
        }
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn about(mut self, verification_id: Uuid) -> Self {
        self.verification_id = Some(verification_id);
        self
    }
}
