pub mod config;
pub mod error;
pub mod events;
pub mod notification;
pub mod retry;
pub mod types;
pub mod validity;

pub use config::{Config, TopicBinding};
pub use error::PipelineError;
pub use events::*;
pub use notification::{NotificationKind, NotificationRecord, PushMessage};
pub use retry::{retry, RetryPolicy};
pub use types::*;
pub use validity::valid_until;
