pub mod backend;
pub mod chat;
pub mod dispatcher;
pub mod expo;
pub mod memory;

pub use backend::{PushBackend, PushError};
pub use chat::{ChatDebouncer, ChatMessage};
pub use dispatcher::{DispatchReport, DispatchSettings, Interaction, InteractionOutcome, NotificationDispatcher};
pub use expo::ExpoPushBackend;
pub use memory::{MemoryPushBackend, NoopBackend, SentPush};
