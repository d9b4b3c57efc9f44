pub mod broker;
pub mod error;
pub mod manager;
pub mod memory;
pub mod pg;
pub mod types;

pub use broker::Broker;
pub use error::BrokerError;
pub use manager::{MessageHandler, QueueManager, SubscribeOptions, SubscriptionHandle};
pub use memory::MemoryBroker;
pub use pg::PgBroker;
pub use types::{FlowControl, ReceivedMessage, SubscriptionConfig};
