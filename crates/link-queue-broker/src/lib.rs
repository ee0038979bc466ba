pub mod api;
pub mod broker;
pub mod config;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod probe;
pub mod processor;
pub mod queue;

pub use broker::Broker;
pub use config::{BrokerConfig, ConsumerMode};
pub use processor::{ProcessorHandle, QueueProcessor};
pub use queue::RequestQueue;
