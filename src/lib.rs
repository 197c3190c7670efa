pub mod broker;
pub mod config;
pub mod server;
pub mod utils;

pub use broker::{BrokerCore, BrokerError, BrokerSnapshot, ClientId, ClientSession, PubSubMessage};
pub use config::Config;
