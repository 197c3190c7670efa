pub mod broker_core;
pub mod directory;
pub mod dispatcher;
pub mod errors;
pub(crate) mod radix_tree;
pub mod registry;
pub mod snapshot;
pub mod topic;
pub mod types;

pub use broker_core::*;
pub use directory::{ClientDirectory, DeliveryHandle};
pub use dispatcher::Dispatcher;
pub use errors::*;
pub use registry::SubscriptionRegistry;
pub use snapshot::*;
pub use topic::{FilterSegment, TopicFilter, TopicPath};
pub use types::*;
