//! In-process event bus: channels, broker and router.

mod broker;
mod channel;
mod message;
mod router;

pub use broker::{InMemoryBroker, MessageBroker, Subscription, SubscriptionId};
pub use channel::{Channel, UnknownChannel};
pub use message::{Message, Payload};
pub use router::{
    DEFAULT_POLL_TIMEOUT, NodeFailure, NodeResult, Readiness, Router, RouterContext, RouterError,
    RouterReport,
};
