//! Event broadcaster adapter and inbound command transport
//!
//! Outbound room events go through [`EventBroadcaster`], backed by AMQP or by
//! in-process broadcast channels. Inbound room commands are consumed from an
//! AMQP queue and dispatched by a [`CommandHandler`].

pub mod connection;
pub mod handlers;
pub mod local;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{
    process_delivery, CommandFailure, CommandHandler, CommandReply, CoreCommandHandler,
    RoomCommandConsumer,
};
pub use local::LocalBroadcaster;
pub use messages::*;
pub use publisher::{
    publish_or_warn, AmqpEventBroadcaster, EventBroadcaster, MockEventBroadcaster,
    PublisherConfig,
};

#[cfg(test)]
pub use handlers::MockCommandHandler;
