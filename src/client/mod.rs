//! Client-side delivery: two interchangeable strategies over the same room API
//! and the failover controller that picks between them.

mod connector;
mod error;
mod failover;
mod pull;
mod push;

use std::sync::Arc;

use async_trait::async_trait;

use crate::rooms::{Message, MessageId, Participant, RoomSnapshot};

pub use connector::HttpConnector;
pub use error::ClientError;
pub use failover::{ClientUpdate, FailoverController, TransportState};
pub use pull::PullDelivery;
pub use push::PushDelivery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Push,
    Pull,
}

/// What a strategy observed since the last call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Batch {
        messages: Vec<Message>,
        /// Present when the strategy learned the full participant list.
        participants: Option<Vec<Participant>>,
    },
    /// The server dropped our session; join again before continuing.
    SessionLost,
}

/// One way of talking to the room. Implementations know nothing about each other.
#[async_trait]
pub trait DeliveryStrategy: Send {
    fn transport(&self) -> Transport;

    async fn join(&mut self, participant: &Participant) -> Result<RoomSnapshot, ClientError>;

    /// Submits a message and waits until the server has stored it. The stored
    /// message also comes back through [`DeliveryStrategy::next_update`].
    async fn send(&mut self, content: &str) -> Result<Message, ClientError>;

    /// Waits for the next batch of room changes after `cursor`.
    async fn next_update(&mut self, cursor: Option<MessageId>) -> Result<Update, ClientError>;

    /// Explicit leave.
    async fn leave(&mut self) -> Result<(), ClientError>;

    /// Releases transport resources without leaving.
    async fn close(&mut self);
}

/// Opens strategies for the failover controller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_push(&self) -> Result<Box<dyn DeliveryStrategy>, ClientError>;

    fn pull(&self) -> Box<dyn DeliveryStrategy>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect_push(&self) -> Result<Box<dyn DeliveryStrategy>, ClientError> {
        (**self).connect_push().await
    }

    fn pull(&self) -> Box<dyn DeliveryStrategy> {
        (**self).pull()
    }
}
