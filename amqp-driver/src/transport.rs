//! The capabilities the driver needs from an AMQP implementation.
//!
//! A transport is a family of types: a [`Gateway`] dials a [`Connection`], which opens
//! [`Session`]s, which attach [`SenderLink`]s and [`ReceiverLink`]s. Closing consumes the
//! resource, callers put their own deadline around it.
use crate::model::ConnectionSpec;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    type Connection: Connection;

    async fn dial(&self, spec: &ConnectionSpec) -> Result<Self::Connection>;
}

#[async_trait]
pub trait Connection: Send + 'static {
    type Session: Session;

    async fn open_session(&mut self) -> Result<Self::Session>;

    async fn close(self) -> Result<()>;
}

#[async_trait]
pub trait Session: Send + 'static {
    type Sender: SenderLink;
    type Receiver: ReceiverLink;

    async fn open_sender(&mut self, target: &str) -> Result<Self::Sender>;

    async fn open_receiver(&mut self, source: &str, credit: u32) -> Result<Self::Receiver>;

    async fn close(self) -> Result<()>;
}

/// Common part of both link roles.
#[async_trait]
pub trait Link: Send + 'static {
    async fn close(self) -> Result<()>;
}

#[async_trait]
pub trait SenderLink: Link {
    /// Sends the payload and waits until the peer accepted it.
    async fn send(&mut self, payload: &[u8]) -> Result<()>;
}

#[async_trait]
pub trait ReceiverLink: Link {
    type Delivery: InboundMessage;

    /// Waits for the next delivery. Flow control is up to the implementation, the link must not
    /// hold more unaccepted deliveries than the credit it was opened with.
    async fn receive(&mut self) -> Result<Self::Delivery>;

    /// Settles the delivery as accepted, so the credit it used can be given back to the peer.
    async fn accept(&mut self, delivery: &Self::Delivery) -> Result<()>;
}

pub trait InboundMessage: Send + 'static {
    fn payload(&self) -> Vec<u8>;
}
