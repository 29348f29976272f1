//! AMQP 1.0 transport on top of `fe2o3-amqp`.
use crate::model::{Authentication, ConnectionSpec};
use crate::transport::{self, InboundMessage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::{Body, Message};
use fe2o3_amqp::types::primitives::{Binary, Value};
use fe2o3_amqp::{Connection, Delivery, Receiver, Sender, Session};
use log::debug;

/// Dials real brokers.
#[derive(Clone, Debug, Default)]
pub struct AmqpGateway;

pub struct AmqpConnection {
    handle: ConnectionHandle<()>,
}

pub struct AmqpSession {
    handle: SessionHandle<()>,
}

pub struct AmqpSender {
    sender: Sender,
}

pub struct AmqpReceiver {
    receiver: Receiver,
}

pub struct AmqpDelivery {
    delivery: Delivery<Body<Value>>,
}

fn sasl_profile(auth: &Authentication) -> SaslProfile {
    match auth {
        Authentication::Anonymous => SaslProfile::Anonymous,
        Authentication::Plain { username, password } => SaslProfile::Plain {
            username: username.clone(),
            password: password.clone(),
        },
    }
}

fn unique_name(prefix: &str) -> String {
    format!("amqp-cli-{}-{}", prefix, uuid::Uuid::new_v4().as_hyphenated())
}

#[async_trait]
impl transport::Gateway for AmqpGateway {
    type Connection = AmqpConnection;

    async fn dial(&self, spec: &ConnectionSpec) -> Result<AmqpConnection> {
        let container_id = unique_name("connection");

        debug!("Opening connection {} to {}", container_id, spec.container);

        let handle = Connection::builder()
            .container_id(container_id)
            .sasl_profile(sasl_profile(&spec.auth))
            .open(spec.container.as_str())
            .await
            .with_context(|| format!("connecting to {}", spec.container))?;

        Ok(AmqpConnection { handle })
    }
}

#[async_trait]
impl transport::Connection for AmqpConnection {
    type Session = AmqpSession;

    async fn open_session(&mut self) -> Result<AmqpSession> {
        let handle = Session::begin(&mut self.handle).await?;

        Ok(AmqpSession { handle })
    }

    async fn close(mut self) -> Result<()> {
        self.handle.close().await?;

        Ok(())
    }
}

#[async_trait]
impl transport::Session for AmqpSession {
    type Sender = AmqpSender;
    type Receiver = AmqpReceiver;

    async fn open_sender(&mut self, target: &str) -> Result<AmqpSender> {
        let sender = Sender::builder()
            .name(unique_name("sender"))
            .target(target)
            .attach(&mut self.handle)
            .await?;

        Ok(AmqpSender { sender })
    }

    async fn open_receiver(&mut self, source: &str, credit: u32) -> Result<AmqpReceiver> {
        let receiver = Receiver::builder()
            .name(unique_name("receiver"))
            .source(source)
            .credit_mode(CreditMode::Auto(credit))
            .attach(&mut self.handle)
            .await?;

        Ok(AmqpReceiver { receiver })
    }

    async fn close(mut self) -> Result<()> {
        self.handle.end().await?;

        Ok(())
    }
}

#[async_trait]
impl transport::Link for AmqpSender {
    async fn close(self) -> Result<()> {
        self.sender.close().await?;

        Ok(())
    }
}

#[async_trait]
impl transport::SenderLink for AmqpSender {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let message = Message::builder().data(Binary::from(payload.to_vec())).build();
        let outcome = self.sender.send(message).await?;

        outcome
            .accepted_or_else(|outcome| outcome)
            .map_err(|outcome| anyhow!("message was not accepted: {:?}", outcome))?;

        Ok(())
    }
}

#[async_trait]
impl transport::Link for AmqpReceiver {
    async fn close(self) -> Result<()> {
        self.receiver.close().await?;

        Ok(())
    }
}

#[async_trait]
impl transport::ReceiverLink for AmqpReceiver {
    type Delivery = AmqpDelivery;

    async fn receive(&mut self) -> Result<AmqpDelivery> {
        let delivery = self.receiver.recv::<Body<Value>>().await?;

        Ok(AmqpDelivery { delivery })
    }

    async fn accept(&mut self, delivery: &AmqpDelivery) -> Result<()> {
        self.receiver.accept(&delivery.delivery).await?;

        Ok(())
    }
}

impl InboundMessage for AmqpDelivery {
    fn payload(&self) -> Vec<u8> {
        body_bytes(self.delivery.message().body.clone())
    }
}

/// Flattens a message body into bytes. Data sections are concatenated, string and binary values
/// are taken as they are and everything else is rendered with `Debug`.
fn body_bytes(body: Body<Value>) -> Vec<u8> {
    let body = match body.try_into_data() {
        Ok(sections) => return sections.flat_map(|bin| bin.into_vec()).collect(),
        Err(body) => body,
    };

    match body.try_into_value() {
        Ok(Value::String(s)) => s.into_bytes(),
        Ok(Value::Binary(bin)) => bin.into_vec(),
        Ok(other) => format!("{other:?}").into_bytes(),
        Err(Body::Empty) => vec![],
        Err(other) => format!("{other:?}").into_bytes(),
    }
}
