//! Driving a single link from attach to detach.
//!
//! Both roles go through the same states: the link is acquired in `Init`, a message step is
//! repeated in `Running` until the input ends, an error happens or the run is cancelled, then the
//! link is released within a grace period in `Closing`. What one step does is up to the
//! [`MessageStep`] the driver is built with.
use crate::error::DriverError;
use crate::input::LineStream;
use crate::model::LinkLabel;
use crate::transport::{InboundMessage, Link, ReceiverLink, SenderLink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The message a sender link sends right after it is attached.
pub const GREETING: &str = "Hello!";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Running,
    Failed,
    Closing,
    Terminated,
}

#[derive(Debug)]
pub enum LinkOutcome {
    /// The input of the link ended.
    Completed,
    Cancelled,
    Failed(DriverError),
}

/// What a link task returns when it terminates.
#[derive(Debug)]
pub struct LinkReport {
    pub label: LinkLabel,
    pub outcome: LinkOutcome,
    /// Messages sent or received, the greeting included.
    pub messages: usize,
    pub state: LinkState,
}

impl LinkReport {
    pub fn error(&self) -> Option<&DriverError> {
        match &self.outcome {
            LinkOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// A payload received by a receiver link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Received {
    pub link: LinkLabel,
    pub payload: Vec<u8>,
}

pub type ReceivedSink = mpsc::UnboundedSender<Received>;

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// One unit of work of a running link.
#[async_trait]
pub trait MessageStep<L: Send>: Send + 'static {
    /// Operation names used in errors.
    const ATTACH: &'static str;
    const STEP: &'static str;

    /// Runs once when the link is attached and returns the number of messages it moved.
    async fn start(&mut self, _link: &mut L) -> Result<usize> {
        Ok(0)
    }

    /// Moves one message. `Flow::Done` ends the link normally.
    async fn step(&mut self, link: &mut L) -> Result<Flow>;
}

pub struct LinkDriver<S> {
    label: LinkLabel,
    step: S,
    grace: Duration,
    token: CancellationToken,
    state: LinkState,
}

/// Resolves to `None` if the token is cancelled before the future completes.
async fn until_cancelled<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        value = fut => Some(value),
    }
}

impl<S> LinkDriver<S> {
    pub fn new(label: LinkLabel, step: S, grace: Duration, token: CancellationToken) -> Self {
        LinkDriver {
            label,
            step,
            grace,
            token,
            state: LinkState::Init,
        }
    }

    fn transition(&mut self, next: LinkState) {
        trace!("{} {:?} -> {:?}", self.label, self.state, next);

        self.state = next;
    }

    fn report(self, outcome: LinkOutcome, messages: usize) -> LinkReport {
        LinkReport {
            label: self.label,
            outcome,
            messages,
            state: self.state,
        }
    }

    /// Acquire the link with `acquire`, run the message steps on it and release it. Never
    /// returns before the link is released or the grace period of the release is over.
    pub async fn run<L, F>(mut self, acquire: F) -> LinkReport
    where
        L: Link,
        S: MessageStep<L>,
        F: Future<Output = Result<L>> + Send,
    {
        let mut link = match until_cancelled(&self.token, acquire).await {
            None => {
                self.transition(LinkState::Terminated);

                return self.report(LinkOutcome::Cancelled, 0);
            }
            Some(Err(e)) => {
                let err = DriverError::link(&self.label, S::ATTACH, e);

                error!("{}", err);

                // Nothing was acquired, so there is nothing to release.
                self.transition(LinkState::Failed);
                self.transition(LinkState::Terminated);

                return self.report(LinkOutcome::Failed(err), 0);
            }
            Some(Ok(link)) => link,
        };

        info!("Attached {}", self.label);

        self.transition(LinkState::Running);

        let (outcome, messages) = self.drive(&mut link).await;

        match &outcome {
            LinkOutcome::Failed(err) => {
                error!("{}", err);

                self.transition(LinkState::Failed);
            }
            LinkOutcome::Cancelled => debug!("{} cancelled after {} messages", self.label, messages),
            LinkOutcome::Completed => debug!("{} completed after {} messages", self.label, messages),
        }

        self.transition(LinkState::Closing);

        match tokio::time::timeout(self.grace, link.close()).await {
            Ok(Ok(())) => info!("Detached {}", self.label),
            Ok(Err(e)) => warn!("Error closing {}: {:#}", self.label, e),
            Err(_) => warn!("{} was not closed within {:?}", self.label, self.grace),
        }

        self.transition(LinkState::Terminated);

        self.report(outcome, messages)
    }

    async fn drive<L>(&mut self, link: &mut L) -> (LinkOutcome, usize)
    where
        L: Link,
        S: MessageStep<L>,
    {
        let mut messages = match until_cancelled(&self.token, self.step.start(link)).await {
            None => return (LinkOutcome::Cancelled, 0),
            Some(Err(e)) => return (LinkOutcome::Failed(DriverError::link(&self.label, S::STEP, e)), 0),
            Some(Ok(n)) => n,
        };

        loop {
            match until_cancelled(&self.token, self.step.step(link)).await {
                None => return (LinkOutcome::Cancelled, messages),
                Some(Err(e)) => {
                    return (
                        LinkOutcome::Failed(DriverError::link(&self.label, S::STEP, e)),
                        messages,
                    )
                }
                Some(Ok(Flow::Done)) => return (LinkOutcome::Completed, messages),
                Some(Ok(Flow::Continue)) => messages += 1,
            }
        }
    }
}

/// Sends the greeting, then every line of its input as one message.
pub struct SendStep {
    input: LineStream,
}

impl SendStep {
    pub fn new(input: LineStream) -> Self {
        SendStep { input }
    }
}

#[async_trait]
impl<L: SenderLink> MessageStep<L> for SendStep {
    const ATTACH: &'static str = "attach sender";
    const STEP: &'static str = "send message";

    async fn start(&mut self, link: &mut L) -> Result<usize> {
        link.send(GREETING.as_bytes()).await.context("sending greeting")?;

        Ok(1)
    }

    async fn step(&mut self, link: &mut L) -> Result<Flow> {
        let line = match self.input.recv().await {
            Some(line) => line,
            None => return Ok(Flow::Done),
        };

        print!("-> SENDING ...{}", line);

        link.send(line.as_bytes()).await?;

        Ok(Flow::Continue)
    }
}

/// Receives and accepts one message, then prints it and passes it to the observer.
pub struct ReceiveStep {
    label: LinkLabel,
    observer: Option<ReceivedSink>,
}

impl ReceiveStep {
    pub fn new(label: LinkLabel, observer: Option<ReceivedSink>) -> Self {
        ReceiveStep { label, observer }
    }
}

#[async_trait]
impl<L: ReceiverLink> MessageStep<L> for ReceiveStep {
    const ATTACH: &'static str = "attach receiver";
    const STEP: &'static str = "receive message";

    async fn step(&mut self, link: &mut L) -> Result<Flow> {
        let delivery = link.receive().await?;

        link.accept(&delivery).await.context("accepting delivery")?;

        let payload = delivery.payload();

        println!("Message received: {}", String::from_utf8_lossy(&payload));

        if let Some(observer) = &self.observer {
            // Nobody watching any more is not a reason to stop receiving.
            let _ = observer.send(Received {
                link: self.label.clone(),
                payload,
            });
        }

        Ok(Flow::Continue)
    }
}
