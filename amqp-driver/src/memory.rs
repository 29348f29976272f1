//! In-process broker implementing the transport traits.
//!
//! Every address is a FIFO queue shared by all the connections dialed through the same
//! [`MemoryBroker`]. Receivers on the same address compete for messages. Faults can be injected
//! to make dials, sessions, links or sends fail.
use crate::model::{Authentication, ConnectionSpec};
use crate::transport::{self, InboundMessage};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::trace;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

/// Counters of the resources opened and closed through the broker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub links_opened: usize,
    pub links_closed: usize,
}

#[derive(Default)]
struct Faults {
    credentials: Option<(String, String)>,
    refuse_dial: bool,
    refused_sessions: HashSet<usize>,
    refused_addresses: HashSet<String>,
    failing_sends: HashSet<String>,
    stalled_sends: HashSet<String>,
}

struct Queue {
    sink: mpsc::UnboundedSender<Vec<u8>>,
    stream: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// Every payload ever sent to the address, in order.
    history: Mutex<Vec<Vec<u8>>>,
    max_in_flight: AtomicUsize,
}

impl Queue {
    fn new() -> Self {
        let (sink, stream) = mpsc::unbounded_channel();

        Queue {
            sink,
            stream: tokio::sync::Mutex::new(stream),
            history: Mutex::new(vec![]),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    faults: Mutex<Faults>,
    stats: Mutex<BrokerStats>,
    next_delivery: AtomicU64,
}

impl BrokerState {
    fn queue(&self, address: &str) -> Arc<Queue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());

        queues
            .entry(address.to_owned())
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_stats(&self, f: impl FnOnce(&mut BrokerStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

/// Handle to the broker. Clones share the same queues, faults and counters.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

pub struct MemoryConnection {
    state: Arc<BrokerState>,
}

pub struct MemorySession {
    index: usize,
    state: Arc<BrokerState>,
}

pub struct MemorySender {
    address: String,
    queue: Arc<Queue>,
    state: Arc<BrokerState>,
}

pub struct MemoryReceiver {
    address: String,
    queue: Arc<Queue>,
    state: Arc<BrokerState>,
    credit: Semaphore,
    unsettled: HashSet<u64>,
}

#[derive(Debug)]
pub struct MemoryDelivery {
    id: u64,
    payload: Vec<u8>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only SASL PLAIN with the given credentials.
    pub fn require_credentials(self, username: &str, password: &str) -> Self {
        self.state.faults().credentials = Some((username.to_owned(), password.to_owned()));
        self
    }

    pub fn refuse_dial(self) -> Self {
        self.state.faults().refuse_dial = true;
        self
    }

    /// Refuse to open the session with the given zero based sequence number.
    pub fn refuse_session(self, index: usize) -> Self {
        self.state.faults().refused_sessions.insert(index);
        self
    }

    /// Refuse to attach any link to the address.
    pub fn refuse_address(self, address: &str) -> Self {
        self.state.faults().refused_addresses.insert(address.to_owned());
        self
    }

    /// Reject every message sent to the address.
    pub fn fail_sends(self, address: &str) -> Self {
        self.state.faults().failing_sends.insert(address.to_owned());
        self
    }

    /// Sends to the address never complete.
    pub fn stall_sends(self, address: &str) -> Self {
        self.state.faults().stalled_sends.insert(address.to_owned());
        self
    }

    /// Put a message on the address as if a peer had sent it.
    pub fn publish(&self, address: &str, payload: &[u8]) {
        let queue = self.state.queue(address);

        enqueue(&queue, payload);
    }

    /// All the payloads sent to the address so far.
    pub fn published(&self, address: &str) -> Vec<Vec<u8>> {
        self.state
            .queue(address)
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The highest number of unaccepted deliveries a single receiver of the address ever held.
    pub fn max_in_flight(&self, address: &str) -> usize {
        self.state.queue(address).max_in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BrokerStats {
        self.state.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn enqueue(queue: &Queue, payload: &[u8]) {
    queue
        .history
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(payload.to_vec());

    // The queue owns its stream, so the channel cannot be closed here.
    let _ = queue.sink.send(payload.to_vec());
}

#[async_trait]
impl transport::Gateway for MemoryBroker {
    type Connection = MemoryConnection;

    async fn dial(&self, spec: &ConnectionSpec) -> Result<MemoryConnection> {
        {
            let faults = self.state.faults();

            if faults.refuse_dial {
                bail!("connection refused by {}", spec.container);
            }

            if let Some((username, password)) = &faults.credentials {
                match &spec.auth {
                    Authentication::Plain {
                        username: u,
                        password: p,
                    } if u == username && p == password => (),
                    _ => bail!("authentication failed"),
                }
            }
        }

        self.state.update_stats(|s| s.connections_opened += 1);

        Ok(MemoryConnection {
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl transport::Connection for MemoryConnection {
    type Session = MemorySession;

    async fn open_session(&mut self) -> Result<MemorySession> {
        let mut index = 0;

        self.state.update_stats(|s| {
            index = s.sessions_opened;
            s.sessions_opened += 1;
        });

        if self.state.faults().refused_sessions.contains(&index) {
            bail!("session #{} refused", index);
        }

        Ok(MemorySession {
            index,
            state: self.state.clone(),
        })
    }

    async fn close(self) -> Result<()> {
        self.state.update_stats(|s| s.connections_closed += 1);

        Ok(())
    }
}

impl MemorySession {
    fn check_address(&self, address: &str) -> Result<()> {
        if self.state.faults().refused_addresses.contains(address) {
            bail!("attach to {} refused", address);
        }

        self.state.update_stats(|s| s.links_opened += 1);

        trace!("Session #{} attached link to {}", self.index, address);

        Ok(())
    }
}

#[async_trait]
impl transport::Session for MemorySession {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    async fn open_sender(&mut self, target: &str) -> Result<MemorySender> {
        self.check_address(target)?;

        Ok(MemorySender {
            address: target.to_owned(),
            queue: self.state.queue(target),
            state: self.state.clone(),
        })
    }

    async fn open_receiver(&mut self, source: &str, credit: u32) -> Result<MemoryReceiver> {
        self.check_address(source)?;

        Ok(MemoryReceiver {
            address: source.to_owned(),
            queue: self.state.queue(source),
            state: self.state.clone(),
            credit: Semaphore::new(credit as usize),
            unsettled: HashSet::new(),
        })
    }

    async fn close(self) -> Result<()> {
        self.state.update_stats(|s| s.sessions_closed += 1);

        Ok(())
    }
}

#[async_trait]
impl transport::Link for MemorySender {
    async fn close(self) -> Result<()> {
        self.state.update_stats(|s| s.links_closed += 1);

        Ok(())
    }
}

#[async_trait]
impl transport::SenderLink for MemorySender {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let (failing, stalled) = {
            let faults = self.state.faults();

            (
                faults.failing_sends.contains(&self.address),
                faults.stalled_sends.contains(&self.address),
            )
        };

        if failing {
            bail!("message to {} rejected", self.address);
        }

        if stalled {
            std::future::pending::<()>().await;
        }

        enqueue(&self.queue, payload);

        Ok(())
    }
}

#[async_trait]
impl transport::Link for MemoryReceiver {
    async fn close(self) -> Result<()> {
        self.state.update_stats(|s| s.links_closed += 1);

        Ok(())
    }
}

#[async_trait]
impl transport::ReceiverLink for MemoryReceiver {
    type Delivery = MemoryDelivery;

    async fn receive(&mut self) -> Result<MemoryDelivery> {
        // One permit per unaccepted delivery, given back on accept.
        let permit = self.credit.acquire().await?;
        let payload = self
            .queue
            .stream
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow!("queue {} is gone", self.address))?;

        permit.forget();

        let id = self.state.next_delivery.fetch_add(1, Ordering::SeqCst);

        self.unsettled.insert(id);
        self.queue
            .max_in_flight
            .fetch_max(self.unsettled.len(), Ordering::SeqCst);

        Ok(MemoryDelivery { id, payload })
    }

    async fn accept(&mut self, delivery: &MemoryDelivery) -> Result<()> {
        if !self.unsettled.remove(&delivery.id) {
            bail!("delivery {} is not unsettled on {}", delivery.id, self.address);
        }

        self.credit.add_permits(1);

        Ok(())
    }
}

impl InboundMessage for MemoryDelivery {
    fn payload(&self) -> Vec<u8> {
        self.payload.clone()
    }
}
