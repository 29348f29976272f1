use std::time::Duration;

use amqp_driver::memory::MemoryBroker;
use amqp_driver::{Coordinator, Received, Settings};
use tokio::sync::mpsc;

pub const GRACE: Duration = Duration::from_millis(500);

pub fn coordinator(broker: &MemoryBroker) -> Coordinator<MemoryBroker> {
    Coordinator::new(
        broker.clone(),
        Settings {
            close_timeout: GRACE,
            fail_fast: false,
        },
    )
}

pub fn observed(broker: &MemoryBroker) -> (Coordinator<MemoryBroker>, mpsc::UnboundedReceiver<Received>) {
    let (sink, stream) = mpsc::unbounded_channel();

    (coordinator(broker).with_observer(sink), stream)
}

/// Wait for the next received payload as a string.
pub async fn next_payload(stream: &mut mpsc::UnboundedReceiver<Received>) -> String {
    let received = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("no message arrived in time")
        .expect("observer channel closed");

    String::from_utf8(received.payload).unwrap()
}
