use std::time::{Duration, Instant};

use crate::helper;
use amqp_driver::memory::MemoryBroker;
use amqp_driver::*;

#[tokio::test]
async fn cancellation_unblocks_every_suspended_link() {
    let broker = MemoryBroker::new().stall_sends("stuck");
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![
        // blocked on an empty queue
        vec![LinkSpec::receiver("empty", 1), LinkSpec::receiver("empty", 1)],
        // blocked on input which never comes
        vec![LinkSpec::sender("idle")],
        // blocked in the transport
        vec![LinkSpec::sender("stuck")],
    ]);
    let mut inputs = InputRouter::new();

    let run = coordinator.start(&config, &mut inputs).await.unwrap();

    assert_eq!(run.spawned(), 4);

    let waiting = tokio::spawn(run.wait());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancelled_at = Instant::now();
    coordinator.cancellation_token().cancel();

    let report = waiting.await.unwrap();

    assert!(cancelled_at.elapsed() < helper::GRACE * 2);
    assert_eq!(report.links.len(), 4);
    assert!(report.is_success(), "{report}");
    assert!(report
        .links
        .iter()
        .all(|l| l.state == LinkState::Terminated && matches!(l.outcome, LinkOutcome::Cancelled)));
    assert_eq!(broker.stats().links_closed, 4);

    drop(inputs);
}

#[tokio::test]
async fn cancelled_before_dial_is_an_error() {
    let broker = MemoryBroker::new();
    let coordinator = helper::coordinator(&broker);

    coordinator.cancellation_token().cancel();

    let err = coordinator
        .run(&crate::config(vec![vec![LinkSpec::sender("q1")]]))
        .await
        .unwrap_err();

    assert_eq!(err.scope, ErrorScope::Connection);
    assert_eq!(broker.stats().connections_opened, 0);
}
