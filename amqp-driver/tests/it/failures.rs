use crate::helper;
use amqp_driver::memory::MemoryBroker;
use amqp_driver::*;

#[tokio::test]
async fn refused_dial_spawns_no_session() {
    let broker = MemoryBroker::new().refuse_dial();
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![vec![LinkSpec::sender("q1")]]);

    let err = coordinator.run(&config).await.unwrap_err();

    assert_eq!(err.scope, ErrorScope::Connection);
    assert_eq!(err.operation, "dial");
    assert_eq!(broker.stats().sessions_opened, 0);
}

#[tokio::test]
async fn wrong_credentials_are_fatal() {
    let broker = MemoryBroker::new().require_credentials("admin", "secret");
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![vec![LinkSpec::receiver("q1", 1)]]);

    let err = coordinator.run(&config).await.unwrap_err();

    assert_eq!(err.to_string(), "dial: authentication failed");
}

#[tokio::test]
async fn failed_session_does_not_stop_the_others() {
    let broker = MemoryBroker::new().refuse_session(0);
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![vec![LinkSpec::sender("a")], vec![LinkSpec::sender("b")]]);

    let report = coordinator.run(&config).await.unwrap();

    assert_eq!(report.spawned(), 1);
    assert_eq!(report.session_errors.len(), 1);
    assert_eq!(report.session_errors[0].scope, ErrorScope::Session(0));
    assert!(!report.is_success());
    assert_eq!(broker.published("b"), vec![b"Hello!".to_vec()]);
    assert_eq!(broker.stats().connections_closed, 1);
}

#[tokio::test]
async fn failing_sender_leaves_healthy_receiver_running() {
    let broker = MemoryBroker::new().fail_sends("broken");
    let (coordinator, mut received) = helper::observed(&broker);
    let config = crate::config(vec![vec![LinkSpec::sender("broken"), LinkSpec::receiver("q1", 1)]]);
    let mut inputs = InputRouter::new();

    let run = coordinator.start(&config, &mut inputs).await.unwrap();

    broker.publish("q1", b"still alive");

    assert_eq!(helper::next_payload(&mut received).await, "still alive");

    coordinator.cancellation_token().cancel();

    let report = run.wait().await;
    let err = report.first_error().unwrap();

    assert_eq!(err.operation, "send message");
    assert_eq!(err.link.as_ref().unwrap().address, "broken");
    assert_eq!(report.failures().count(), 1);

    let receiver = report.links.iter().find(|l| l.label.role == Role::Receiver).unwrap();

    assert!(matches!(receiver.outcome, LinkOutcome::Cancelled));

    let message = report.into_result().unwrap_err().to_string();

    assert!(message.contains("send message on sender link #0.0 (broken)"), "{message}");
}

#[tokio::test]
async fn fail_fast_cancels_the_siblings() {
    let broker = MemoryBroker::new().refuse_address("missing");
    let coordinator = Coordinator::new(
        broker.clone(),
        Settings {
            close_timeout: helper::GRACE,
            fail_fast: true,
        },
    );
    let config = crate::config(vec![vec![LinkSpec::receiver("q1", 1), LinkSpec::receiver("missing", 1)]]);

    let report = coordinator.run(&config).await.unwrap();

    assert_eq!(report.links.len(), 2);
    assert_eq!(report.first_error().unwrap().operation, "attach receiver");
    assert!(report
        .links
        .iter()
        .any(|l| l.label.address == "q1" && matches!(l.outcome, LinkOutcome::Cancelled)));
}
