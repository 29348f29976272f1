use crate::helper;
use amqp_driver::memory::MemoryBroker;
use amqp_driver::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn sender_and_receiver_on_the_same_queue() {
    let broker = MemoryBroker::new().require_credentials("guest", "guest");
    let (coordinator, mut received) = helper::observed(&broker);
    let config = crate::config(vec![vec![LinkSpec::sender("q1"), LinkSpec::receiver("q1", 10)]]);
    let mut inputs = InputRouter::new();

    let run = coordinator.start(&config, &mut inputs).await.unwrap();

    assert_eq!(run.spawned(), 2);

    let input: &[u8] = b"ping\n";
    let lines = inputs.run(input, CancellationToken::new()).await.unwrap();

    assert_eq!(lines, 1);
    assert_eq!(helper::next_payload(&mut received).await, "Hello!");
    assert_eq!(helper::next_payload(&mut received).await, "ping\n");

    coordinator.cancellation_token().cancel();

    let report = run.wait().await;

    assert!(report.is_success(), "{report}");
    assert_eq!(report.spawned(), 2);

    let sender = report.links.iter().find(|l| l.label.role == Role::Sender).unwrap();
    let receiver = report.links.iter().find(|l| l.label.role == Role::Receiver).unwrap();

    assert!(matches!(sender.outcome, LinkOutcome::Completed));
    assert_eq!(sender.messages, 2);
    assert!(matches!(receiver.outcome, LinkOutcome::Cancelled));
    assert_eq!(receiver.messages, 2);
    assert_eq!(broker.published("q1"), vec![b"Hello!".to_vec(), b"ping\n".to_vec()]);
}

#[tokio::test]
async fn addressed_lines_reach_only_their_sender() {
    let broker = MemoryBroker::new();
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![vec![LinkSpec::sender("a")], vec![LinkSpec::sender("b")]]);
    let mut inputs = InputRouter::new();

    let run = coordinator.start(&config, &mut inputs).await.unwrap();

    let input: &[u8] = b"@b for b\nfor all\n";
    inputs.run(input, CancellationToken::new()).await.unwrap();

    let report = run.wait().await;

    assert!(report.is_success(), "{report}");
    assert_eq!(broker.published("a"), vec![b"Hello!".to_vec(), b"for all\n".to_vec()]);
    assert_eq!(
        broker.published("b"),
        vec![b"Hello!".to_vec(), b"for b\n".to_vec(), b"for all\n".to_vec()]
    );
}

#[tokio::test]
async fn receiver_settles_each_delivery_before_the_next() {
    let broker = MemoryBroker::new();
    let (coordinator, mut received) = helper::observed(&broker);
    let config = crate::config(vec![vec![LinkSpec::receiver("q1", 3)]]);

    for i in 0..20 {
        broker.publish("q1", format!("message {i}").as_bytes());
    }

    let run = coordinator.start(&config, &mut InputRouter::new()).await.unwrap();

    for i in 0..20 {
        assert_eq!(helper::next_payload(&mut received).await, format!("message {i}"));
    }

    coordinator.cancellation_token().cancel();

    let report = run.wait().await;

    assert!(report.is_success(), "{report}");
    // Credit allows 3, but every delivery is accepted before the next receive.
    assert_eq!(broker.max_in_flight("q1"), 1);
}
