use crate::{helper, unsupported};
use amqp_driver::memory::MemoryBroker;
use amqp_driver::*;

#[tokio::test]
async fn spawns_a_task_for_every_link_of_every_session() {
    let broker = MemoryBroker::new();
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![
        vec![LinkSpec::sender("a"), LinkSpec::receiver("a", 1)],
        vec![LinkSpec::receiver("b", 5)],
        vec![LinkSpec::sender("b"), LinkSpec::sender("c"), LinkSpec::receiver("c", 2)],
    ]);
    let mut inputs = InputRouter::new();

    let run = coordinator.start(&config, &mut inputs).await.unwrap();

    assert_eq!(run.spawned(), config.runnable_links());
    assert_eq!(run.spawned(), 6);

    drop(inputs);
    coordinator.cancellation_token().cancel();

    let report = run.wait().await;

    assert_eq!(report.links.len(), 6);
    assert!(report.links.iter().all(|l| l.state == LinkState::Terminated));
    assert_eq!(broker.stats().sessions_opened, 3);
    assert_eq!(broker.stats().sessions_closed, 3);
    assert_eq!(broker.stats().connections_closed, 1);
}

#[tokio::test]
async fn unsupported_role_spawns_nothing_and_harms_nobody() {
    let broker = MemoryBroker::new();
    let coordinator = helper::coordinator(&broker);
    let config = crate::config(vec![vec![LinkSpec::sender("q1"), unsupported("q1")]]);

    let report = coordinator.run(&config).await.unwrap();

    assert_eq!(report.spawned(), 1);
    assert!(report.is_success(), "{report}");
    assert!(matches!(report.links[0].outcome, LinkOutcome::Completed));
    assert_eq!(broker.stats().links_opened, 1);
}

#[tokio::test]
async fn empty_configuration_still_closes_the_connection() {
    let broker = MemoryBroker::new();
    let coordinator = helper::coordinator(&broker);

    let report = coordinator.run(&crate::config(vec![])).await.unwrap();

    assert_eq!(report.spawned(), 0);
    assert_eq!(broker.stats().connections_opened, 1);
    assert_eq!(broker.stats().connections_closed, 1);
}
