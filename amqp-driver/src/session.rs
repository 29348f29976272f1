use crate::error::DriverError;
use crate::input::InputRouter;
use crate::link::{LinkDriver, LinkReport, ReceiveStep, ReceivedSink, SendStep};
use crate::model::{Role, SessionSpec};
use crate::transport::{Connection, Session};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A session is shared by the links attached to it. Links lock it only while attaching.
pub type SharedSession<S> = Arc<Mutex<S>>;

/// What every link of a run gets.
#[derive(Clone)]
pub(crate) struct LinkContext {
    pub(crate) token: CancellationToken,
    pub(crate) grace: Duration,
    pub(crate) observer: Option<ReceivedSink>,
}

/// Opens one session and spawns a driver task for each of its links.
pub(crate) struct SessionOrchestrator<'a> {
    pub(crate) context: &'a LinkContext,
}

impl<'a> SessionOrchestrator<'a> {
    /// Open the session on the connection and spawn the link tasks into `tasks`. It doesn't wait
    /// for the links, the attach itself happens in the spawned task. Returns `None` if the run
    /// was cancelled before the session was opened.
    pub(crate) async fn start<C: Connection>(
        &self,
        connection: &mut C,
        index: usize,
        spec: &SessionSpec,
        inputs: &mut InputRouter,
        tasks: &mut JoinSet<LinkReport>,
    ) -> Result<Option<SharedSession<C::Session>>, DriverError> {
        let session = tokio::select! {
            biased;
            _ = self.context.token.cancelled() => {
                debug!("Session #{} not opened, the run is cancelled", index);

                return Ok(None);
            }
            result = connection.open_session() => {
                result.map_err(|e| DriverError::session(index, "open session", e))?
            }
        };

        info!("Opened session #{} with {} links", index, spec.links.len());

        let session = Arc::new(Mutex::new(session));

        for (i, link) in spec.links.iter().enumerate() {
            let label = link.label(index, i);
            let token = self.context.token.clone();
            let grace = self.context.grace;
            let shared = session.clone();

            match &link.role {
                Role::Sender => {
                    let target = link.target.clone();
                    let driver = LinkDriver::new(label, SendStep::new(inputs.subscribe(&target)), grace, token);

                    tasks.spawn(async move {
                        driver
                            .run(async move { shared.lock().await.open_sender(&target).await })
                            .await
                    });
                }
                Role::Receiver => {
                    let source = link.source.clone();
                    let credit = link.effective_credit();
                    let step = ReceiveStep::new(label.clone(), self.context.observer.clone());
                    let driver = LinkDriver::new(label, step, grace, token);

                    tasks.spawn(async move {
                        driver
                            .run(async move { shared.lock().await.open_receiver(&source, credit).await })
                            .await
                    });
                }
                Role::Unsupported(name) => {
                    warn!("Skipping link #{}.{} with unsupported role {:?}", index, i, name);
                }
            }
        }

        Ok(Some(session))
    }
}
