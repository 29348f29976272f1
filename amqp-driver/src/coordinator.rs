use crate::error::{DriverError, ErrorScope};
use crate::input::InputRouter;
use crate::link::{LinkOutcome, LinkReport, ReceivedSink};
use crate::model::DriverConfig;
use crate::session::{LinkContext, SessionOrchestrator, SharedSession};
use crate::transport::{Connection, Gateway, Session};
use anyhow::anyhow;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Grace period for detaching links, ending sessions and closing the connection.
    pub close_timeout: Duration,
    /// Cancel every link when one of them fails.
    pub fail_fast: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            close_timeout: Duration::from_secs(1),
            fail_fast: false,
        }
    }
}

/// Owns the connection of a run and fans the configured sessions out into link tasks.
pub struct Coordinator<G: Gateway> {
    gateway: G,
    settings: Settings,
    token: CancellationToken,
    observer: Option<ReceivedSink>,
}

/// A started run. The connection is open and the link tasks are spawned, [`Run::wait`] joins
/// them and releases the sessions and the connection.
pub struct Run<C: Connection> {
    connection: C,
    /// Opened sessions with their position in the configuration.
    sessions: Vec<(usize, SharedSession<C::Session>)>,
    session_errors: Vec<DriverError>,
    tasks: JoinSet<LinkReport>,
    spawned: usize,
    settings: Settings,
    token: CancellationToken,
}

/// Terminal state of every link and every session which could not be opened.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Link reports in the order the links terminated.
    pub links: Vec<LinkReport>,
    pub session_errors: Vec<DriverError>,
    /// Link tasks which panicked.
    pub task_errors: Vec<DriverError>,
}

impl<G: Gateway> Coordinator<G> {
    pub fn new(gateway: G, settings: Settings) -> Self {
        Coordinator {
            gateway,
            settings,
            token: CancellationToken::new(),
            observer: None,
        }
    }

    /// Every payload received by any receiver link is sent to `observer` as well.
    pub fn with_observer(self, observer: ReceivedSink) -> Self {
        Self {
            observer: Some(observer),
            ..self
        }
    }

    /// Cancelling this token stops every link of the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Dial the broker and start every session. Only a failing dial is an error, sessions which
    /// cannot be opened are reported by [`Run::wait`].
    ///
    /// Sender links subscribe to `inputs`, so it needs to be run after this returns.
    pub async fn start(
        &self,
        config: &DriverConfig,
        inputs: &mut InputRouter,
    ) -> Result<Run<G::Connection>, DriverError> {
        info!("Dialing AMQP server: {}", config.connection.container);

        let mut connection = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                return Err(DriverError::connection("dial", "cancelled"));
            }
            result = self.gateway.dial(&config.connection) => {
                result.map_err(|e| DriverError::connection("dial", e))?
            }
        };

        let context = LinkContext {
            token: self.token.clone(),
            grace: self.settings.close_timeout,
            observer: self.observer.clone(),
        };
        let orchestrator = SessionOrchestrator { context: &context };
        let mut tasks = JoinSet::new();
        let mut sessions = vec![];
        let mut session_errors = vec![];

        for (index, spec) in config.sessions.iter().enumerate() {
            if self.token.is_cancelled() {
                break;
            }

            match orchestrator
                .start(&mut connection, index, spec, inputs, &mut tasks)
                .await
            {
                Ok(Some(session)) => sessions.push((index, session)),
                Ok(None) => break,
                Err(e) => {
                    error!("{}", e);

                    session_errors.push(e);
                }
            }
        }

        let spawned = tasks.len();

        debug!("Spawned {} link tasks in {} sessions", spawned, sessions.len());

        Ok(Run {
            connection,
            sessions,
            session_errors,
            tasks,
            spawned,
            settings: self.settings.clone(),
            token: self.token.clone(),
        })
    }

    /// Start the run without any input and wait until it is over. Sender links send the
    /// greeting only.
    pub async fn run(&self, config: &DriverConfig) -> Result<RunReport, DriverError> {
        let mut inputs = InputRouter::new();
        let run = self.start(config, &mut inputs).await?;

        drop(inputs);

        Ok(run.wait().await)
    }
}

impl<C: Connection> Run<C> {
    /// Number of link tasks spawned.
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Wait for every link task, then end the sessions and close the connection.
    pub async fn wait(mut self) -> RunReport {
        let mut report = RunReport {
            session_errors: std::mem::take(&mut self.session_errors),
            ..Default::default()
        };

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(link) => {
                    if let LinkOutcome::Failed(_) = link.outcome {
                        if self.settings.fail_fast && !self.token.is_cancelled() {
                            warn!("Cancelling every link after {} failed", link.label);

                            self.token.cancel();
                        }
                    }

                    report.links.push(link);
                }
                Err(e) => {
                    error!("Link task died: {}", e);

                    report.task_errors.push(DriverError {
                        scope: ErrorScope::Link,
                        operation: "join link task".to_owned(),
                        link: None,
                        cause: e.to_string(),
                    });
                }
            }
        }

        let grace = self.settings.close_timeout;

        for (index, session) in self.sessions {
            let session = match Arc::try_unwrap(session) {
                Ok(session) => session.into_inner(),
                Err(_) => {
                    warn!("Session #{} is still in use, not ending it", index);
                    continue;
                }
            };

            match tokio::time::timeout(grace, session.close()).await {
                Ok(Ok(())) => debug!("Ended session #{}", index),
                Ok(Err(e)) => warn!("Error ending session #{}: {:#}", index, e),
                Err(_) => warn!("Session #{} was not ended within {:?}", index, grace),
            }
        }

        match tokio::time::timeout(grace, self.connection.close()).await {
            Ok(Ok(())) => info!("Connection closed"),
            Ok(Err(e)) => warn!("Error closing connection: {:#}", e),
            Err(_) => warn!("Connection was not closed within {:?}", grace),
        }

        report
    }
}

impl RunReport {
    /// Number of link tasks which were spawned.
    pub fn spawned(&self) -> usize {
        self.links.len() + self.task_errors.len()
    }

    /// Every error of the run: failed sessions first, then failed links as they terminated.
    pub fn failures(&self) -> impl Iterator<Item = &DriverError> {
        self.session_errors
            .iter()
            .chain(self.links.iter().filter_map(|l| l.error()))
            .chain(self.task_errors.iter())
    }

    /// The first link which terminated with an error, or the first session error if no link
    /// failed.
    pub fn first_error(&self) -> Option<&DriverError> {
        self.links
            .iter()
            .find_map(|l| l.error())
            .or_else(|| self.task_errors.first())
            .or_else(|| self.session_errors.first())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Turn the report into an error listing every failure, if there is any.
    pub fn into_result(self) -> anyhow::Result<RunReport> {
        if self.is_success() {
            return Ok(self);
        }

        let failures: Vec<String> = self.failures().map(|e| format!("  {e}")).collect();

        Err(anyhow!("{} failure(s) during the run:\n{}", failures.len(), failures.join("\n")))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for link in &self.links {
            match &link.outcome {
                LinkOutcome::Completed => writeln!(f, "{}: completed, {} messages", link.label, link.messages)?,
                LinkOutcome::Cancelled => writeln!(f, "{}: cancelled, {} messages", link.label, link.messages)?,
                LinkOutcome::Failed(e) => writeln!(f, "{}: failed, {}", link.label, e.cause)?,
            }
        }

        for err in &self.session_errors {
            writeln!(f, "{err}")?;
        }

        for err in &self.task_errors {
            writeln!(f, "{err}")?;
        }

        Ok(())
    }
}
