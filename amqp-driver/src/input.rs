//! Feeding sender links from one line oriented input.
//!
//! Every sender link gets its own channel. When links with different targets read the input, a
//! line like `@q1 hello` goes only to the senders bound to `q1` (as `hello`). Any other line goes
//! unchanged to all the senders.
use anyhow::Result;
use log::{debug, warn};
use tokio::sync::mpsc::error::TrySendError;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How many lines can wait for a busy sender link.
const LINE_BUFFER: usize = 16;

pub type LineStream = mpsc::Receiver<String>;

struct Subscriber {
    target: String,
    sink: mpsc::Sender<String>,
}

#[derive(Default)]
pub struct InputRouter {
    subscribers: Vec<Subscriber>,
    prompt: bool,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print `-> ` on the standard output before waiting for a line.
    pub fn with_prompt(self, prompt: bool) -> Self {
        Self { prompt, ..self }
    }

    /// Register a sender link bound to `target` and return the stream of its lines.
    pub fn subscribe(&mut self, target: &str) -> LineStream {
        let (sink, stream) = mpsc::channel(LINE_BUFFER);

        self.subscribers.push(Subscriber {
            target: target.to_owned(),
            sink,
        });

        stream
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Read lines until the input ends, the token is cancelled or no sender listens any more.
    /// Returns the number of lines read. Dropping the router closes every line stream.
    pub async fn run<R>(mut self, mut reader: R, token: CancellationToken) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut count = 0usize;

        while !self.subscribers.is_empty() {
            if self.prompt {
                print!("-> ");
                std::io::stdout().flush()?;
            }

            let mut line = String::new();

            let n = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                n = reader.read_line(&mut line) => n?,
            };

            if n == 0 {
                debug!("End of input after {} lines", count);
                break;
            }

            count += 1;

            self.dispatch(line);
        }

        Ok(count)
    }

    /// A sender whose buffer is full misses the line, the others still get it.
    fn dispatch(&mut self, line: String) {
        let routed = split_address(&line).filter(|(target, _)| self.routes_to(target));
        let (target, text) = match routed {
            Some((target, text)) => (Some(target.to_owned()), text.to_owned()),
            None => (None, line),
        };

        let mut delivered = false;
        let mut gone = vec![];

        for (i, sub) in self.subscribers.iter().enumerate() {
            if matches!(&target, Some(t) if *t != sub.target) {
                continue;
            }

            match sub.sink.try_send(text.clone()) {
                Ok(()) => delivered = true,
                Err(TrySendError::Full(_)) => {
                    warn!("Sender link to {} is lagging, line dropped for it", sub.target)
                }
                Err(TrySendError::Closed(_)) => gone.push(i),
            }
        }

        for i in gone.into_iter().rev() {
            let sub = self.subscribers.remove(i);

            debug!("Sender link to {} stopped reading input", sub.target);
        }

        if !delivered {
            warn!("No sender link took the line, line dropped");
        }
    }

    /// Addressing only applies if senders of more than one target read the input and one of them
    /// is bound to `target`.
    fn routes_to(&self, target: &str) -> bool {
        let mut targets = self.subscribers.iter().map(|s| s.target.as_str());

        match targets.next() {
            Some(first) => targets.any(|t| t != first) && self.subscribers.iter().any(|s| s.target == target),
            None => false,
        }
    }
}

/// Splits `@target rest` into the target and the rest of the line.
fn split_address(line: &str) -> Option<(&str, &str)> {
    let (target, text) = line.strip_prefix('@')?.split_once(' ')?;

    if target.is_empty() {
        None
    } else {
        Some((target, text))
    }
}
