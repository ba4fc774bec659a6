//! Recurring background task with bounded backoff

use crate::utils::ExponentialBackoff;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// Delay between outer iterations, doubling from `min` up to `max` while
/// iterations keep failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay {
    pub min: Duration,
    pub max: Duration,
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

/// Runs a body over and over until cancelled or until it fails fatally
///
/// Cancellation errors end the task cleanly. Recoverable errors are logged
/// and retried after a backoff; anything else ends the task with that error.
#[derive(Debug)]
pub struct RecurringTask {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl RecurringTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, token: CancellationToken, delay: RetryDelay, body: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let span = info_span!("task", name = %name);
        let handle = tokio::spawn(run(name.clone(), token.clone(), delay, body).instrument(span));
        Self { name, token, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(self) -> Result<()> {
        self.token.cancel();
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::invalid_state(format!("task {} panicked: {}", self.name, e))),
        }
    }
}

async fn run<F, Fut>(name: String, token: CancellationToken, delay: RetryDelay, mut body: F) -> Result<()>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut backoff = ExponentialBackoff::new(delay.min, delay.max, 2.0);

    loop {
        if token.is_cancelled() {
            debug!("Task {} cancelled", name);
            return Ok(());
        }

        let wait = match body(token.clone()).await {
            Ok(()) => {
                backoff.reset();
                delay.min
            }
            Err(e) if e.is_cancelled() => {
                debug!("Task {} cancelled: {}", name, e);
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                let wait = backoff.next_delay();
                warn!(
                    "Task {} failed ({}), retry {} in {:?}: {}",
                    name,
                    e.category(),
                    backoff.attempt(),
                    wait,
                    e
                );
                wait
            }
            Err(e) => {
                error!("Task {} stopped on {} error: {}", name, e.category(), e);
                return Err(e);
            }
        };

        tokio::select! {
            _ = token.cancelled() => {
                debug!("Task {} cancelled during backoff", name);
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
