//! Scoped sessions: every remote operation logs in, does one unit of work on
//! a blocking worker and logs out again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use mailsync_core::{Error, Result};

use crate::ImapConfig;
use crate::imap_backend::ImapConnector;
use crate::protocol::{MailConnector, MailSession};

/// Entry point for remote operations against one account.
///
/// Holds no connection. Each call opens its own session, so no two
/// operations ever share selected-mailbox state.
pub struct MailClient<C: MailConnector = ImapConnector> {
    config: Arc<ImapConfig>,
    connector: Arc<C>,
}

impl<C: MailConnector> Clone for MailClient<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
        }
    }
}

impl MailClient<ImapConnector> {
    /// Builds a client and checks the credentials with one login/logout.
    pub async fn connect(config: ImapConfig) -> Result<Self> {
        let client = Self::with_connector(config, ImapConnector);
        client.verify().await?;
        Ok(client)
    }
}

impl<C: MailConnector> MailClient<C> {
    /// Builds a client without touching the network.
    pub fn with_connector(config: ImapConfig, connector: C) -> Self {
        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
        }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Account identity used to scope persisted records.
    pub fn account(&self) -> &str {
        &self.config.username
    }

    pub async fn verify(&self) -> Result<()> {
        self.run("verify", |_| Ok(())).await
    }

    /// Runs `work` inside one session on a blocking worker, under the
    /// configured deadline.
    pub(crate) async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C::Session) -> Result<T> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.connector);
        let task = tokio::task::spawn_blocking(move || {
            scoped(connector.as_ref(), &config, operation, work)
        });
        self.deadline(operation, 1, async move { task.await.map_err(join_error)? })
            .await
    }

    /// Starts a producer that feeds a bounded channel from inside one
    /// session. The sender is dropped when the producer returns, whether or
    /// not login succeeded, so the consumer always sees the end of the stream.
    pub(crate) fn stream<T, R, F>(
        &self,
        operation: &'static str,
        capacity: usize,
        work: F,
    ) -> Streamed<T, R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(&mut C::Session, mpsc::Sender<T>) -> Result<R> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.connector);
        let producer = tokio::task::spawn_blocking(move || {
            scoped(connector.as_ref(), &config, operation, move |session| {
                work(session, tx)
            })
        });
        Streamed { rx, producer }
    }

    /// Bounds `fut` by the configured timeout, granted once per unit of work.
    pub(crate) async fn deadline<T>(
        &self,
        operation: &'static str,
        units: usize,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(scaled(limit, units), fut)
                .await
                .map_err(|_| Error::Timeout { operation })?,
            None => fut.await,
        }
    }
}

fn scoped<C, T, F>(connector: &C, config: &ImapConfig, operation: &str, work: F) -> Result<T>
where
    C: MailConnector,
    F: FnOnce(&mut C::Session) -> Result<T>,
{
    let mut session = login_with_retry(connector, config)?;
    debug!(operation, "session open");
    let outcome = work(&mut session);
    if let Err(err) = session.logout() {
        warn!(operation, error = %err, "logout failed");
    }
    debug!(operation, ok = outcome.is_ok(), "session closed");
    outcome
}

fn login_with_retry<C: MailConnector>(connector: &C, config: &ImapConfig) -> Result<C::Session> {
    let mut attempt = 0u32;
    loop {
        match connector.login(config) {
            Ok(session) => return Ok(session),
            Err(Error::Connection(reason)) if attempt < config.connect_retries => {
                let delay = backoff(config.retry_backoff, attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "login failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

fn scaled(limit: Duration, units: usize) -> Duration {
    let units = u32::try_from(units.max(1)).unwrap_or(u32::MAX);
    limit.saturating_mul(units)
}

fn join_error(err: JoinError) -> Error {
    Error::Task(err.to_string())
}

/// Items from a background producer plus its completion value.
///
/// [`finish`](Self::finish) and the collectors drain the channel before
/// awaiting the producer, so a producer blocked on a full buffer can always
/// make progress.
pub struct Streamed<T, R = ()> {
    rx: mpsc::Receiver<T>,
    producer: JoinHandle<Result<R>>,
}

impl<T, R> Streamed<T, R> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Discards anything left in the channel and returns the producer outcome.
    pub async fn finish(mut self) -> Result<R> {
        while self.rx.recv().await.is_some() {}
        self.producer.await.map_err(join_error)?
    }

    pub async fn collect_all(mut self) -> Result<(Vec<T>, R)> {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        let done = self.producer.await.map_err(join_error)??;
        Ok((items, done))
    }
}

impl<T> Streamed<T, ()> {
    pub async fn collect(self) -> Result<Vec<T>> {
        self.collect_all().await.map(|(items, ())| items)
    }
}
