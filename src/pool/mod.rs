// Session pool: one serialized, self-healing remote session per host.
//
// Every command against a host runs under that host's async lock, so the session's
// output stream is never shared. A transport failure drops the cached session and the
// next call reconnects with linear backoff.

pub mod batch;

use crate::error::{PoolError, TransportError};
use crate::models::{HostTarget, RetryPolicy};
use crate::transport::{Connector, Session};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Connection state of one host, derived from in-memory state only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    NotConfigured,
    Disconnected,
    Closed,
    Connected,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::NotConfigured => "not_configured",
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Closed => "closed",
            ServerStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct HostEntry {
    target: HostTarget,
    retry: RetryPolicy,
    /// Held for the whole duration of a remote call.
    lock: tokio::sync::Mutex<()>,
    /// Only written while `lock` is held (or by `close`, which ends the pool).
    session: Mutex<Option<Arc<dyn Session>>>,
}

impl HostEntry {
    fn new(target: HostTarget, retry: RetryPolicy) -> Self {
        Self {
            target,
            retry,
            lock: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Arc<dyn Session>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, session: Option<Arc<dyn Session>>) -> Option<Arc<dyn Session>> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, session)
    }
}

pub struct SessionPool {
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    command_timeout: Option<Duration>,
    hosts: RwLock<HashMap<String, Arc<HostEntry>>>,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>, retry: RetryPolicy) -> Self {
        Self {
            connector,
            retry,
            command_timeout: None,
            hosts: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Deadline applied when a caller passes no timeout of its own.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Configured host names, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = hosts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registers `target` under `target.name` and makes the initial connection.
    ///
    /// The host stays registered when connecting fails, so later calls retry.
    #[instrument(skip(self, target), fields(host = %target.name, operation = "add_server"))]
    pub async fn add_server(&self, target: HostTarget) -> Result<(), PoolError> {
        self.ensure_open()?;
        let name = target.name.clone();
        let entry = Arc::new(HostEntry::new(target, self.retry));
        let previous = {
            let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
            hosts.insert(name, entry.clone())
        };
        if let Some(old) = previous.and_then(|old| old.replace(None)) {
            discard_session(old);
        }

        let _guard = entry.lock.lock().await;
        self.connect(&entry).await.map(|_| ())
    }

    /// Runs `command` on `host` and returns its stdout.
    ///
    /// A non-zero remote exit status is logged, not raised. Timeouts leave the session
    /// in place; transport failures drop it so the next call reconnects.
    pub async fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, PoolError> {
        self.ensure_open()?;
        let entry = self.entry(host)?;
        let _guard = entry.lock.lock().await;
        self.ensure_open()?;

        let session = self.live_session(&entry).await?;
        let run = session.run(command);
        let result = match timeout.or(self.command_timeout) {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    error!(host, command, timeout = ?limit, "command timed out");
                    return Err(PoolError::Timeout {
                        host: host.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => run.await,
        };

        match result {
            Ok(output) => {
                if output.exit_status != 0 {
                    warn!(
                        host,
                        exit_status = output.exit_status,
                        stderr = %output.stderr.trim(),
                        "command returned non-zero"
                    );
                }
                Ok(output.stdout)
            }
            Err(e) => {
                error!(host, error = %e, "command execution failed; dropping session");
                if let Some(broken) = entry.replace(None) {
                    discard_session(broken);
                }
                Err(PoolError::Transport {
                    host: host.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Runs `commands` in one remote round trip and returns their outputs in order.
    ///
    /// A command that prints nothing yields `""` at its position. If the sentinel count
    /// does not match the command count the batch fails with `BatchFraming`.
    pub async fn execute_batch<S: AsRef<str>>(
        &self,
        host: &str,
        commands: &[S],
        timeout: Option<Duration>,
    ) -> Result<Vec<String>, PoolError> {
        self.ensure_open()?;
        if commands.is_empty() {
            self.entry(host)?;
            return Ok(Vec::new());
        }

        let combined = batch::build_batch_command(commands);
        let output = self.execute(host, &combined, timeout).await?;
        let segments = batch::split_batch_output(&output);
        if segments.len() != commands.len() {
            warn!(
                host,
                expected = commands.len(),
                found = segments.len(),
                "batch output framing mismatch"
            );
            return Err(PoolError::BatchFraming {
                host: host.to_string(),
                expected: commands.len(),
                found: segments.len(),
            });
        }
        Ok(segments)
    }

    /// Live session handle for raw use. Callers bypass the host lock once they hold it.
    pub async fn get_connection(&self, host: &str) -> Result<Arc<dyn Session>, PoolError> {
        self.ensure_open()?;
        let entry = self.entry(host)?;
        let _guard = entry.lock.lock().await;
        self.live_session(&entry).await
    }

    /// Closes every session. Terminal: all later operations fail with `PoolError::Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries: Vec<Arc<HostEntry>> = {
            let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
            hosts.values().cloned().collect()
        };

        let closing = entries.iter().filter_map(|entry| {
            let session = entry.replace(None)?;
            let host = entry.target.name.clone();
            Some(async move {
                info!(host = %host, "closing connection");
                if let Err(e) = session.close().await {
                    warn!(host = %host, error = %e, "error while closing connection");
                }
            })
        });
        join_all(closing).await;
        info!("session pool closed");
    }

    pub fn get_server_status(&self, host: &str) -> ServerStatus {
        let entry = {
            let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
            hosts.get(host).cloned()
        };
        let Some(entry) = entry else {
            return ServerStatus::NotConfigured;
        };
        if self.is_closed() {
            return ServerStatus::Closed;
        }
        match entry.current() {
            None => ServerStatus::Disconnected,
            Some(session) if session.is_closed() => ServerStatus::Closed,
            Some(_) => ServerStatus::Connected,
        }
    }

    fn ensure_open(&self) -> Result<(), PoolError> {
        if self.is_closed() {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    fn entry(&self, host: &str) -> Result<Arc<HostEntry>, PoolError> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        hosts
            .get(host)
            .cloned()
            .ok_or_else(|| PoolError::NotConfigured(host.to_string()))
    }

    /// Caller must hold `entry.lock`.
    async fn live_session(&self, entry: &HostEntry) -> Result<Arc<dyn Session>, PoolError> {
        match entry.current() {
            Some(session) if !session.is_closed() => Ok(session),
            _ => {
                info!(host = %entry.target.name, "reconnecting");
                self.connect(entry).await
            }
        }
    }

    /// Caller must hold `entry.lock`.
    async fn connect(&self, entry: &HostEntry) -> Result<Arc<dyn Session>, PoolError> {
        let target = &entry.target;
        let max_retries = entry.retry.max_retries;
        let mut last_error: Option<TransportError> = None;

        for attempt in 1..=max_retries {
            info!(
                host = %target.name,
                address = %format!("{}:{}", target.hostname, target.port),
                attempt,
                "connecting"
            );
            match self.connector.connect(target).await {
                Ok(session) => {
                    if self.is_closed() {
                        discard_session(session);
                        return Err(PoolError::Closed);
                    }
                    if let Some(stale) = entry.replace(Some(session.clone())) {
                        discard_session(stale);
                    }
                    info!(host = %target.name, "connected");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        host = %target.name,
                        attempt,
                        max_retries,
                        error = %e,
                        "connection attempt failed"
                    );
                    last_error = Some(e);
                    if let Some(delay) = entry.retry.backoff_after(attempt) {
                        debug!(host = %target.name, delay = ?delay, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(PoolError::Connection {
            host: target.name.clone(),
            attempts: max_retries,
            source: last_error
                .unwrap_or_else(|| TransportError::Other("no connection attempts allowed".into())),
        })
    }
}

/// Closes a session that is no longer referenced by the pool without blocking the caller.
/// Broken sessions are closed too so their transport can release what it still holds.
fn discard_session(session: Arc<dyn Session>) {
    tokio::spawn(async move {
        if let Err(e) = session.close().await {
            debug!(error = %e, "discarded session close failed");
        }
    });
}
