// Shared test helpers: a scripted connector and a fake shell session.
#![allow(dead_code)]

use async_trait::async_trait;
use rsmon::collector::{CollectContext, Collector, ManagedCollector};
use rsmon::error::TransportError;
use rsmon::models::{HostTarget, RetryPolicy};
use rsmon::platform::PlatformResolver;
use rsmon::pool::SessionPool;
use rsmon::transport::{CommandOutput, Connector, Session};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Remote side shared by every session the connector hands out.
#[derive(Default)]
pub struct FakeHost {
    responses: Mutex<HashMap<String, String>>,
    delay: Mutex<Duration>,
    break_next: AtomicBool,
    pub runs: AtomicUsize,
    pub closes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stdout for `command`; unknown commands print nothing.
    pub fn respond(&self, command: &str, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), stdout.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// The next `run` fails like a dropped connection.
    pub fn break_next_run(&self) {
        self.break_next.store(true, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Emulates `sh -c` for `a; b; c`: `echo '<x>'` prints x, anything else prints its
    /// scripted response.
    fn shell(&self, command: &str) -> String {
        let responses = self.responses.lock().unwrap();
        let mut out = String::new();
        for part in command.split("; ") {
            let text = match part.strip_prefix("echo '").and_then(|s| s.strip_suffix('\'')) {
                Some(echoed) => echoed.to_string(),
                None => responses.get(part).cloned().unwrap_or_default(),
            };
            if !text.is_empty() {
                out.push_str(&text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Decrements the in-flight counter even when the run future is dropped by a timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeSession {
    host: Arc<FakeHost>,
    closed: AtomicBool,
}

#[async_trait]
impl Session for FakeSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SessionClosed);
        }
        self.host.runs.fetch_add(1, Ordering::SeqCst);
        self.host.commands.lock().unwrap().push(command.to_string());
        let now = self.host.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.host.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.host.in_flight);

        let delay = *self.host.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        if self.host.break_next.swap(false, Ordering::SeqCst) {
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::Client {
                status: 255,
                stderr: "Connection reset by peer".into(),
            });
        }
        Ok(CommandOutput::ok(self.host.shell(command)))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.host.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `fail_first` connects (counted across all hosts), then succeeds.
pub struct ScriptedConnector {
    pub host: Arc<FakeHost>,
    fail_first: u32,
    attempts: AtomicU32,
    per_host: Mutex<HashMap<String, u32>>,
    unreachable: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new(host: Arc<FakeHost>) -> Arc<Self> {
        Self::failing_first(host, 0)
    }

    pub fn failing_first(host: Arc<FakeHost>, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            host,
            fail_first,
            attempts: AtomicU32::new(0),
            per_host: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing(host: Arc<FakeHost>) -> Arc<Self> {
        Self::failing_first(host, u32::MAX)
    }

    /// Every connect to `name` fails, regardless of `fail_first`.
    pub fn make_unreachable(&self, name: &str) {
        self.unreachable.lock().unwrap().push(name.to_string());
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, name: &str) -> u32 {
        self.per_host.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &HostTarget) -> Result<Arc<dyn Session>, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .per_host
            .lock()
            .unwrap()
            .entry(target.name.clone())
            .or_default() += 1;

        if attempt <= self.fail_first || self.unreachable.lock().unwrap().contains(&target.name) {
            return Err(TransportError::Other(format!(
                "connection refused (attempt {attempt})"
            )));
        }
        Ok(Arc::new(FakeSession {
            host: self.host.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
    }
}

pub fn target(name: &str) -> HostTarget {
    HostTarget::new(name, format!("{name}.example"), "monitor")
}

/// Pool with `names` registered and connected through a fresh [`ScriptedConnector`].
pub async fn connected_pool(
    host: Arc<FakeHost>,
    names: &[&str],
) -> (Arc<SessionPool>, Arc<ScriptedConnector>) {
    let connector = ScriptedConnector::new(host);
    let pool = Arc::new(SessionPool::new(connector.clone(), fast_retry()));
    for name in names {
        pool.add_server(target(name)).await.unwrap();
    }
    (pool, connector)
}

/// Collector whose outcome is scripted per test.
pub struct TestCollector {
    name: &'static str,
    interval: Duration,
    calls: AtomicUsize,
    fail: AtomicBool,
    panic: bool,
    hang_on: Option<&'static str>,
}

impl TestCollector {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            interval: Duration::from_secs(3600),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            panic: false,
            hang_on: None,
        }
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    /// `collect` never returns for `host`.
    pub fn hanging_on(mut self, host: &'static str) -> Self {
        self.hang_on = Some(host);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for TestCollector {
    fn name(&self) -> &str {
        self.name
    }

    fn default_interval(&self) -> Duration {
        self.interval
    }

    async fn collect(&self, host: &str, ctx: &CollectContext<'_>) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_on == Some(host) {
            std::future::pending::<()>().await;
        }
        if self.panic {
            panic!("kaboom");
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("boom");
        }
        Ok(json!({ "call": call, "host": host, "platform": ctx.platform.as_str() }))
    }
}

pub fn managed(
    collector: Arc<dyn Collector>,
    pool: Arc<SessionPool>,
    cache: Duration,
) -> Arc<ManagedCollector> {
    let resolver = Arc::new(PlatformResolver::new(pool.clone()));
    Arc::new(ManagedCollector::new(collector, pool, resolver, cache))
}
