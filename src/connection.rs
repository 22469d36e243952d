use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read as _, Write as _};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{
    Buffers, ConnectProxyConnector, ConnectionDetails, Connector, Either, LazyBuffers,
    NextTimeout, RustlsConnector, Transport,
};

use crate::{
    PROBE_ERR_ABANDONED, PROBE_ERR_API_CODE, PROBE_ERR_API_MESSAGE, PROBE_ERR_AUTH, PROBE_ERR_CANCELLED,
    PROBE_ERR_NETWORK, PROBE_ERR_TIMED_OUT, PROBE_ERR_WORKER, PROBE_MSG_RATE_LIMITED,
    PROBE_MSG_SUCCESS,
};

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const MODELS_PATH: &str = "/v1/models";
const API_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("endpoint-profiles/", env!("CARGO_PKG_VERSION"));

/// Terminal state of one probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TestResult {
    Success {
        status: u16,
        latency_ms: u64,
        rate_limited: bool,
    },
    AuthFailure {
        status: u16,
        message: String,
    },
    ProtocolError {
        status: u16,
        message: String,
    },
    NetworkError {
        message: String,
    },
    TimedOut {
        timeout_ms: u64,
    },
    Cancelled,
}

impl TestResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status, .. }
            | Self::AuthFailure { status, .. }
            | Self::ProtocolError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// One-line summary suitable for display.
    pub fn message(&self) -> String {
        match self {
            Self::Success {
                status,
                latency_ms,
                rate_limited: false,
            } => crate::msg2(PROBE_MSG_SUCCESS, status, latency_ms),
            Self::Success {
                status,
                latency_ms,
                rate_limited: true,
            } => crate::msg2(PROBE_MSG_RATE_LIMITED, status, latency_ms),
            Self::AuthFailure { message, .. }
            | Self::ProtocolError { message, .. }
            | Self::NetworkError { message } => message.clone(),
            Self::TimedOut { timeout_ms } => crate::msg1(PROBE_ERR_TIMED_OUT, timeout_ms),
            Self::Cancelled => PROBE_ERR_CANCELLED.to_string(),
        }
    }
}

enum ProbeEvent {
    Finished(TestResult),
    Cancelled,
}

/// Cooperative cancellation for in-flight probes.
///
/// Clones share state. Cancelling wakes every probe currently waiting on
/// the token; probes started afterwards return `Cancelled` at once.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Mutex<CancelState>>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: bool,
    next_waiter: u64,
    waiters: HashMap<u64, Sender<ProbeEvent>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        for (_, waiter) in state.waiters.drain() {
            // The probe may already have finished and dropped its receiver.
            let _ = waiter.send(ProbeEvent::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancelled
    }

    /// `None` when the token is already cancelled.
    fn register(&self, waiter: Sender<ProbeEvent>) -> Option<u64> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.cancelled {
            return None;
        }
        let id = state.next_waiter;
        state.next_waiter += 1;
        state.waiters.insert(id, waiter);
        Some(id)
    }

    fn unregister(&self, id: u64) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .remove(&id);
    }
}

/// Drops the token registration on every exit path.
struct Registration<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token.unregister(self.id);
    }
}

/// Sockets opened on behalf of one probe.
///
/// Aborting shuts every tracked socket down, which wakes the worker out of a
/// blocked read or write. Sockets connected after the abort are refused.
#[derive(Clone, Debug, Default)]
struct RequestAbort {
    inner: Arc<Mutex<AbortState>>,
}

#[derive(Debug, Default)]
struct AbortState {
    aborted: bool,
    sockets: Vec<TcpStream>,
}

impl RequestAbort {
    fn abort(&self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.aborted = true;
        for socket in state.sockets.drain(..) {
            // Already closed by the peer or by the worker.
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn track(&self, socket: &TcpStream) -> io::Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            let _ = socket.shutdown(Shutdown::Both);
            return Err(io::Error::new(io::ErrorKind::Interrupted, PROBE_ERR_ABANDONED));
        }
        state.sockets.push(socket.try_clone()?);
        Ok(())
    }
}

/// Plain TCP connector whose sockets can be torn down through a [`RequestAbort`].
#[derive(Debug)]
struct AbortableTcpConnector {
    abort: RequestAbort,
    timeout: Duration,
}

impl<In: Transport> Connector<In> for AbortableTcpConnector {
    type Out = Either<In, AbortableTransport>;

    fn connect(
        &self,
        details: &ConnectionDetails,
        chained: Option<In>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        if chained.is_some() {
            return Ok(chained.map(Either::A));
        }
        let mut last_err = None;
        for addr in &details.addrs {
            let stream = match TcpStream::connect_timeout(addr, self.timeout) {
                Ok(stream) => stream,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    last_err = Some(ureq::Error::Timeout(ureq::Timeout::Connect));
                    continue;
                }
                Err(err) => {
                    last_err = Some(err.into());
                    continue;
                }
            };
            self.abort.track(&stream)?;
            if details.config.no_delay() {
                stream.set_nodelay(true)?;
            }
            let buffers = LazyBuffers::new(
                details.config.input_buffer_size(),
                details.config.output_buffer_size(),
            );
            return Ok(Some(Either::B(AbortableTransport { stream, buffers })));
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused).into()))
    }
}

struct AbortableTransport {
    stream: TcpStream,
    buffers: LazyBuffers,
}

impl fmt::Debug for AbortableTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortableTransport")
            .field("addr", &self.stream.peer_addr().ok())
            .finish()
    }
}

fn io_failure(err: io::Error, timeout: NextTimeout) -> ureq::Error {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            ureq::Error::Timeout(timeout.reason)
        }
        _ => err.into(),
    }
}

impl Transport for AbortableTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        &mut self.buffers
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        self.stream.set_write_timeout(timeout.not_zero().map(|after| *after))?;
        let output = &self.buffers.output()[..amount];
        self.stream
            .write_all(output)
            .map_err(|err| io_failure(err, timeout))
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        self.stream.set_read_timeout(timeout.not_zero().map(|after| *after))?;
        let input = self.buffers.input_append_buf();
        let amount = self
            .stream
            .read(input)
            .map_err(|err| io_failure(err, timeout))?;
        self.buffers.input_appended(amount);
        Ok(amount > 0)
    }

    fn is_open(&mut self) -> bool {
        // Each probe builds its own agent, so nothing is ever reused.
        false
    }
}

/// Issues single-shot credential probes against a provider endpoint.
#[derive(Clone, Debug)]
pub struct ConnectionTester {
    timeout: Duration,
}

impl Default for ConnectionTester {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

static PROBE_SEQ: AtomicU64 = AtomicU64::new(0);

impl ConnectionTester {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probes `base_url` with `api_key`. Never fails; every outcome is a
    /// [`TestResult`].
    pub fn test(&self, base_url: &str, api_key: &str, cancel: Option<&CancelToken>) -> TestResult {
        let probe = PROBE_SEQ.fetch_add(1, Ordering::Relaxed);
        let endpoint = models_endpoint(base_url);
        let timeout = self.timeout;
        let timeout_ms = duration_ms(timeout);

        let (tx, rx) = mpsc::channel();
        let _registration = match cancel {
            Some(token) => match token.register(tx.clone()) {
                Some(id) => Some(Registration { token, id }),
                None => {
                    tracing::debug!(probe, "probe cancelled before start");
                    return TestResult::Cancelled;
                }
            },
            None => None,
        };

        tracing::debug!(probe, %endpoint, timeout_ms, "probing endpoint");
        let api_key = api_key.trim().to_string();
        let abort = RequestAbort::default();
        let worker_abort = abort.clone();
        let spawned = thread::Builder::new()
            .name("endpoint-probe".to_string())
            .spawn(move || {
                let result = probe_once(&endpoint, &api_key, timeout, worker_abort);
                // The caller may have stopped waiting after a timeout or cancel.
                let _ = tx.send(ProbeEvent::Finished(result));
            });
        if let Err(err) = spawned {
            return TestResult::NetworkError {
                message: crate::msg1(PROBE_ERR_NETWORK, err),
            };
        }

        let result = match rx.recv_timeout(timeout) {
            Ok(ProbeEvent::Finished(result)) => result,
            Ok(ProbeEvent::Cancelled) => TestResult::Cancelled,
            Err(RecvTimeoutError::Timeout) => TestResult::TimedOut { timeout_ms },
            Err(RecvTimeoutError::Disconnected) => TestResult::NetworkError {
                message: crate::msg1(PROBE_ERR_NETWORK, PROBE_ERR_WORKER),
            },
        };
        // Cancel, timeout and completion all end here. Closing the sockets
        // unblocks a worker that is still waiting on the network.
        abort.abort();
        tracing::debug!(probe, outcome = ?result, "probe finished");
        result
    }
}

/// Probes with an optional timeout, defaulting to 15 seconds.
pub fn test_connection(
    base_url: &str,
    api_key: &str,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> TestResult {
    let mut tester = ConnectionTester::new();
    if let Some(timeout) = timeout {
        tester = tester.with_timeout(timeout);
    }
    tester.test(base_url, api_key, cancel)
}

fn models_endpoint(base_url: &str) -> String {
    let base = base_url.trim();
    let base = base.strip_suffix('/').unwrap_or(base);
    format!("{base}{MODELS_PATH}")
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn probe_once(
    endpoint: &str,
    api_key: &str,
    timeout: Duration,
    abort: RequestAbort,
) -> TestResult {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .max_idle_connections(0)
        .build();
    let connector = ()
        .chain(ConnectProxyConnector::default())
        .chain(AbortableTcpConnector { abort, timeout })
        .chain(RustlsConnector::default());
    let agent = ureq::Agent::with_parts(config, connector, DefaultResolver::default());
    let started = Instant::now();
    let response = match agent
        .get(endpoint)
        .header("Authorization", &format!("Bearer {api_key}"))
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .header("User-Agent", USER_AGENT)
        .call()
    {
        Ok(response) => response,
        Err(ureq::Error::Timeout(_)) => {
            return TestResult::TimedOut {
                timeout_ms: duration_ms(timeout),
            };
        }
        Err(err) => {
            return TestResult::NetworkError {
                message: crate::msg1(PROBE_ERR_NETWORK, err),
            };
        }
    };
    let latency_ms = duration_ms(started.elapsed());
    let status = response.status().as_u16();
    match status {
        200..=299 => TestResult::Success {
            status,
            latency_ms,
            rate_limited: false,
        },
        429 => TestResult::Success {
            status,
            latency_ms,
            rate_limited: true,
        },
        401 => TestResult::AuthFailure {
            status,
            message: PROBE_ERR_AUTH.to_string(),
        },
        _ => {
            let detail = response
                .into_body()
                .read_json::<serde_json::Value>()
                .ok()
                .and_then(|body| error_message(&body));
            let message = match detail {
                Some(detail) => crate::msg2(PROBE_ERR_API_MESSAGE, status, detail),
                None => crate::msg1(PROBE_ERR_API_CODE, status),
            };
            TestResult::ProtocolError { status, message }
        }
    }
}

/// Pulls a human message out of the common provider error shapes.
fn error_message(body: &serde_json::Value) -> Option<String> {
    let candidate = body
        .pointer("/error/message")
        .or_else(|| body.get("error").filter(|value| value.is_string()))
        .or_else(|| body.get("message"))?;
    candidate
        .as_str()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}
