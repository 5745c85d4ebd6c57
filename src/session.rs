//! The connection supervisor and message pump.
//!
//! [`Session`] is a cheap, `Clone`-able handle (an `Arc` around shared state)
//! over three long-lived tasks spawned by [`Session::start`]: the event
//! loop (owns the socket, drives reconnection and backoff), the send
//! worker (drains the outbound queue), and the health checker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::{SessionConfig, SessionTuning, PING_MATCH_SUBSTRING};
use crate::health;
use crate::logging::Logger;
use crate::queue::{OutboundMessage, OutboundQueue};
use crate::transport::{self, TransportHandle};
use crate::wire::{self, SessionStatus};

/// Behavioral hooks supplied by the embedding application.
pub trait SessionCallbacks: Send + Sync {
    /// Delivers an inbound frame's raw payload. Dispatched off the transport's
    /// I/O task; a slow or panicking implementation cannot stall the connection.
    fn handle_message(&self, payload: Vec<u8>);

    /// Invoked exactly once, when `retry_limit` consecutive reconnect attempts
    /// have failed. The default implementation does nothing.
    fn notify_max_retries_reached(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Stopping,
    Stopped,
}

impl Phase {
    fn is_terminal_or_stopping(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

struct SharedState {
    phase: Phase,
    retry_count: u32,
    max_retries_reached: bool,
    last_message_at: Option<Instant>,
    transport: Option<TransportHandle>,
}

struct RunningTasks {
    event_loop: JoinHandle<()>,
    send_worker: JoinHandle<()>,
    health: JoinHandle<()>,
}

pub(crate) struct Inner {
    config: SessionConfig,
    tuning: SessionTuning,
    logger: Logger,
    callbacks: Arc<dyn SessionCallbacks>,
    queue: OutboundQueue,
    state: Mutex<SharedState>,
    shutdown: Notify,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Inner {
    pub(crate) fn tuning(&self) -> &SessionTuning {
        &self.tuning
    }

    pub(crate) fn logger(&self) -> Logger {
        self.logger
    }

    pub(crate) fn shutdown_signal(&self) -> &Notify {
        &self.shutdown
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) async fn health_snapshot(&self) -> (Phase, Option<Instant>) {
        let state = self.state.lock().await;
        (state.phase, state.last_message_at)
    }
}

#[cfg(test)]
impl Inner {
    /// Builds a bare `Inner` with the given phase/queue/liveness snapshot,
    /// for tests (e.g. `crate::health`'s) that need to drive `report()`
    /// directly without spinning up a full `Session`.
    pub(crate) fn for_test(tuning: SessionTuning, phase: Phase, last_message_at: Option<Instant>) -> Arc<Inner> {
        Arc::new(Inner {
            config: SessionConfig {
                url: "ws://127.0.0.1:1/".to_string(),
                client_identifier: "c-1".to_string(),
                host_identifier: "h-1".to_string(),
                monitor_identifier: String::new(),
                last_connected_at: String::new(),
                log_enabled: true,
            },
            queue: OutboundQueue::new(tuning.queue_capacity, tuning.overflow_policy),
            tuning,
            logger: Logger::new(true),
            callbacks: Arc::new(TestNoopCallbacks),
            state: Mutex::new(SharedState {
                phase,
                retry_count: 0,
                max_retries_reached: false,
                last_message_at,
                transport: None,
            }),
            shutdown: Notify::new(),
            tasks: Mutex::new(None),
        })
    }

    pub(crate) fn push_test_frame(&self, bytes: Vec<u8>) {
        self.queue.push(OutboundMessage::Frame(bytes));
    }
}

#[cfg(test)]
struct TestNoopCallbacks;

#[cfg(test)]
impl SessionCallbacks for TestNoopCallbacks {
    fn handle_message(&self, _payload: Vec<u8>) {}
}

static SHARED: std::sync::OnceLock<Session> = std::sync::OnceLock::new();

/// A durable WebSocket session client.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    #[must_use]
    pub fn new(config: SessionConfig, tuning: SessionTuning, callbacks: Arc<dyn SessionCallbacks>) -> Self {
        let queue = OutboundQueue::new(tuning.queue_capacity, tuning.overflow_policy);
        let logger = Logger::new(config.log_enabled);
        Self {
            inner: Arc::new(Inner {
                config,
                tuning,
                logger,
                callbacks,
                queue,
                state: Mutex::new(SharedState {
                    phase: Phase::Idle,
                    retry_count: 0,
                    max_retries_reached: false,
                    last_message_at: None,
                    transport: None,
                }),
                shutdown: Notify::new(),
                tasks: Mutex::new(None),
            }),
        }
    }

    /// Starts the three worker tasks. Idempotent: a second call while already
    /// running is a no-op.
    pub async fn start(&self) {
        // Lock state before tasks, matching the order `status()` uses, so a
        // concurrent `start()` + `status()` can't deadlock on opposite orders.
        let mut state = self.inner.state.lock().await;
        let mut tasks = self.inner.tasks.lock().await;
        if tasks.is_some() {
            return;
        }

        state.phase = Phase::Connecting;

        let event_loop = tokio::spawn(run_event_loop(self.inner.clone()));
        let send_worker = tokio::spawn(run_send_worker(self.inner.clone()));
        let health = tokio::spawn(health::run(self.inner.clone()));

        *tasks = Some(RunningTasks {
            event_loop,
            send_worker,
            health,
        });
    }

    /// Cooperative shutdown. Idempotent: returns immediately on a second call.
    /// Always returns within roughly `3 * shutdown_grace`.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.phase.is_terminal_or_stopping() {
                return;
            }
            state.phase = Phase::Stopping;
        }

        self.inner.queue.push(OutboundMessage::StopSignal);
        self.inner.shutdown.notify_waiters();

        let tasks = self.inner.tasks.lock().await.take();
        if let Some(tasks) = tasks {
            join_with_grace("event loop", tasks.event_loop, self.inner.tuning.shutdown_grace).await;
            join_with_grace("send worker", tasks.send_worker, self.inner.tuning.shutdown_grace).await;
            join_with_grace("health checker", tasks.health, self.inner.tuning.shutdown_grace).await;
        }

        let discarded = self.inner.queue.drain();
        if discarded > 0 {
            info!(discarded, "drained outbound queue on shutdown");
        }

        let mut state = self.inner.state.lock().await;
        state.transport = None;
        state.phase = Phase::Stopped;
    }

    /// Enqueues `bytes` for delivery. Never blocks and never fails visibly to
    /// the caller; a full queue is handled by the configured overflow policy.
    pub fn send_message(&self, bytes: Vec<u8>) {
        if !self.inner.queue.push(OutboundMessage::Frame(bytes)) {
            warn!("outbound queue full, message dropped by overflow policy");
        }
    }

    /// Returns the process-wide singleton, constructing it from the given
    /// arguments on first call. Subsequent calls ignore their arguments and
    /// return the existing instance — this is a convenience for callers that
    /// want a process-wide singleton, not an enforced constraint; nothing
    /// stops constructing additional sessions directly via [`Session::new`].
    #[must_use]
    pub fn shared(config: SessionConfig, tuning: SessionTuning, callbacks: Arc<dyn SessionCallbacks>) -> Self {
        SHARED.get_or_init(|| Self::new(config, tuning, callbacks)).clone()
    }

    #[must_use]
    pub async fn is_running(&self) -> bool {
        let state = self.inner.state.lock().await;
        !matches!(state.phase, Phase::Idle | Phase::Stopping | Phase::Stopped)
    }

    #[must_use]
    pub async fn status(&self) -> SessionStatus {
        let state = self.inner.state.lock().await;
        let tasks = self.inner.tasks.lock().await;
        SessionStatus {
            connected: state.phase == Phase::Connected,
            started: !matches!(state.phase, Phase::Idle),
            stopping: matches!(state.phase, Phase::Stopping | Phase::Stopped),
            retry_count: state.retry_count,
            max_retries_reached: state.max_retries_reached,
            queue_size: self.inner.queue.len(),
            event_worker_alive: tasks.as_ref().is_some_and(|t| !t.event_loop.is_finished()),
            send_worker_alive: tasks.as_ref().is_some_and(|t| !t.send_worker.is_finished()),
        }
    }
}

/// The event loop: owns the connection for its lifetime, driving the
/// Connecting → Connected → Reconnecting cycle with interruptible backoff.
async fn run_event_loop(inner: Arc<Inner>) {
    loop {
        {
            let state = inner.state.lock().await;
            if state.phase.is_terminal_or_stopping() {
                return;
            }
        }

        {
            let mut state = inner.state.lock().await;
            state.phase = Phase::Connecting;
        }

        let connect_result = transport::connect(
            &inner.config.url,
            &inner.config.client_identifier,
            &inner.config.last_connected_at,
            inner.tuning.connection_timeout,
        )
        .await;

        match connect_result {
            Ok((handle, source)) => {
                {
                    let mut state = inner.state.lock().await;
                    state.phase = Phase::Connected;
                    state.transport = Some(handle);
                    state.retry_count = 0;
                    state.max_retries_reached = false;
                }
                if inner.logger().enabled() {
                    info!(url = %inner.config.url, "connected");
                }

                run_connected(&inner, source).await;

                let mut state = inner.state.lock().await;
                state.transport = None;
                if !state.phase.is_terminal_or_stopping() {
                    state.phase = Phase::Reconnecting;
                }
            }
            Err(e) => {
                if inner.logger().enabled() {
                    warn!(error = %e, "connect attempt failed");
                }
                let mut state = inner.state.lock().await;
                if !state.phase.is_terminal_or_stopping() {
                    state.phase = Phase::Reconnecting;
                }
            }
        }

        if !backoff_and_check_continue(&inner).await {
            return;
        }
    }
}

/// Reads frames until the socket closes, errors, or shutdown is requested.
async fn run_connected(inner: &Arc<Inner>, mut source: transport::WsSource) {
    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_inbound(inner, text.as_bytes().to_vec()).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        dispatch_inbound(inner, bytes.to_vec()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {
                        // Ping, Pong, Frame — no application-level meaning here.
                    }
                    Some(Err(e)) => {
                        if inner.logger().enabled() {
                            error!(error = %e, "transport read error");
                        }
                        return;
                    }
                }
            }
            () = inner.shutdown.notified() => {
                if let Some(handle) = inner.state.lock().await.transport.clone() {
                    let _ = handle.close().await;
                }
                return;
            }
        }
    }
}

/// Receive Dispatcher: updates liveness, answers pings, and hands the
/// payload to the user callback off this task.
async fn dispatch_inbound(inner: &Arc<Inner>, payload: Vec<u8>) {
    {
        let mut state = inner.state.lock().await;
        state.last_message_at = Some(Instant::now());
    }

    if contains_ping(&payload) {
        inner.queue.push(OutboundMessage::Frame(wire::pong_frame(&inner.config.host_identifier)));
        if !inner.config.monitor_identifier.is_empty() {
            let status = status_snapshot(inner).await;
            inner.queue.push(OutboundMessage::Frame(wire::monitor_frame(
                &inner.config.monitor_identifier,
                &inner.config.client_identifier,
                &status,
            )));
        }
    }

    let callbacks = inner.callbacks.clone();
    let log_enabled = inner.logger().enabled();
    tokio::spawn(async move {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| callbacks.handle_message(payload)));
        if result.is_err() && log_enabled {
            error!("user message callback panicked; swallowed");
        }
    });
}

fn contains_ping(payload: &[u8]) -> bool {
    std::str::from_utf8(payload)
        .map(|s| s.contains(PING_MATCH_SUBSTRING))
        .unwrap_or(false)
}

async fn status_snapshot(inner: &Arc<Inner>) -> SessionStatus {
    let state = inner.state.lock().await;
    SessionStatus {
        connected: state.phase == Phase::Connected,
        started: !matches!(state.phase, Phase::Idle),
        stopping: matches!(state.phase, Phase::Stopping | Phase::Stopped),
        retry_count: state.retry_count,
        max_retries_reached: state.max_retries_reached,
        queue_size: inner.queue.len(),
        event_worker_alive: true,
        send_worker_alive: true,
    }
}

/// Checks the retry limit against the reconnect attempt that just failed,
/// then increments `retry_count` and sleeps the backoff delay for the next
/// attempt in interruptible 1-second slices.
///
/// `retry_count == 0` means no reconnect attempt has failed yet (only the
/// initial connect, which doesn't count against `retry_limit`), so the limit
/// check is skipped the first time through. Past that, `retry_count` names
/// the reconnect attempt that just failed; the limit check must happen here,
/// after that attempt was actually made, not before it — otherwise the
/// supervisor would give up one reconnect short of `retry_limit`.
///
/// Returns `false` if the event loop should exit (stopped, or max retries reached).
async fn backoff_and_check_continue(inner: &Arc<Inner>) -> bool {
    let delay = {
        let mut state = inner.state.lock().await;
        if state.phase.is_terminal_or_stopping() {
            return false;
        }

        if state.retry_count > 0 && state.retry_count >= inner.tuning.retry_limit {
            state.max_retries_reached = true;
            state.phase = Phase::Stopped;
            inner.callbacks.notify_max_retries_reached();
            return false;
        }

        state.retry_count += 1;
        let exponent = state.retry_count.saturating_sub(1).min(31);
        let scaled = inner.tuning.retry_initial_delay.saturating_mul(1u32 << exponent);
        scaled.min(inner.tuning.retry_max_delay)
    };

    if inner.logger().enabled() {
        debug!(?delay, "backing off before reconnect");
    }

    let mut remaining = delay;
    let slice = Duration::from_secs(1);
    while remaining > Duration::ZERO {
        let state = inner.state.lock().await;
        if state.phase.is_terminal_or_stopping() {
            return false;
        }
        drop(state);

        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }

    true
}

/// Drains the outbound queue, forwarding to the transport while Connected,
/// parking and re-enqueueing otherwise.
async fn run_send_worker(inner: Arc<Inner>) {
    loop {
        let msg = inner.queue.pop(Duration::from_secs(1)).await;
        let Some(msg) = msg else {
            let state = inner.state.lock().await;
            if state.phase.is_terminal_or_stopping() {
                return;
            }
            continue;
        };

        let bytes = match msg {
            OutboundMessage::StopSignal => return,
            OutboundMessage::Frame(bytes) => bytes,
        };

        let (phase, transport) = {
            let state = inner.state.lock().await;
            (state.phase, state.transport.clone())
        };

        if phase == Phase::Stopping || phase == Phase::Stopped {
            return;
        }

        if phase == Phase::Connected {
            if let Some(handle) = transport {
                if let Err(e) = handle.send(bytes).await {
                    if inner.logger().enabled() {
                        warn!(error = %e, "send failed, dropping message");
                    }
                }
            } else {
                // Phase says Connected but the handle hasn't landed yet; treat like disconnected.
                park_and_requeue(&inner, bytes).await;
            }
        } else {
            park_and_requeue(&inner, bytes).await;
        }
    }
}

async fn park_and_requeue(inner: &Arc<Inner>, bytes: Vec<u8>) {
    tokio::time::sleep(Duration::from_secs(1)).await;
    let state = inner.state.lock().await;
    if state.phase.is_terminal_or_stopping() {
        return;
    }
    drop(state);
    inner.queue.push_front(OutboundMessage::Frame(bytes));
}

async fn join_with_grace(name: &str, handle: JoinHandle<()>, grace: Duration) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(grace, handle).await.is_err() {
        warn!(worker = name, "worker exceeded shutdown grace, aborting");
        abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCallbacks;
    impl SessionCallbacks for NoopCallbacks {
        fn handle_message(&self, _payload: Vec<u8>) {}
    }

    fn test_config(url: &str) -> SessionConfig {
        SessionConfig {
            url: url.to_string(),
            client_identifier: "c-1".to_string(),
            host_identifier: "h-1".to_string(),
            monitor_identifier: String::new(),
            last_connected_at: "token".to_string(),
            log_enabled: false,
        }
    }

    #[tokio::test]
    async fn not_running_before_start() {
        let session = Session::new(test_config("ws://127.0.0.1:1/nope"), SessionTuning::default(), Arc::new(NoopCallbacks));
        assert!(!session.is_running().await);
    }

    #[tokio::test]
    async fn send_message_before_start_queues_it() {
        let session = Session::new(test_config("ws://127.0.0.1:1/nope"), SessionTuning::default(), Arc::new(NoopCallbacks));
        session.send_message(b"hello".to_vec());
        assert_eq!(session.status().await.queue_size, 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_safe_no_op() {
        let session = Session::new(test_config("ws://127.0.0.1:1/nope"), SessionTuning::default(), Arc::new(NoopCallbacks));
        session.stop().await;
        assert!(!session.is_running().await);
    }

    #[tokio::test]
    async fn shared_returns_the_same_instance_on_repeat_calls() {
        let first = Session::shared(test_config("ws://127.0.0.1:1/first"), SessionTuning::default(), Arc::new(NoopCallbacks));
        first.send_message(b"marker".to_vec());

        let second = Session::shared(test_config("ws://127.0.0.1:1/second"), SessionTuning::default(), Arc::new(NoopCallbacks));
        assert_eq!(second.status().await.queue_size, 1, "second call should observe the first instance's state");
    }

    #[tokio::test]
    async fn backoff_gives_up_only_after_the_retry_limit_th_attempt_fails() {
        let tuning = SessionTuning {
            retry_initial_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(1),
            retry_limit: 3,
            ..SessionTuning::default()
        };
        let inner = Inner::for_test(tuning, Phase::Reconnecting, None);

        // Attempt 1 (the initial connect) just failed: retry_count is still 0,
        // so this call must not give up yet, and must arm reconnect #1.
        assert!(backoff_and_check_continue(&inner).await);
        assert_eq!(inner.state.lock().await.retry_count, 1);

        // Reconnect #1 just failed: still short of retry_limit=3.
        assert!(backoff_and_check_continue(&inner).await);
        assert_eq!(inner.state.lock().await.retry_count, 2);

        // Reconnect #2 just failed: still short of retry_limit=3 — reconnect #3
        // must still be attempted before giving up.
        assert!(backoff_and_check_continue(&inner).await);
        assert_eq!(inner.state.lock().await.retry_count, 3);

        // Reconnect #3 (== retry_limit) just failed: now give up.
        assert!(!backoff_and_check_continue(&inner).await);
        let state = inner.state.lock().await;
        assert_eq!(state.retry_count, 3);
        assert!(state.max_retries_reached);
        assert_eq!(state.phase, Phase::Stopped);
    }
}
