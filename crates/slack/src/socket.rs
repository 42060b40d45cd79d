use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use jokebot_core::{ApplicationError, BotIdentity, ConnectionSnapshot, MembershipTracker};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::actions::{ActionExecutor, MessageSender, OutboundMessage};
use crate::events::{session_dispatcher, EventContext, EventDispatcher, HandlerResult, SlackEvent};
use crate::router::PatternRouter;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed reconnect attempts tolerated; `None` retries forever.
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: None, base_delay_ms: 250, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max_retries| attempt >= max_retries)
    }
}

/// The real-time client: one ordered event stream plus the send primitive.
#[async_trait]
pub trait RtmTransport: MessageSender {
    async fn connect(&self, token: &SecretString) -> Result<ConnectionSnapshot, TransportError>;
    /// `Ok(None)` means the stream ended cleanly.
    async fn next_event(&self) -> Result<Option<SlackEvent>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

pub struct NoopRtmTransport {
    identity: BotIdentity,
}

impl Default for NoopRtmTransport {
    fn default() -> Self {
        Self { identity: BotIdentity::new("BNOOP", "jokebot") }
    }
}

#[async_trait]
impl MessageSender for NoopRtmTransport {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        debug!(channel_id = %message.channel_id, "noop transport dropped outbound message");
        Ok(())
    }
}

#[async_trait]
impl RtmTransport for NoopRtmTransport {
    async fn connect(&self, _token: &SecretString) -> Result<ConnectionSnapshot, TransportError> {
        Ok(ConnectionSnapshot::new(self.identity.clone()))
    }

    async fn next_event(&self) -> Result<Option<SlackEvent>, TransportError> {
        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { seeded: bool },
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Failed => "failed",
        }
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self, Self::Connected { seeded: true })
    }
}

/// Rejects tokens that could never authenticate, before any connection attempt.
pub fn validate_token(token: &SecretString) -> Result<(), ApplicationError> {
    let raw = token.expose_secret();
    if raw.trim().is_empty() {
        return Err(ApplicationError::Configuration("access token is missing".to_owned()));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(ApplicationError::Configuration(
            "access token must not contain whitespace".to_owned(),
        ));
    }
    Ok(())
}

enum SessionEnd {
    Closed,
    Dropped(TransportError),
}

type ExecutionOutcome = (String, Result<usize, ApplicationError>);

/// Upper bound on waiting for routed actions once a session has ended.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionSupervisor {
    token: SecretString,
    transport: Arc<dyn RtmTransport>,
    membership: Arc<MembershipTracker>,
    router: Arc<PatternRouter>,
    executor: Arc<ActionExecutor>,
    reconnect_policy: ReconnectPolicy,
    drain_timeout: Duration,
    identity: OnceLock<BotIdentity>,
    state: watch::Sender<ConnectionState>,
    event_sequence: AtomicU64,
}

impl ConnectionSupervisor {
    pub fn new(
        token: SecretString,
        transport: Arc<dyn RtmTransport>,
        membership: Arc<MembershipTracker>,
        router: Arc<PatternRouter>,
        executor: Arc<ActionExecutor>,
        reconnect_policy: ReconnectPolicy,
    ) -> Result<Self, ApplicationError> {
        validate_token(&token)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            token,
            transport,
            membership,
            router,
            executor,
            reconnect_policy,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            identity: OnceLock::new(),
            state,
            event_sequence: AtomicU64::new(0),
        })
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn identity(&self) -> Option<&BotIdentity> {
        self.identity.get()
    }

    /// Runs until the event stream closes cleanly (`Ok`) or the connection
    /// cannot be established (`ApplicationError::Connection`). The first
    /// connect failing is fatal; drops reconnect under the reconnect policy.
    pub async fn run(&self) -> Result<(), ApplicationError> {
        let mut connected_once = false;
        let mut attempt: u32 = 0;

        loop {
            self.publish(ConnectionState::Connecting);
            info!(
                event_name = "connection.connecting",
                correlation_id = "connection",
                attempt,
                "opening real-time connection"
            );

            let snapshot = match self.transport.connect(&self.token).await {
                Ok(snapshot) => snapshot,
                Err(transport_error) => {
                    if !connected_once || self.reconnect_policy.exhausted(attempt) {
                        self.publish(ConnectionState::Failed);
                        error!(
                            event_name = "connection.failed",
                            correlation_id = "connection",
                            attempt,
                            error = %transport_error,
                            "real-time connection could not be established"
                        );
                        return Err(ApplicationError::Connection(transport_error.to_string()));
                    }

                    self.publish(ConnectionState::Disconnected);
                    warn!(
                        event_name = "connection.retrying",
                        correlation_id = "connection",
                        attempt,
                        max_retries = ?self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "reconnect attempt failed"
                    );
                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            connected_once = true;
            attempt = 0;
            let end = self.run_session(snapshot).await;

            if let Err(disconnect_error) = self.transport.disconnect().await {
                warn!(
                    event_name = "connection.disconnect_failed",
                    correlation_id = "connection",
                    error = %disconnect_error,
                    "failed to close transport cleanly"
                );
            }

            match end {
                SessionEnd::Closed => {
                    info!(
                        event_name = "connection.closed",
                        correlation_id = "connection",
                        "real-time event stream closed"
                    );
                    return Ok(());
                }
                SessionEnd::Dropped(transport_error) => {
                    warn!(
                        event_name = "connection.dropped",
                        correlation_id = "connection",
                        error = %transport_error,
                        "real-time connection dropped; reconnecting"
                    );
                }
            }
        }
    }

    /// Seeds state from the connection payload, registers a fresh handler
    /// set, and pumps events until the stream ends. The session is reported
    /// `Disconnected` before in-flight actions are drained.
    async fn run_session(&self, snapshot: ConnectionSnapshot) -> SessionEnd {
        self.publish(ConnectionState::Connected { seeded: false });
        let identity = self.capture_identity(snapshot.identity);

        let summary = self.membership.seed(&identity.id, snapshot.channels, snapshot.groups);
        self.publish(ConnectionState::Connected { seeded: true });
        info!(
            event_name = "connection.seeded",
            correlation_id = "connection",
            bot_id = %identity.id,
            known_users = snapshot.users.len(),
            channels = summary.channels,
            groups = summary.groups,
            rejected = summary.rejected,
            "membership seeded from connection snapshot"
        );

        let dispatcher =
            session_dispatcher(identity, Arc::clone(&self.router), Arc::clone(&self.membership));
        let mut in_flight = JoinSet::new();

        let end = loop {
            match self.transport.next_event().await {
                Ok(Some(event)) => self.handle_event(&dispatcher, event, &mut in_flight).await,
                Ok(None) => break SessionEnd::Closed,
                Err(transport_error) => break SessionEnd::Dropped(transport_error),
            }

            while let Some(joined) = in_flight.try_join_next() {
                log_execution(joined);
            }
        };

        self.publish(ConnectionState::Disconnected);
        self.drain(&mut in_flight).await;
        end
    }

    async fn drain(&self, in_flight: &mut JoinSet<ExecutionOutcome>) {
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                log_execution(joined);
            }
        })
        .await;
        if drained.is_ok() {
            return;
        }

        warn!(
            event_name = "action.drain_timed_out",
            correlation_id = "connection",
            pending = in_flight.len(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "routed actions still running after session end; aborting them"
        );
        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next().await {
            log_execution(joined);
        }
    }

    async fn handle_event(
        &self,
        dispatcher: &EventDispatcher,
        event: SlackEvent,
        in_flight: &mut JoinSet<ExecutionOutcome>,
    ) {
        let sequence = self.event_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let ctx = EventContext { correlation_id: format!("evt-{sequence}") };

        debug!(
            event_name = "ingress.event_received",
            correlation_id = %ctx.correlation_id,
            event_type = ?event.event_type(),
            channel_id = event.channel_id().unwrap_or("none"),
            "received real-time event"
        );

        match dispatcher.dispatch(&event, &ctx).await {
            Ok(HandlerResult::Responded(action)) => {
                let executor = Arc::clone(&self.executor);
                in_flight.spawn(async move {
                    let result = executor.execute(action, &ctx).await;
                    (ctx.correlation_id, result)
                });
            }
            Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
            Err(dispatch_error) => {
                warn!(
                    event_name = "ingress.dispatch_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %dispatch_error,
                    "event dispatch failed; continuing event loop"
                );
            }
        }
    }

    fn capture_identity(&self, offered: BotIdentity) -> BotIdentity {
        let identity = self.identity.get_or_init(|| offered.clone());
        if identity != &offered {
            warn!(
                event_name = "connection.identity_changed",
                correlation_id = "connection",
                bot_id = %identity.id,
                offered_id = %offered.id,
                "reconnect reported a different identity; keeping the original"
            );
        }
        identity.clone()
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

fn log_execution(joined: Result<ExecutionOutcome, JoinError>) {
    match joined {
        Ok((correlation_id, Ok(sent))) => {
            debug!(event_name = "action.completed", correlation_id = %correlation_id, sent);
        }
        Ok((correlation_id, Err(handler_error))) => {
            warn!(
                event_name = "action.failed",
                correlation_id = %correlation_id,
                error_kind = handler_error.kind(),
                error = %handler_error,
                "routed action failed; not retrying"
            );
        }
        Err(join_error) => {
            warn!(
                event_name = "action.aborted",
                correlation_id = "unknown",
                error = %join_error,
                "routed action task did not complete"
            );
        }
    }
}
