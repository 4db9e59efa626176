//! Streaming ticker client for Kite Connect.
//!
//! [`KiteTicker`] owns one WebSocket connection to the ticker gateway and
//! turns everything that happens on it into [`TickerEvent`]s delivered on a
//! `broadcast` channel. The connection is driven by a single Tokio task that
//! multiplexes the socket, the control commands, the keepalive timers and the
//! reconnect backoff with `tokio::select!`.
//!
//! # Architecture
//!
//! ```text
//!   KiteTicker (handle)                    event loop task
//!  ┌──────────────────┐  mpsc Command   ┌──────────────────────────┐
//!  │ subscribe()      │ ──────────────▶ │ connect / serve / backoff │
//!  │ set_mode()       │ ◀── oneshot ─── │  ├─ socket frames         │
//!  │ close()          │                 │  ├─ keepalive timers      │
//!  │ events()         │ ◀── broadcast ─ │  └─ SubscriptionRegistry  │
//!  └──────────────────┘                 └──────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use kite_rs::ws::ticker::{KiteTicker, TickerEvent};
//! use kite_rs::types::Mode;
//!
//! # #[tokio::main]
//! # async fn main() -> kite_rs::error::Result<()> {
//! let mut ticker = KiteTicker::builder("api-key", "access-token")
//!     .reconnect_max_tries(10)
//!     .build();
//!
//! let mut events = ticker.events();
//! ticker.connect()?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         TickerEvent::Connected => {
//!             ticker.subscribe(&[738_561]).await?;
//!             ticker.set_mode(Mode::Full, &[738_561]).await?;
//!         }
//!         TickerEvent::Ticks(ticks) => println!("{ticks:?}"),
//!         TickerEvent::RetriesExhausted => break,
//!         _ => {}
//!     }
//! }
//! ticker.close(None).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{self, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::constants::{KITE_VERSION, KITE_VERSION_HEADER, USER_AGENT, WS_TICKER_URL, limits};
use crate::error::{KiteError, Result};
use crate::types::enums::{ConnectionState, Mode};
use crate::types::tick::Tick;
use crate::ws::keepalive::{Keepalive, KeepaliveTick};
use crate::ws::market_feed::parse_binary;
use crate::ws::order_update::{TextEvent, parse_text_message};
use crate::ws::reconnect::{
    ReconnectConfig, ReconnectPolicy, clamp_initial_delay, clamp_max_delay, clamp_max_retries,
};
use crate::ws::subscription::{ControlMessage, SubscriptionRegistry};

/// Longest close reason a close frame can carry.
const MAX_CLOSE_REASON: usize = 123;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything the ticker reports to its consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum TickerEvent {
    /// The socket is open and subscriptions have been replayed.
    Connected,
    /// The socket closed. `code` is the WebSocket close code (1006 when the
    /// connection was lost without a close handshake).
    Closed { code: u16, reason: String },
    /// A transport error, a rejected handshake (`code` is the HTTP status) or
    /// an error message pushed by the server (`code` is 0).
    Error { code: u16, reason: String },
    /// Ticks decoded from one binary frame. Never empty.
    Ticks(Vec<Tick>),
    /// Raw inbound data frame. Only emitted when
    /// [`TickerConfig::emit_raw_messages`] is set.
    Message { payload: Bytes, is_binary: bool },
    /// A reconnection attempt is about to start.
    Reconnecting { attempt: u32 },
    /// Automatic reconnection gave up. Emitted once.
    RetriesExhausted,
    /// An order changed state. See
    /// [`OrderUpdate`](crate::ws::order_update::OrderUpdate) for a typed view.
    OrderUpdate(serde_json::Value),
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Source of the authenticated socket URL.
///
/// The URL is requested afresh for every connection attempt, so an
/// implementation can hand out a renewed access token after
/// [`session_expired`](Credentials::session_expired) was called.
pub trait Credentials: Send + Sync + 'static {
    /// URL to open, including the authentication query parameters.
    fn socket_url(&self) -> Result<Url>;

    /// Called when the gateway rejects the handshake with 401 or 403.
    fn session_expired(&self) {}
}

impl<F> Credentials for F
where
    F: Fn() -> Result<Url> + Send + Sync + 'static,
{
    fn socket_url(&self) -> Result<Url> {
        self()
    }
}

/// An API key and access token that never change.
#[derive(Clone)]
pub struct StaticCredentials {
    root: String,
    api_key: String,
    access_token: String,
}

impl StaticCredentials {
    /// Credentials for the gateway at `root`.
    pub fn new(
        root: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            api_key: api_key.into(),
            access_token: access_token.into(),
        }
    }
}

impl Credentials for StaticCredentials {
    fn socket_url(&self) -> Result<Url> {
        Ok(Url::parse_with_params(
            &self.root,
            &[
                ("api_key", self.api_key.as_str()),
                ("access_token", self.access_token.as_str()),
            ],
        )?)
    }

    fn session_expired(&self) {
        tracing::warn!("access token rejected by the ticker gateway, a new session is required");
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("root", &self.root)
            .field("api_key", &self.api_key)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens WebSocket connections.
///
/// [`TungsteniteConnector`] is the production implementation. Tests can
/// provide an in-memory socket instead.
pub trait Connector: Send + Sync + 'static {
    /// The connected socket.
    type Socket: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static;

    /// Perform the opening handshake.
    fn connect(&self, url: Url) -> impl Future<Output = Result<Self::Socket>> + Send;
}

/// Connects with `tokio-tungstenite` over TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn connect(&self, url: Url) -> Result<Self::Socket> {
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            HeaderName::from_static(KITE_VERSION_HEADER),
            HeaderValue::from_static(KITE_VERSION),
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        let (socket, response) = connect_async(request).await?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(socket)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the [`KiteTicker`].
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// Root URI of the gateway. Default: `wss://ws.kite.trade`.
    pub root: String,
    /// Whether to reconnect after an unexpected disconnect. Default: true.
    pub auto_reconnect: bool,
    /// Backoff and retry limits.
    pub reconnect: ReconnectConfig,
    /// Timeout for a single connection attempt. Default: 30 s.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings. Default: 2.5 s.
    pub ping_interval: Duration,
    /// Broadcast channel capacity for events. Default: 4,096.
    pub event_channel_capacity: usize,
    /// Whether to emit [`TickerEvent::Message`] for every data frame.
    pub emit_raw_messages: bool,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            root: WS_TICKER_URL.to_owned(),
            auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
            connect_timeout: limits::CONNECT_TIMEOUT,
            ping_interval: limits::PING_INTERVAL,
            event_channel_capacity: limits::EVENT_CHANNEL_CAPACITY,
            emit_raw_messages: false,
        }
    }
}

impl TickerConfig {
    /// Bring out-of-range values back into range, logging a warning for each.
    pub fn clamped(mut self) -> Self {
        self.reconnect = self.reconnect.clamped();
        if self.ping_interval.is_zero() {
            tracing::warn!("ping interval can not be zero, using {:?}", limits::PING_INTERVAL);
            self.ping_interval = limits::PING_INTERVAL;
        }
        if self.event_channel_capacity == 0 {
            tracing::warn!(
                "event channel capacity can not be zero, using {}",
                limits::EVENT_CHANNEL_CAPACITY
            );
            self.event_channel_capacity = limits::EVENT_CHANNEL_CAPACITY;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum CredentialSource {
    Static { api_key: String, access_token: String },
    Custom(Arc<dyn Credentials>),
}

/// Builder for a [`KiteTicker`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kite_rs::ws::ticker::KiteTicker;
///
/// let ticker = KiteTicker::builder("api-key", "access-token")
///     .reconnect_max_tries(1_000) // clamped to 300
///     .reconnect_max_delay(Duration::from_secs(30))
///     .emit_raw_messages(true)
///     .build();
/// assert_eq!(ticker.config().reconnect.max_retries, 300);
/// ```
pub struct KiteTickerBuilder<C = TungsteniteConnector> {
    credentials: CredentialSource,
    connector: C,
    config: TickerConfig,
}

impl KiteTickerBuilder<TungsteniteConnector> {
    /// Authenticate with an API key and access token.
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            credentials: CredentialSource::Static {
                api_key: api_key.into(),
                access_token: access_token.into(),
            },
            connector: TungsteniteConnector,
            config: TickerConfig::default(),
        }
    }

    /// Authenticate through a custom [`Credentials`] source.
    pub fn with_credentials(credentials: impl Credentials) -> Self {
        Self {
            credentials: CredentialSource::Custom(Arc::new(credentials)),
            connector: TungsteniteConnector,
            config: TickerConfig::default(),
        }
    }
}

impl<C: Connector> KiteTickerBuilder<C> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: TickerConfig) -> Self {
        self.config = config;
        self
    }

    /// Root URI of the gateway. Ignored by custom credentials.
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Enable or disable automatic reconnection. Default: true.
    pub fn reconnect(mut self, enable: bool) -> Self {
        self.config.auto_reconnect = enable;
        self
    }

    /// Maximum reconnection attempts (at most 300). Default: 50.
    pub fn reconnect_max_tries(mut self, n: u32) -> Self {
        self.config.reconnect.max_retries = clamp_max_retries(n);
        self
    }

    /// Cap on the reconnect delay (at least 5 s). Default: 60 s.
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.max_delay = clamp_max_delay(delay);
        self
    }

    /// Delay before the first reconnection attempt (at least 100 ms). Default: 1 s.
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.initial_delay = clamp_initial_delay(delay);
        self
    }

    /// Timeout for a single connection attempt. Default: 30 s.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Interval between keepalive pings. Default: 2.5 s.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Broadcast channel capacity for events. Default: 4,096.
    pub fn event_channel_capacity(mut self, cap: usize) -> Self {
        self.config.event_channel_capacity = cap;
        self
    }

    /// Emit [`TickerEvent::Message`] for every data frame. Default: false.
    pub fn emit_raw_messages(mut self, enable: bool) -> Self {
        self.config.emit_raw_messages = enable;
        self
    }

    /// Use a different transport.
    pub fn connector<D: Connector>(self, connector: D) -> KiteTickerBuilder<D> {
        KiteTickerBuilder {
            credentials: self.credentials,
            connector,
            config: self.config,
        }
    }

    /// Build the [`KiteTicker`]. Nothing connects until
    /// [`connect`](KiteTicker::connect) is called.
    pub fn build(self) -> KiteTicker<C> {
        let config = self.config.clamped();
        let credentials: Arc<dyn Credentials> = match self.credentials {
            CredentialSource::Static {
                api_key,
                access_token,
            } => Arc::new(StaticCredentials::new(
                config.root.clone(),
                api_key,
                access_token,
            )),
            CredentialSource::Custom(credentials) => credentials,
        };
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        KiteTicker {
            config,
            credentials,
            connector: Arc::new(self.connector),
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            events,
            state: Arc::new(watch::Sender::new(ConnectionState::Disconnected)),
            commands: None,
            task: None,
        }
    }
}

// ---------------------------------------------------------------------------
// KiteTicker
// ---------------------------------------------------------------------------

enum Command {
    Send {
        message: ControlMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reason: Option<String>,
    },
}

/// Handle to a streaming ticker connection.
///
/// Subscriptions survive reconnects and `close()`/`connect()` cycles: the
/// registry is replayed every time a connection opens.
///
/// Dropping the handle aborts the event loop without a close handshake.
pub struct KiteTicker<C: Connector = TungsteniteConnector> {
    config: TickerConfig,
    credentials: Arc<dyn Credentials>,
    connector: Arc<C>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    events: broadcast::Sender<TickerEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl KiteTicker<TungsteniteConnector> {
    /// Ticker with default configuration.
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        KiteTickerBuilder::new(api_key, access_token).build()
    }

    /// Start building a ticker.
    pub fn builder(
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> KiteTickerBuilder<TungsteniteConnector> {
        KiteTickerBuilder::new(api_key, access_token)
    }
}

impl<C: Connector> KiteTicker<C> {
    /// Start the event loop in the current Tokio runtime.
    ///
    /// Returns immediately; progress is reported through [`events`](Self::events).
    /// Fails if the loop is already running or no runtime is available.
    pub fn connect(&mut self) -> Result<()> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(KiteError::InvalidArgument(
                "ticker is already running".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            KiteError::InvalidArgument("connect() must be called inside a Tokio runtime".into())
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop {
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
            config: self.config.clone(),
            credentials: Arc::clone(&self.credentials),
            connector: Arc::clone(&self.connector),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            commands: rx,
        };

        self.commands = Some(tx);
        self.task = Some(runtime.spawn(event_loop.run()));
        tracing::info!("KiteTicker started");
        Ok(())
    }

    /// Subscribe to instruments. New tokens stream in [`Mode::Quote`].
    pub async fn subscribe(&self, tokens: &[u32]) -> Result<()> {
        self.request(ControlMessage::Subscribe(tokens.to_vec())).await
    }

    /// Unsubscribe from instruments.
    pub async fn unsubscribe(&self, tokens: &[u32]) -> Result<()> {
        self.request(ControlMessage::Unsubscribe(tokens.to_vec())).await
    }

    /// Change the streaming mode of instruments.
    pub async fn set_mode(&self, mode: Mode, tokens: &[u32]) -> Result<()> {
        self.request(ControlMessage::Mode(mode, tokens.to_vec())).await
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Sends a normal close frame carrying `reason` when a socket is open.
    /// Calling it again, or before [`connect`](Self::connect), is a no-op.
    pub async fn close(&mut self, reason: Option<&str>) -> Result<()> {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close {
                reason: reason.map(str::to_owned),
            });
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "event loop had already stopped"),
                Err(e) if e.is_panic() => tracing::error!(error = %e, "event loop panicked"),
                Err(_) => {}
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    /// Wait for the event loop to stop on its own.
    ///
    /// Returns [`KiteError::RetriesExhausted`] when reconnection gave up and
    /// [`KiteError::NotConnected`] when the loop is not running.
    pub async fn join(&mut self) -> Result<()> {
        let task = self.task.take().ok_or(KiteError::NotConnected)?;
        self.commands = None;
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// New receiver for ticker events.
    ///
    /// Only events sent after this call are received, so subscribe before
    /// calling [`connect`](Self::connect).
    pub fn events(&self) -> broadcast::Receiver<TickerEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the subscribed tokens and their modes.
    pub async fn subscribed_tokens(&self) -> std::collections::BTreeMap<u32, Mode> {
        self.registry.lock().await.snapshot()
    }

    /// The effective (clamped) configuration.
    pub fn config(&self) -> &TickerConfig {
        &self.config
    }

    async fn request(&self, message: ControlMessage) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(KiteError::NotConnected)?;
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Send { message, reply })
            .map_err(|_| KiteError::NotConnected)?;
        response.await.map_err(|_| KiteError::NotConnected)?
    }
}

impl<C: Connector> Drop for KiteTicker<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// How an open session ended.
enum SessionEnd {
    /// Closed on request. No reconnect.
    Closed,
    /// Lost unexpectedly. The reconnect path takes over.
    Lost,
}

struct EventLoop<C: Connector> {
    config: TickerConfig,
    credentials: Arc<dyn Credentials>,
    connector: Arc<C>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    events: broadcast::Sender<TickerEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    policy: ReconnectPolicy,
}

impl<C: Connector> EventLoop<C> {
    async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("KiteTicker stopped");
        result
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.state.send_replace(ConnectionState::Connecting);

            match self.open().await {
                None => return Ok(()),
                Some(Ok(socket)) => {
                    if let SessionEnd::Closed = self.serve(socket).await {
                        return Ok(());
                    }
                }
                Some(Err(e)) => self.connect_failed(&e),
            }

            if !self.config.auto_reconnect {
                tracing::info!("auto reconnect disabled, not reconnecting");
                return Ok(());
            }

            let Some(delay) = self.policy.next_delay() else {
                let attempts = self.policy.attempt_count();
                tracing::error!(attempts, "maximum reconnect attempts reached");
                self.emit(TickerEvent::RetriesExhausted);
                return Err(KiteError::RetriesExhausted(attempts));
            };
            let attempt = self.policy.attempt_count();
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");

            if interruptible(&mut self.commands, tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return Ok(());
            }
            self.emit(TickerEvent::Reconnecting { attempt });
        }
    }

    /// One connection attempt. `None` when `close()` interrupted it.
    async fn open(&mut self) -> Option<Result<C::Socket>> {
        let url = match self.credentials.socket_url() {
            Ok(url) => url,
            Err(e) => return Some(Err(e)),
        };
        tracing::info!(host = url.host_str().unwrap_or_default(), "connecting");

        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, connector.connect(url));
        interruptible(&mut self.commands, attempt)
            .await
            .map(|outcome| outcome.unwrap_or(Err(KiteError::ConnectTimeout(timeout))))
    }

    fn connect_failed(&self, error: &KiteError) {
        if let Some(status) = rejected_status(error) {
            tracing::error!(status, "handshake rejected");
            self.credentials.session_expired();
            self.emit(TickerEvent::Error {
                code: status,
                reason: error.to_string(),
            });
            return;
        }
        tracing::error!(error = %error, "connection attempt failed");
        self.emit(TickerEvent::Error {
            code: u16::from(CloseCode::Abnormal),
            reason: error.to_string(),
        });
    }

    /// Drive one open connection until it closes.
    async fn serve(&mut self, mut socket: C::Socket) -> SessionEnd {
        self.policy.reset();
        self.state.send_replace(ConnectionState::Open);

        let write_timeout = self.config.ping_interval;
        let replay = self.registry.lock().await.resubscribe();
        for message in &replay {
            if let Err(e) = send_control(&mut socket, message, write_timeout).await {
                return self.abort_after_send_failure(socket, message, &e).await;
            }
        }
        tracing::info!(resubscribed = replay.len(), "connected");
        self.emit(TickerEvent::Connected);

        let mut keepalive = Keepalive::new(self.config.ping_interval);
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send { message, reply }) => {
                        match send_control(&mut socket, &message, write_timeout).await {
                            Ok(()) => {
                                self.registry.lock().await.apply(&message);
                                tracing::debug!(
                                    action = message.action(),
                                    tokens = message.tokens().len(),
                                    "control message sent"
                                );
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let end = self.abort_after_send_failure(socket, &message, &e).await;
                                let _ = reply.send(Err(e));
                                return end;
                            }
                        }
                    }
                    Some(Command::Close { reason }) => return self.close_session(socket, reason).await,
                    None => return self.close_session(socket, None).await,
                },
                frame = socket.next() => match frame {
                    Some(Ok(message)) => {
                        if let Some(end) = self.on_frame(message, &mut keepalive) {
                            // Flush the close reply queued by the protocol layer.
                            if let Err(e) = bounded(limits::CLOSE_TIMEOUT, socket.close()).await {
                                tracing::debug!(error = %e, "failed to complete close handshake");
                            }
                            return end;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket error");
                        self.emit(TickerEvent::Error {
                            code: u16::from(CloseCode::Abnormal),
                            reason: e.to_string(),
                        });
                        return self.lost(e.to_string());
                    }
                    None => return self.lost("connection reset".into()),
                },
                tick = keepalive.tick() => match tick {
                    KeepaliveTick::SendPing => {
                        let ping = socket.send(Message::Ping(Bytes::new()));
                        if let Err(e) = bounded(write_timeout, ping).await {
                            tracing::error!(error = %e, "failed to send ping");
                            return self.lost(e.to_string());
                        }
                        keepalive.record_ping(Instant::now());
                    }
                    KeepaliveTick::CheckPong => {
                        let now = Instant::now();
                        if keepalive.is_stale(now) {
                            let silent_ms = keepalive
                                .since_last_pong(now)
                                .map_or(0, |d| d.as_millis() as u64);
                            tracing::warn!(silent_ms, "no pong from server, dropping connection");
                            drop(socket);
                            return self.lost(format!("no pong received for {silent_ms} ms"));
                        }
                    }
                },
            }
        }
    }

    /// Handle one inbound frame. `Some` when the session is over.
    fn on_frame(&self, message: Message, keepalive: &mut Keepalive) -> Option<SessionEnd> {
        match message {
            Message::Binary(data) => {
                if self.config.emit_raw_messages {
                    self.emit(TickerEvent::Message {
                        payload: data.clone(),
                        is_binary: true,
                    });
                }
                let ticks = parse_binary(&data);
                if !ticks.is_empty() {
                    self.emit(TickerEvent::Ticks(ticks));
                }
            }
            Message::Text(text) => {
                if self.config.emit_raw_messages {
                    self.emit(TickerEvent::Message {
                        payload: Bytes::copy_from_slice(text.as_bytes()),
                        is_binary: false,
                    });
                }
                match parse_text_message(text.as_str()) {
                    Some(TextEvent::OrderUpdate(data)) => self.emit(TickerEvent::OrderUpdate(data)),
                    Some(TextEvent::Error { code, reason }) => {
                        tracing::warn!(reason = %reason, "error message from server");
                        self.emit(TickerEvent::Error { code, reason });
                    }
                    None => {}
                }
            }
            Message::Pong(_) => keepalive.record_pong(Instant::now()),
            Message::Close(frame) => {
                let (code, reason) = frame.map_or((u16::from(CloseCode::Status), String::new()), |f| {
                    (u16::from(f.code), f.reason.as_str().to_owned())
                });
                tracing::info!(code, reason = %reason, "WebSocket closed by server");
                self.state.send_replace(ConnectionState::Connecting);
                self.emit(TickerEvent::Closed { code, reason });
                return Some(SessionEnd::Lost);
            }
            Message::Ping(_) | Message::Frame(_) => {}
        }
        None
    }

    /// A control message could not be written: close with the reason and
    /// hand over to the reconnect path.
    async fn abort_after_send_failure(
        &self,
        mut socket: C::Socket,
        message: &ControlMessage,
        error: &KiteError,
    ) -> SessionEnd {
        let reason = format!("Error while {}: {error}", message.action());
        tracing::warn!(action = message.action(), error = %error, "failed to send control message");
        let close = socket.send(close_frame(CloseCode::Normal, &reason));
        let _ = bounded(limits::CLOSE_TIMEOUT, close).await;
        self.emit(TickerEvent::Error {
            code: u16::from(CloseCode::Abnormal),
            reason: reason.clone(),
        });
        self.lost(reason)
    }

    async fn close_session(&self, mut socket: C::Socket, reason: Option<String>) -> SessionEnd {
        self.state.send_replace(ConnectionState::Closing);
        let reason = reason.unwrap_or_default();
        let close = socket.send(close_frame(CloseCode::Normal, &reason));
        if let Err(e) = bounded(limits::CLOSE_TIMEOUT, close).await {
            tracing::debug!(error = %e, "failed to send close frame");
        }
        tracing::info!(reason = %reason, "connection closed");
        self.emit(TickerEvent::Closed {
            code: u16::from(CloseCode::Normal),
            reason,
        });
        SessionEnd::Closed
    }

    fn lost(&self, reason: String) -> SessionEnd {
        tracing::info!(reason = %reason, "connection lost");
        self.state.send_replace(ConnectionState::Connecting);
        self.emit(TickerEvent::Closed {
            code: u16::from(CloseCode::Abnormal),
            reason,
        });
        SessionEnd::Lost
    }

    fn emit(&self, event: TickerEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// Run `fut` while answering commands. `None` if `close()` was requested
/// (or the handle dropped) before it completed.
async fn interruptible<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    fut: F,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            command = commands.recv() => match command {
                Some(Command::Send { reply, .. }) => {
                    let _ = reply.send(Err(KiteError::NotConnected));
                }
                Some(Command::Close { .. }) | None => return None,
            },
        }
    }
}

async fn send_control<S>(socket: &mut S, message: &ControlMessage, limit: Duration) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let json = message.to_json()?;
    bounded(limit, socket.send(Message::Text(json.into()))).await
}

/// Await a socket write for at most `limit`.
async fn bounded<F>(limit: Duration, write: F) -> Result<()>
where
    F: Future<Output = std::result::Result<(), WsError>>,
{
    match tokio::time::timeout(limit, write).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(KiteError::WriteTimeout(limit)),
    }
}

fn close_frame(code: CloseCode, reason: &str) -> Message {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    Message::Close(Some(CloseFrame {
        code,
        reason: reason[..end].to_owned().into(),
    }))
}

/// HTTP status of a handshake rejected for authentication reasons.
fn rejected_status(error: &KiteError) -> Option<u16> {
    match error {
        KiteError::WebSocket(WsError::Http(response)) => {
            let status = response.status().as_u16();
            matches!(status, 401 | 403).then_some(status)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_build_the_socket_url() {
        let creds = StaticCredentials::new("wss://ws.kite.trade", "key", "tok en");
        let url = creds.socket_url().unwrap();
        assert_eq!(url.as_str(), "wss://ws.kite.trade/?api_key=key&access_token=tok+en");
        assert!(!format!("{creds:?}").contains("tok en"));
    }

    #[test]
    fn closures_are_credentials() {
        let creds = || -> Result<Url> { Ok(Url::parse("wss://example.test/feed")?) };
        assert_eq!(creds.socket_url().unwrap().path(), "/feed");
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let ticker = KiteTicker::builder("k", "t")
            .reconnect_max_tries(500)
            .reconnect_max_delay(Duration::from_secs(1))
            .reconnect_initial_delay(Duration::ZERO)
            .ping_interval(Duration::ZERO)
            .event_channel_capacity(0)
            .build();
        let cfg = ticker.config();
        assert_eq!(cfg.reconnect.initial_delay, limits::MIN_RECONNECT_INITIAL_DELAY);
        assert_eq!(cfg.reconnect.max_retries, limits::MAX_RECONNECT_MAX_TRIES);
        assert_eq!(cfg.reconnect.max_delay, limits::MIN_RECONNECT_MAX_DELAY);
        assert_eq!(cfg.ping_interval, limits::PING_INTERVAL);
        assert_eq!(cfg.event_channel_capacity, limits::EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn builder_defaults() {
        let ticker = KiteTicker::new("k", "t");
        let cfg = ticker.config();
        assert_eq!(cfg.root, WS_TICKER_URL);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.reconnect.max_retries, 50);
        assert_eq!(cfg.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(30));
        assert!(!cfg.emit_raw_messages);
        assert_eq!(ticker.state(), ConnectionState::Disconnected);
        assert!(!ticker.is_connected());
    }

    #[test]
    fn close_reason_is_truncated_on_a_char_boundary() {
        let reason = "é".repeat(100);
        match close_frame(CloseCode::Normal, &reason) {
            Message::Close(Some(frame)) => {
                assert!(frame.reason.len() <= MAX_CLOSE_REASON);
                assert_eq!(frame.reason.len() % 2, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn connect_outside_a_runtime_fails() {
        let mut ticker = KiteTicker::new("k", "t");
        assert!(matches!(ticker.connect(), Err(KiteError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn commands_before_connect_are_rejected() {
        let mut ticker = KiteTicker::new("k", "t");
        assert!(matches!(ticker.subscribe(&[1]).await, Err(KiteError::NotConnected)));
        assert!(matches!(
            ticker.set_mode(Mode::Full, &[1]).await,
            Err(KiteError::NotConnected)
        ));
        ticker.close(None).await.unwrap();
        assert!(ticker.subscribed_tokens().await.is_empty());
    }
}
