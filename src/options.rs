//! Client and connection options.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;

/// Default TCP keepalive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(180);

/// Default pause before a reconnect attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Externally configured TLS context for dialing.
///
/// The handshake completes before the engine wraps the stream; the engine
/// itself never touches TLS state.
#[derive(Clone)]
pub struct TlsOptions {
    /// Client configuration handed to the connector.
    pub config: Arc<ClientConfig>,
    /// Server name presented during the handshake.
    pub server_name: ServerName<'static>,
}

/// Options consumed by [`Client`](crate::Client) and
/// [`Conn::connect`](crate::Conn::connect).
#[derive(Clone, Default)]
pub struct Options {
    keep_alive: Option<Duration>,
    heartbeat: Option<Duration>,
    tls: Option<TlsOptions>,
    span: Option<tracing::Span>,
    reconnect: Option<Duration>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// TCP keepalive interval (default 3 minutes).
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Enable the idle heartbeat at the given interval.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Dial through the given TLS context.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Scope the connection's log output to an explicit span instead of the
    /// caller's current one.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Redial after a paused connection, waiting `backoff` between
    /// attempts.
    pub fn with_reconnect(mut self, backoff: Duration) -> Self {
        self.reconnect = Some(backoff);
        self
    }

    pub(crate) fn keep_alive(&self) -> Duration {
        self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE)
    }

    pub(crate) fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat
    }

    pub(crate) fn tls(&self) -> Option<&TlsOptions> {
        self.tls.as_ref()
    }

    pub(crate) fn span(&self) -> tracing::Span {
        self.span.clone().unwrap_or_else(tracing::Span::current)
    }

    pub(crate) fn reconnect(&self) -> Option<Duration> {
        self.reconnect
    }
}
