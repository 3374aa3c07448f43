use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, error, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::throttle::RateThrottle;

pub const USER_AGENT: &str = concat!("castsource/", env!("CARGO_PKG_VERSION"));

pub const CONTENT_TYPE: &str = "content-type";
pub const ICY_GENRE: &str = "icy-genre";
pub const ICY_PUB: &str = "icy-pub";
pub const ICY_NAME: &str = "icy-name";
pub const ICY_URL: &str = "icy-url";
pub const ICY_BR: &str = "icy-br";

/// Any reliable, ordered byte stream a source can speak over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Transport with read buffering for line-oriented handshakes.
pub type Connection = BufReader<Box<dyn Transport>>;

/// Receives connection state changes. All methods default to no-ops.
pub trait SourceListener: Send {
    fn on_connected(&self) {}

    /// `clean` is false when closing the transport reported an error.
    fn on_disconnected(&self, _clean: bool) {}

    fn on_error(&self, _message: &str) {}
}

/// Connection settings shared by every protocol.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    /// Mount point, e.g. `/stream`.
    pub mount: String,
    pub username: String,
    pub password: String,
    /// Bounds the TCP connect and every handshake read or write.
    pub timeout: Duration,
    /// Target bitrate in kilobits per second.
    pub kbps: u32,
    /// Throttle grace in milliseconds.
    pub burst_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8000,
            mount: "/".to_string(),
            username: "source".to_string(),
            password: String::new(),
            timeout: Duration::from_secs(5),
            kbps: 320,
            burst_ms: 0,
        }
    }
}

impl SourceConfig {
    pub fn new(kbps: u32, burst_ms: u64) -> Self {
        Self {
            kbps,
            burst_ms,
            ..Self::default()
        }
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a TCP connection to the configured server.
    pub async fn open(&self) -> Result<Box<dyn Transport>> {
        self.validate()?;
        debug!("Connecting to {}:{}", self.host, self.port);

        let stream = timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| Error::timed_out("connect"))??;
        Ok(Box::new(stream))
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Validation("no host configured".into()));
        }
        if self.port == 0 {
            return Err(Error::Validation("no port configured".into()));
        }
        Ok(())
    }
}

/// State every source carries: configuration, stream info, the throttle and
/// the live connection.
pub struct SourceCore {
    config: SourceConfig,
    started: bool,
    stream_info: IndexMap<String, String>,
    listener: Option<Box<dyn SourceListener>>,
    throttle: RateThrottle,
    connection: Option<Connection>,
}

impl SourceCore {
    pub fn new(config: SourceConfig) -> Self {
        let mut stream_info = IndexMap::new();
        stream_info.insert(CONTENT_TYPE.to_string(), "audio/mpeg".to_string());
        stream_info.insert(ICY_GENRE.to_string(), "N/A".to_string());
        stream_info.insert(ICY_PUB.to_string(), "0".to_string());
        stream_info.insert(ICY_NAME.to_string(), "N/A".to_string());
        stream_info.insert(ICY_URL.to_string(), "N/A".to_string());
        stream_info.insert(ICY_BR.to_string(), config.kbps.to_string());

        Self {
            throttle: RateThrottle::new(config.kbps, config.burst_ms),
            config,
            started: false,
            stream_info,
            listener: None,
            connection: None,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Stream info in header emission order.
    pub fn stream_info(&self) -> &IndexMap<String, String> {
        &self.stream_info
    }

    /// Overriding an existing key keeps its position; new keys go last.
    pub fn set_stream_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.stream_info.insert(key.into(), value.into());
    }

    pub fn stream_info_value(&self, key: &str) -> Option<&str> {
        self.stream_info.get(key).map(String::as_str)
    }

    /// Stream info rendered as `key: value` lines.
    pub fn stream_info_headers(&self, eol: &str) -> String {
        self.stream_info
            .iter()
            .map(|(k, v)| format!("{k}: {v}{eol}"))
            .collect()
    }

    pub fn set_listener(&mut self, listener: Box<dyn SourceListener>) {
        self.listener = Some(listener);
    }

    pub fn is_started(&self) -> bool {
        self.started && self.connection.is_some()
    }

    /// Replace any previous connection with `transport` for a fresh handshake.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.started = false;
        self.connection = Some(BufReader::new(transport));
    }

    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or_else(Error::closed)
    }

    /// Write handshake bytes, bounded by the configured timeout.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let limit = self.config.timeout;
        let conn = self.connection()?;
        timeout(limit, async {
            conn.write_all(data).await?;
            conn.flush().await
        })
        .await
        .map_err(|_| Error::timed_out("write"))??;
        Ok(())
    }

    /// Read one line without its terminator. `None` at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let limit = self.config.timeout;
        let conn = self.connection()?;
        let mut line = String::new();
        let n = timeout(limit, conn.read_line(&mut line))
            .await
            .map_err(|_| Error::timed_out("read"))??;

        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Handshake completed.
    pub fn mark_connected(&mut self) {
        self.started = true;
        debug!("Connected to {}:{}{}", self.config.host, self.config.port, self.config.mount);
        if let Some(listener) = &self.listener {
            listener.on_connected();
        }
    }

    /// Drop the transport after a failed connect and report `err`.
    pub fn fail(&mut self, err: Error) -> Error {
        self.started = false;
        self.connection = None;
        error!("Connection to {}:{} failed: {}", self.config.host, self.config.port, err);
        if let Some(listener) = &self.listener {
            listener.on_error(&err.to_string());
        }
        err
    }

    /// Throttle then write. Write failures disconnect instead of propagating.
    pub async fn write_throttled(&mut self, data: &[u8]) {
        if !self.is_started() || data.is_empty() {
            return;
        }

        self.throttle.throttle(data.len()).await;

        let result = match self.connection.as_mut() {
            Some(conn) => conn.write_all(data).await,
            None => return,
        };
        if let Err(e) = result {
            warn!("Write of {} bytes failed: {}; disconnecting", data.len(), e);
            self.disconnect().await;
        }
    }

    /// Flush and close the transport. Returns whether it closed cleanly.
    pub async fn disconnect(&mut self) -> bool {
        let clean = match self.connection.take() {
            Some(mut conn) => {
                let flushed = conn.flush().await;
                let closed = conn.shutdown().await;
                match flushed.and(closed) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Error closing connection: {}", e);
                        false
                    }
                }
            }
            None => true,
        };

        self.started = false;
        debug!("Disconnected (clean: {})", clean);
        if let Some(listener) = &self.listener {
            listener.on_disconnected(clean);
        }
        clean
    }
}

/// A client pushing one audio stream to a server.
///
/// Implementors provide the protocol handshake and metadata update; the
/// connection lifecycle and throttled writes are shared.
#[async_trait]
pub trait Source: Send {
    fn core(&self) -> &SourceCore;

    fn core_mut(&mut self) -> &mut SourceCore;

    /// Run the protocol handshake over the attached connection.
    async fn handshake(&mut self) -> Result<()>;

    /// Send a song/artist/album update. No-op unless started; failures are
    /// logged, not returned.
    async fn update_metadata(&mut self, song: &str, artist: &str, album: &str);

    /// Open a TCP connection to the configured server and handshake.
    async fn connect(&mut self) -> Result<()> {
        let config = self.core().config().clone();
        match config.open().await {
            Ok(transport) => self.connect_with(transport).await,
            Err(e) => Err(self.core_mut().fail(e)),
        }
    }

    /// Handshake over a caller-supplied transport.
    async fn connect_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.core_mut().attach(transport);
        match self.handshake().await {
            Ok(()) => {
                self.core_mut().mark_connected();
                Ok(())
            }
            Err(e) => Err(self.core_mut().fail(e)),
        }
    }

    fn is_started(&self) -> bool {
        self.core().is_started()
    }

    /// Write audio bytes, paced by the throttle. Silently does nothing when
    /// not started; a failed write disconnects.
    async fn write(&mut self, data: &[u8]) {
        self.core_mut().write_throttled(data).await;
    }

    async fn disconnect(&mut self) -> bool {
        self.core_mut().disconnect().await
    }

    fn set_listener(&mut self, listener: Box<dyn SourceListener>) {
        self.core_mut().set_listener(listener);
    }

    fn set_stream_info(&mut self, key: &str, value: &str) {
        self.core_mut().set_stream_info(key, value);
    }

    fn stream_info(&self, key: &str) -> Option<&str> {
        self.core().stream_info_value(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Accepts writes but fails to close.
    struct ResetOnClose;

    impl AsyncRead for ResetOnClose {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for ResetOnClose {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset by peer",
            )))
        }
    }

    #[derive(Clone, Default)]
    struct CleanFlags(Arc<Mutex<Vec<bool>>>);

    impl SourceListener for CleanFlags {
        fn on_disconnected(&self, clean: bool) {
            self.0.lock().unwrap().push(clean);
        }
    }

    #[test]
    fn test_stream_info_order_is_fixed() {
        let core = SourceCore::new(SourceConfig::new(128, 0));
        let keys: Vec<&str> = core.stream_info().keys().map(String::as_str).collect();

        assert_eq!(keys, [CONTENT_TYPE, ICY_GENRE, ICY_PUB, ICY_NAME, ICY_URL, ICY_BR]);
        assert_eq!(core.stream_info_value(ICY_BR), Some("128"));
    }

    #[test]
    fn test_override_keeps_position() {
        let mut core = SourceCore::new(SourceConfig::new(128, 0));
        core.set_stream_info(ICY_GENRE, "Jazz");
        core.set_stream_info("icy-description", "late night");

        let keys: Vec<&str> = core.stream_info().keys().map(String::as_str).collect();
        assert_eq!(keys[1], ICY_GENRE);
        assert_eq!(keys[6], "icy-description");
        assert_eq!(core.stream_info_value(ICY_GENRE), Some("Jazz"));
    }

    #[test]
    fn test_headers_render_in_order() {
        let core = SourceCore::new(SourceConfig::new(64, 0));
        assert_eq!(
            core.stream_info_headers("\n"),
            "content-type: audio/mpeg\nicy-genre: N/A\nicy-pub: 0\nicy-name: N/A\nicy-url: N/A\nicy-br: 64\n"
        );
    }

    #[tokio::test]
    async fn test_open_without_host_is_validation_error() {
        let config = SourceConfig::default();
        assert!(matches!(config.open().await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_write_before_connect_is_noop() {
        let mut core = SourceCore::new(SourceConfig::new(8, 0));
        core.write_throttled(&[0u8; 4096]).await;
        assert_eq!(core.throttle.written(), 0);
        assert!(!core.is_started());
    }

    #[tokio::test]
    async fn test_disconnect_reports_failed_close() {
        let flags = CleanFlags::default();
        let mut core = SourceCore::new(SourceConfig::new(128, 0));
        core.set_listener(Box::new(flags.clone()));
        core.attach(Box::new(ResetOnClose));

        assert!(!core.disconnect().await);
        assert!(!core.is_started());
        assert_eq!(*flags.0.lock().unwrap(), [false]);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_clean() {
        let flags = CleanFlags::default();
        let mut core = SourceCore::new(SourceConfig::new(128, 0));
        core.set_listener(Box::new(flags.clone()));

        assert!(core.disconnect().await);
        assert_eq!(*flags.0.lock().unwrap(), [true]);
    }

    #[tokio::test]
    async fn test_read_line_strips_terminator() -> anyhow::Result<()> {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"OK2\r\nicy-caps:11\n").await?;

        let mut core = SourceCore::new(SourceConfig::new(128, 0));
        core.attach(Box::new(client));

        assert_eq!(core.read_line().await?.as_deref(), Some("OK2"));
        assert_eq!(core.read_line().await?.as_deref(), Some("icy-caps:11"));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_line_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut core = SourceCore::new(
            SourceConfig::new(128, 0).with_timeout(Duration::from_millis(50)),
        );
        core.attach(Box::new(client));

        match core.read_line().await {
            Err(Error::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
