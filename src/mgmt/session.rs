//! Management session: connect, login, read queries
//!
//! A session owns one TCP (or TLS) stream. Queries serialize on an
//! internal mutex, so a session handle can be shared behind an `Arc`.
//! Any I/O or `!fatal` failure flips the session's `watch` channel to
//! closed; the connection pool observes that channel and evicts the key.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, trace, warn};

use crate::config::DeviceConfig;

use super::proto::{self, ReplyWord, Sentence};

/// Errors from the management session.
#[derive(Debug)]
pub enum SessionError {
    /// TCP/TLS connection could not be established
    ConnectFailed(String),

    /// Login was rejected
    AuthFailed(String),

    /// Connect attempt exceeded its timeout
    Timeout,

    /// I/O failure on an established session (session is dead)
    Io(io::Error),

    /// Malformed reply (session is dead)
    Protocol(String),

    /// Command-level `!trap`: the query failed but the session stays
    /// usable. Callers treat this as "block unavailable".
    Trap(String),
}

impl SessionError {
    /// Whether this error kills the whole session (as opposed to a single
    /// query block).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Trap(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectFailed(msg) => write!(f, "connection failed: {}", msg),
            SessionError::AuthFailed(msg) => write!(f, "authentication failed: {}", msg),
            SessionError::Timeout => write!(f, "connection attempt timed out"),
            SessionError::Io(err) => write!(f, "session I/O error: {}", err),
            SessionError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            SessionError::Trap(msg) => write!(f, "query failed: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Io(err)
    }
}

/// System resource block.
#[derive(Debug, Clone, Default)]
pub struct ResourceInfo {
    pub cpu_load: Option<f64>,
    pub total_memory: Option<u64>,
    pub free_memory: Option<u64>,
    pub uptime: Option<String>,
    pub board_name: Option<String>,
    pub version: Option<String>,
}

/// Health sensor block. Not all models expose these.
#[derive(Debug, Clone, Default)]
pub struct HealthInfo {
    pub temperature: Option<f64>,
    pub voltage: Option<f64>,
}

/// Byte counters of one interface.
#[derive(Debug, Clone, Copy)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// A live, authenticated management session.
#[async_trait]
pub trait ManagedSession: Send + Sync {
    async fn read_resource(&self) -> Result<ResourceInfo, SessionError>;

    async fn read_health(&self) -> Result<HealthInfo, SessionError>;

    async fn read_interface_counters(
        &self,
        interface: &str,
    ) -> Result<InterfaceCounters, SessionError>;

    async fn read_active_sessions(&self) -> Result<u64, SessionError>;

    /// Close the underlying stream and signal observers.
    async fn close(&self);

    /// Channel that flips to `true` when the session closes or errors.
    fn closed(&self) -> watch::Receiver<bool>;
}

/// Opens sessions. Behind a trait so tests can script sessions without a
/// network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, device: &DeviceConfig)
    -> Result<Arc<dyn ManagedSession>, SessionError>;
}

/// Plain-TCP or TLS stream, decided per device.
enum MgmtStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MgmtStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MgmtStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MgmtStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MgmtStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MgmtStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MgmtStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MgmtStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MgmtStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MgmtStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MgmtStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Production session over TCP/TLS.
pub struct MgmtSession {
    stream: Mutex<MgmtStream>,
    closed_tx: watch::Sender<bool>,
    peer: String,
}

impl MgmtSession {
    fn new(stream: MgmtStream, peer: String) -> Self {
        let (closed_tx, _) = watch::channel(false);

        Self {
            stream: Mutex::new(stream),
            closed_tx,
            peer,
        }
    }

    fn mark_closed(&self) {
        self.closed_tx.send_replace(true);
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let reply = self
            .command(&[
                "/login",
                &format!("=name={username}"),
                &format!("=password={password}"),
            ])
            .await;

        match reply {
            Ok(sentences) => {
                // A =ret= attribute on !done means the peer expects the
                // legacy challenge-response login, which we do not speak.
                let done = sentences.iter().find(|s| s.reply == ReplyWord::Done);
                if done.is_some_and(|s| s.attr("ret").is_some()) {
                    return Err(SessionError::AuthFailed(
                        "peer requires legacy challenge login".to_string(),
                    ));
                }
                debug!("{}: login accepted", self.peer);
                Ok(())
            }
            Err(SessionError::Trap(msg)) => Err(SessionError::AuthFailed(msg)),
            Err(e) => Err(e),
        }
    }

    /// Send one command sentence and collect the reply sentences up to and
    /// including `!done`. A `!trap` is surfaced after the reply is drained
    /// so the stream stays in sync.
    async fn command(&self, words: &[&str]) -> Result<Vec<Sentence>, SessionError> {
        let mut stream = self.stream.lock().await;

        let io_result = async {
            proto::write_sentence(&mut *stream, words).await?;

            let mut sentences = Vec::new();
            let mut trap: Option<String> = None;

            loop {
                let sentence = proto::parse_reply(proto::read_sentence(&mut *stream).await?)?;

                match sentence.reply {
                    ReplyWord::Re => sentences.push(sentence),
                    ReplyWord::Trap => {
                        let msg = sentence
                            .attr("message")
                            .unwrap_or("unspecified trap")
                            .to_string();
                        trap.get_or_insert(msg);
                    }
                    ReplyWord::Done => {
                        sentences.push(sentence);
                        return Ok::<_, io::Error>((sentences, trap));
                    }
                    ReplyWord::Fatal => {
                        let msg = sentence
                            .attributes
                            .values()
                            .next()
                            .cloned()
                            .unwrap_or_else(|| "connection terminated by peer".to_string());
                        return Err(io::Error::new(io::ErrorKind::ConnectionAborted, msg));
                    }
                }
            }
        }
        .await;

        match io_result {
            Ok((sentences, None)) => Ok(sentences),
            Ok((_, Some(trap))) => {
                trace!("{}: trap: {trap}", self.peer);
                Err(SessionError::Trap(trap))
            }
            Err(e) => {
                // The stream is no longer trustworthy.
                warn!("{}: session failed: {e}", self.peer);
                self.mark_closed();

                if e.kind() == io::ErrorKind::InvalidData {
                    Err(SessionError::Protocol(e.to_string()))
                } else {
                    Err(SessionError::Io(e))
                }
            }
        }
    }
}

#[async_trait]
impl ManagedSession for MgmtSession {
    async fn read_resource(&self) -> Result<ResourceInfo, SessionError> {
        let sentences = self.command(&["/system/resource/print"]).await?;
        let row = sentences
            .iter()
            .find(|s| s.reply == ReplyWord::Re)
            .ok_or_else(|| SessionError::Trap("empty resource reply".to_string()))?;

        Ok(ResourceInfo {
            cpu_load: row.attr("cpu-load").and_then(parse_number),
            total_memory: row.attr("total-memory").and_then(|v| v.parse().ok()),
            free_memory: row.attr("free-memory").and_then(|v| v.parse().ok()),
            uptime: row.attr("uptime").map(str::to_string),
            board_name: row.attr("board-name").map(str::to_string),
            version: row.attr("version").map(str::to_string),
        })
    }

    async fn read_health(&self) -> Result<HealthInfo, SessionError> {
        let sentences = self.command(&["/system/health/print"]).await?;

        let mut health = HealthInfo::default();
        for row in sentences.iter().filter(|s| s.reply == ReplyWord::Re) {
            // Newer firmware reports one name/value row per sensor, older
            // firmware reports both sensors as attributes of a single row.
            if let (Some(name), Some(value)) = (row.attr("name"), row.attr("value")) {
                match name {
                    n if n.contains("temperature") => health.temperature = parse_number(value),
                    "voltage" => health.voltage = parse_number(value),
                    _ => {}
                }
            } else {
                if let Some(v) = row.attr("temperature").and_then(parse_number) {
                    health.temperature = Some(v);
                }
                if let Some(v) = row.attr("voltage").and_then(parse_number) {
                    health.voltage = Some(v);
                }
            }
        }

        Ok(health)
    }

    async fn read_interface_counters(
        &self,
        interface: &str,
    ) -> Result<InterfaceCounters, SessionError> {
        let sentences = self
            .command(&[
                "/interface/print",
                "=stats=",
                &format!("?name={interface}"),
            ])
            .await?;

        let row = sentences
            .iter()
            .find(|s| s.reply == ReplyWord::Re)
            .ok_or_else(|| SessionError::Trap(format!("no such interface: {interface}")))?;

        let rx_bytes = row
            .attr("rx-byte")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SessionError::Trap("interface reply lacks rx-byte".to_string()))?;
        let tx_bytes = row
            .attr("tx-byte")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SessionError::Trap("interface reply lacks tx-byte".to_string()))?;

        Ok(InterfaceCounters { rx_bytes, tx_bytes })
    }

    async fn read_active_sessions(&self) -> Result<u64, SessionError> {
        let sentences = self
            .command(&["/ip/firewall/connection/print", "=count-only="])
            .await?;

        sentences
            .iter()
            .find(|s| s.reply == ReplyWord::Done)
            .and_then(|s| s.attr("ret"))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SessionError::Trap("count reply lacks ret value".to_string()))
    }

    async fn close(&self) {
        self.mark_closed();

        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.shutdown().await {
            trace!("{}: shutdown: {e}", self.peer);
        }
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim_end_matches('%').trim().parse().ok()
}

/// Opens TCP/TLS sessions and performs the credential login.
pub struct MgmtConnector {
    tls: TlsConnector,
}

impl MgmtConnector {
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for MgmtConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MgmtConnector {
    async fn connect(
        &self,
        device: &DeviceConfig,
    ) -> Result<Arc<dyn ManagedSession>, SessionError> {
        let managed = device.managed.as_ref().ok_or_else(|| {
            SessionError::ConnectFailed("device has no management credentials".to_string())
        })?;

        let peer = format!("{}:{}", device.address, device.port);
        debug!("{peer}: connecting");

        let tcp = TcpStream::connect((device.address, device.port))
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let stream = if device.use_tls {
            let server_name = ServerName::from(device.address);
            let tls = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| SessionError::ConnectFailed(format!("TLS handshake: {e}")))?;
            MgmtStream::Tls(Box::new(tls))
        } else {
            MgmtStream::Plain(tcp)
        };

        let session = MgmtSession::new(stream, peer);
        session.login(&managed.username, &managed.password).await?;

        Ok(Arc::new(session))
    }
}
