use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ssh2::Session;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::line_buffer::LineBuffer;
use super::{guard_single_watch, LogSource, LINE_CHANNEL_DEPTH};
use crate::config::RemoteEndpoint;
use crate::error::{GarrisonError, Result};
use crate::line::LogLine;

/// Bounds the initial dial so an unreachable host fails `connect()`
/// synchronously instead of only surfacing later as a closed channel.
const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// SFTP transport. `ssh2` is a blocking libssh2 binding, so the whole
/// session lives on a `spawn_blocking` thread and lines are bridged back
/// through a std-blocking send on the tokio channel.
pub struct SecureFsLogSource {
    file_path: PathBuf,
    endpoint: RemoteEndpoint,
    read_from_start: bool,
    already_watching: bool,
}

impl SecureFsLogSource {
    pub fn new(file_path: PathBuf, endpoint: RemoteEndpoint, read_from_start: bool) -> Self {
        Self {
            file_path,
            endpoint,
            read_from_start,
            already_watching: false,
        }
    }
}

#[async_trait]
impl LogSource for SecureFsLogSource {
    async fn watch(&mut self, ctx: CancellationToken) -> Result<mpsc::Receiver<LogLine>> {
        guard_single_watch(&mut self.already_watching)?;

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let file_path = self.file_path.clone();
        let endpoint = self.endpoint.clone();
        let read_from_start = self.read_from_start;

        tokio::task::spawn_blocking(move || {
            run_session_loop(file_path, endpoint, read_from_start, tx, ctx, ready_tx)
        });

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(rx),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(GarrisonError::TransportFailed(
                "session task ended before connecting".to_string(),
            )),
            Err(_) => Err(GarrisonError::Timeout(HANDSHAKE_TIMEOUT)),
        }
    }

    async fn close(&mut self) {}
}

/// Runs the whole blocking session on one thread: dial, authenticate, stat
/// the initial offset, signal `ready_tx` once established, then poll. A
/// failure before the first signal reports through `ready_tx` instead of
/// just closing the channel, so the caller's `connect()` attempt fails
/// eagerly.
fn run_session_loop(
    file_path: PathBuf,
    endpoint: RemoteEndpoint,
    read_from_start: bool,
    tx: mpsc::Sender<LogLine>,
    ctx: CancellationToken,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let remote_path = file_path.to_string_lossy().to_string();

    let session = match open_session(&endpoint) {
        Ok(s) => s,
        Err(e) => {
            warn!(host = %endpoint.host, error = %e, "secure-fs session failed, closing");
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let sftp = match session.sftp() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "secure-fs sftp channel failed, closing");
            let _ = ready_tx.send(Err(GarrisonError::TransportFailed(format!(
                "sftp channel failed: {e}"
            ))));
            return;
        }
    };

    let initial_size = match sftp.stat(std::path::Path::new(&remote_path)) {
        Ok(stat) => stat.size.unwrap_or(0),
        Err(e) => {
            warn!(path = %remote_path, error = %e, "secure-fs remote stat failed, closing");
            let _ = ready_tx.send(Err(GarrisonError::FileNotFound(format!(
                "{remote_path}: {e}"
            ))));
            return;
        }
    };
    let mut offset: u64 = if read_from_start { 0 } else { initial_size };
    let mut buffer = LineBuffer::new();

    if ready_tx.send(Ok(())).is_err() {
        debug!(host = %endpoint.host, "secure-fs caller gave up before session was ready");
        return;
    }

    loop {
        if ctx.is_cancelled() {
            debug!(host = %endpoint.host, "secure-fs source cancelled");
            return;
        }
        std::thread::sleep(endpoint.poll_frequency);

        let stat = match sftp.stat(std::path::Path::new(&remote_path)) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %remote_path, error = %e, "secure-fs stat failed, closing");
                return;
            }
        };
        let size = stat.size.unwrap_or(0);

        if size < offset {
            offset = 0;
            buffer.reset();
        }
        if size == offset {
            if session.keepalive_send().is_err() {
                warn!(host = %endpoint.host, "secure-fs keepalive failed, closing");
                return;
            }
            continue;
        }

        let mut remote_file = match sftp.open(std::path::Path::new(&remote_path)) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %remote_path, error = %e, "secure-fs reopen failed, closing");
                return;
            }
        };
        if remote_file.seek(SeekFrom::Start(offset)).is_err() {
            warn!(path = %remote_path, "secure-fs seek failed, closing");
            return;
        }

        let mut chunk = vec![0u8; (size - offset) as usize];
        if remote_file.read_exact(&mut chunk).is_err() {
            warn!(path = %remote_path, "secure-fs read failed, closing");
            return;
        }
        offset = size;

        let text = String::from_utf8_lossy(&chunk);
        for line in buffer.feed(&text) {
            if tx.blocking_send(LogLine::new(line, Utc::now())).is_err() {
                return;
            }
        }
    }
}

fn open_session(endpoint: &RemoteEndpoint) -> Result<Session> {
    let addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| GarrisonError::TransportFailed(format!("dns resolution failed: {e}")))?
        .next()
        .ok_or_else(|| GarrisonError::TransportFailed("no addresses resolved".to_string()))?;

    let stream = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)
        .map_err(|e| GarrisonError::TransportFailed(format!("dial failed: {e}")))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| GarrisonError::TransportFailed(e.to_string()))?;

    let mut session =
        Session::new().map_err(|e| GarrisonError::TransportFailed(format!("session init failed: {e}")))?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|e| GarrisonError::TransportFailed(format!("handshake failed: {e}")))?;
    session
        .userauth_password(&endpoint.username, &endpoint.password)
        .map_err(|e| GarrisonError::AuthenticationFailed(e.to_string()))?;

    if !session.authenticated() {
        return Err(GarrisonError::AuthenticationFailed(
            "authentication failed".to_string(),
        ));
    }

    Ok(session)
}
