use std::io::Cursor;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use suppaftp::FtpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::line_buffer::LineBuffer;
use super::{guard_single_watch, LogSource, LINE_CHANNEL_DEPTH};
use crate::config::RemoteEndpoint;
use crate::error::{GarrisonError, Result};
use crate::line::LogLine;

/// Mirrors [`super::secure_fs`]'s dial bound.
const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// FTP transport. `suppaftp` is blocking, so — like [`super::secure_fs`] —
/// the session runs on a `spawn_blocking` thread.
pub struct PlainFsLogSource {
    file_path: PathBuf,
    endpoint: RemoteEndpoint,
    read_from_start: bool,
    already_watching: bool,
}

impl PlainFsLogSource {
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
impl LogSource for PlainFsLogSource {
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

fn run_session_loop(
    file_path: PathBuf,
    endpoint: RemoteEndpoint,
    read_from_start: bool,
    tx: mpsc::Sender<LogLine>,
    ctx: CancellationToken,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let remote_path = file_path.to_string_lossy().to_string();

    let mut ftp = match open_session(&endpoint) {
        Ok(f) => f,
        Err(e) => {
            warn!(host = %endpoint.host, error = %e, "plain-fs session failed, closing");
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let supports_resume = ftp.feat().is_ok();

    let initial_size = match ftp.size(&remote_path) {
        Ok(size) => size as u64,
        Err(e) => {
            warn!(path = %remote_path, error = %e, "plain-fs size query failed, closing");
            let _ = ready_tx.send(Err(GarrisonError::FileNotFound(format!(
                "{remote_path}: {e}"
            ))));
            return;
        }
    };
    let mut offset: u64 = if read_from_start { 0 } else { initial_size };
    let mut buffer = LineBuffer::new();

    if ready_tx.send(Ok(())).is_err() {
        debug!(host = %endpoint.host, "plain-fs caller gave up before session was ready");
        return;
    }

    loop {
        if ctx.is_cancelled() {
            debug!(host = %endpoint.host, "plain-fs source cancelled");
            return;
        }
        std::thread::sleep(endpoint.poll_frequency);

        let size = match ftp.size(&remote_path) {
            Ok(size) => size as u64,
            Err(e) => {
                warn!(path = %remote_path, error = %e, "plain-fs size query failed, closing");
                return;
            }
        };

        if size < offset {
            offset = 0;
            buffer.reset();
        }
        if size == offset {
            if ftp.noop().is_err() {
                warn!(host = %endpoint.host, "plain-fs keepalive failed, closing");
                return;
            }
            continue;
        }

        let chunk = if supports_resume {
            match fetch_with_resume(&mut ftp, &remote_path, offset) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %remote_path, error = %e, "plain-fs partial retrieve failed, closing");
                    return;
                }
            }
        } else {
            match fetch_full_and_diff(&mut ftp, &remote_path, offset) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %remote_path, error = %e, "plain-fs full-file diff failed, closing");
                    return;
                }
            }
        };
        offset = size;

        let text = String::from_utf8_lossy(&chunk);
        for line in buffer.feed(&text) {
            if tx.blocking_send(LogLine::new(line, Utc::now())).is_err() {
                return;
            }
        }
    }
}

fn fetch_with_resume(
    ftp: &mut FtpStream,
    remote_path: &str,
    offset: u64,
) -> std::result::Result<Vec<u8>, suppaftp::FtpError> {
    ftp.resume_transfer(offset as usize)?;
    ftp.retr_as_buffer(remote_path).map(Cursor::into_inner)
}

/// Degrades to diffing the whole file's tail when the server lacks `REST`
/// support.
fn fetch_full_and_diff(
    ftp: &mut FtpStream,
    remote_path: &str,
    offset: u64,
) -> std::result::Result<Vec<u8>, suppaftp::FtpError> {
    let full = ftp.retr_as_buffer(remote_path)?.into_inner();
    let start = (offset as usize).min(full.len());
    Ok(full[start..].to_vec())
}

fn open_session(endpoint: &RemoteEndpoint) -> Result<FtpStream> {
    let addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| GarrisonError::TransportFailed(format!("dns resolution failed: {e}")))?
        .next()
        .ok_or_else(|| GarrisonError::TransportFailed("no addresses resolved".to_string()))?;

    // Bound the dial before handing off to `suppaftp`, which otherwise has
    // no connect timeout of its own and would block the blocking-pool
    // thread indefinitely against an unreachable host.
    TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)
        .map_err(|e| GarrisonError::TransportFailed(format!("dial failed: {e}")))?;

    let mut ftp = FtpStream::connect((endpoint.host.as_str(), endpoint.port))
        .map_err(|e| GarrisonError::TransportFailed(format!("dial failed: {e}")))?;
    ftp.login(&endpoint.username, &endpoint.password)
        .map_err(|e| GarrisonError::AuthenticationFailed(e.to_string()))?;
    ftp.transfer_type(suppaftp::types::FileType::Binary)
        .map_err(|e| GarrisonError::TransportFailed(format!("binary mode failed: {e}")))?;
    Ok(ftp)
}
