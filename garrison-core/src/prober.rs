//! Health Prober (C7): an on-demand, single round-trip connectivity check
//! for a server's configured transport.
//!
//! A prober never touches a live [`crate::supervisor::ConnectionSupervisor`]'s
//! transport — it opens its own short-lived session and tears it down
//! immediately, so probing can never perturb `connected` or
//! `reconnect_attempts`.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use ssh2::Session;
use suppaftp::FtpStream;
use tracing::debug;

use crate::collab::{LogTransportStatus, ProbeFailureReason};
use crate::config::{LogSourceConfig, RemoteEndpoint};

/// Performs a single minimal round-trip against a server's transport with
/// a bounded timeout.
pub struct HealthProber {
    timeout: Duration,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe a configured transport. Errors are normalized to one of the
    /// reasons in [`ProbeFailureReason`].
    pub async fn probe(&self, config: &LogSourceConfig) -> LogTransportStatus {
        let source_type = config.kind().to_string();
        let config = config.clone();

        let outcome = tokio::time::timeout(self.timeout, probe_blocking(config)).await;

        match outcome {
            Ok(Ok(())) => LogTransportStatus {
                enabled: true,
                source_type: Some(source_type),
                healthy: true,
                reason: None,
            },
            Ok(Err(reason)) => LogTransportStatus {
                enabled: true,
                source_type: Some(source_type),
                healthy: false,
                reason: Some(reason),
            },
            Err(_elapsed) => LogTransportStatus {
                enabled: true,
                source_type: Some(source_type),
                healthy: false,
                reason: Some(ProbeFailureReason::Timeout),
            },
        }
    }
}

async fn probe_blocking(config: LogSourceConfig) -> Result<(), ProbeFailureReason> {
    tokio::task::spawn_blocking(move || match &config {
        LogSourceConfig::Local { file_path, .. } => probe_local(file_path),
        LogSourceConfig::SecureFs {
            file_path, endpoint, ..
        } => probe_secure_fs(file_path, endpoint),
        LogSourceConfig::PlainFs {
            file_path, endpoint, ..
        } => probe_plain_fs(file_path, endpoint),
    })
    .await
    .unwrap_or(Err(ProbeFailureReason::ProbeFailed))
}

/// `stat` + open + 1-byte read; EOF is acceptable.
fn probe_local(file_path: &Path) -> Result<(), ProbeFailureReason> {
    let metadata = std::fs::metadata(file_path).map_err(|e| classify_io_error(&e))?;
    if metadata.is_dir() {
        return Err(ProbeFailureReason::LogPathIsDirectory);
    }

    let mut file = std::fs::File::open(file_path).map_err(|e| classify_io_error(&e))?;
    let mut probe_byte = [0u8; 1];
    match file.read(&mut probe_byte) {
        Ok(_) => Ok(()), // 0 bytes read (EOF) is fine too
        Err(e) => Err(classify_io_error(&e)),
    }
}

fn classify_io_error(e: &std::io::Error) -> ProbeFailureReason {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::NotFound => ProbeFailureReason::LogFileNotFound,
        ErrorKind::PermissionDenied => ProbeFailureReason::PermissionDenied,
        _ => ProbeFailureReason::ProbeFailed,
    }
}

/// Dial + authenticate + remote `stat(file_path)`.
fn probe_secure_fs(file_path: &Path, endpoint: &RemoteEndpoint) -> Result<(), ProbeFailureReason> {
    if endpoint.host.trim().is_empty() || endpoint.username.trim().is_empty() || endpoint.password.is_empty() {
        return Err(ProbeFailureReason::MissingCredentials);
    }

    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .map_err(|_| ProbeFailureReason::ConnectionFailed)?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|_| ProbeFailureReason::ConnectionFailed)?;

    let mut session = Session::new().map_err(|_| ProbeFailureReason::ProbeFailed)?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|_| ProbeFailureReason::ConnectionFailed)?;
    session
        .userauth_password(&endpoint.username, &endpoint.password)
        .map_err(|_| ProbeFailureReason::AuthenticationFailed)?;
    if !session.authenticated() {
        return Err(ProbeFailureReason::AuthenticationFailed);
    }

    let sftp = session.sftp().map_err(|_| ProbeFailureReason::ProbeFailed)?;
    sftp.stat(file_path)
        .map(|_| ())
        .map_err(|_| ProbeFailureReason::LogFileNotFound)
}

/// Dial + login + size query on `file_path`.
fn probe_plain_fs(file_path: &Path, endpoint: &RemoteEndpoint) -> Result<(), ProbeFailureReason> {
    if endpoint.host.trim().is_empty() || endpoint.username.trim().is_empty() || endpoint.password.is_empty() {
        return Err(ProbeFailureReason::MissingCredentials);
    }

    let mut ftp = FtpStream::connect((endpoint.host.as_str(), endpoint.port))
        .map_err(|_| ProbeFailureReason::ConnectionFailed)?;
    ftp.login(&endpoint.username, &endpoint.password)
        .map_err(|_| ProbeFailureReason::AuthenticationFailed)?;

    let remote_path = file_path.to_string_lossy().to_string();
    match ftp.size(&remote_path) {
        Ok(_) => {
            debug!(path = %remote_path, "plain-fs probe size query ok");
            Ok(())
        }
        Err(_) => Err(ProbeFailureReason::LogFileNotFound),
    }
}
