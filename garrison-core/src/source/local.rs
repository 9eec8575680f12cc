use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use notify::{Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::line_buffer::LineBuffer;
use super::{guard_single_watch, LogSource, LINE_CHANNEL_DEPTH};
use crate::error::Result;
use crate::line::LogLine;

/// Polling tick used when native change notification is unavailable or the
/// path lives on a network filesystem: falls back to periodic polling on a
/// ≥ 1s interval.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long `watch` keeps retrying a reopen after rename/rotation before
/// giving up and closing the channel.
const REOPEN_RETRY_WINDOW: Duration = Duration::from_secs(10);
const REOPEN_RETRY_STEP: Duration = Duration::from_millis(250);

/// Local filesystem transport: native change notification via `notify`,
/// with a poll fallback on network filesystems, tailing a single file
/// instead of watching a directory tree.
pub struct LocalLogSource {
    file_path: PathBuf,
    read_from_start: bool,
    already_watching: bool,
}

impl LocalLogSource {
    pub fn new(file_path: PathBuf, read_from_start: bool) -> Self {
        Self {
            file_path,
            read_from_start,
            already_watching: false,
        }
    }
}

#[async_trait]
impl LogSource for LocalLogSource {
    async fn watch(&mut self, ctx: CancellationToken) -> Result<mpsc::Receiver<LogLine>> {
        guard_single_watch(&mut self.already_watching)?;

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_DEPTH);
        let file_path = self.file_path.clone();
        let read_from_start = self.read_from_start;

        tokio::spawn(run_watch_loop(file_path, read_from_start, tx, ctx));

        Ok(rx)
    }

    async fn close(&mut self) {
        // The spawned task exits on the caller cancelling `ctx` or on the
        // receiver half of the line channel being dropped; there is no
        // separate resource held here to release.
    }
}

async fn run_watch_loop(
    file_path: PathBuf,
    read_from_start: bool,
    tx: mpsc::Sender<LogLine>,
    ctx: CancellationToken,
) {
    let (mut file, mut offset) = match open_and_position(&file_path, read_from_start) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %file_path.display(), error = %e, "local log source failed to open, closing");
            return;
        }
    };

    let mut buffer = LineBuffer::new();

    // Drain once before registering the watcher: with `read_from_start`,
    // bytes already on disk between offset 0 and EOF would otherwise sit
    // unread until some later filesystem event happens to wake the loop.
    if drain_new_bytes(&mut file, &mut offset, &mut buffer, &tx)
        .await
        .is_err()
    {
        return;
    }

    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
    let _watcher = spawn_wake_source(&file_path, wake_tx);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!(path = %file_path.display(), "local log source cancelled");
                break;
            }
            woke = wake_rx.recv() => {
                if woke.is_none() {
                    break;
                }
                if let Err(_closed) = drain_new_bytes(&mut file, &mut offset, &mut buffer, &tx).await {
                    // Consumer is gone; no point reopening.
                    break;
                }
                if file_missing_or_rotated(&file_path, &file) {
                    match reopen_with_retry(&file_path, &ctx).await {
                        Some(new_file) => {
                            file = new_file;
                            offset = 0;
                            buffer.reset();
                        }
                        None => {
                            warn!(path = %file_path.display(), "local log source permanently lost, closing");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// `Err` means the line channel's receiver was dropped; the caller should
/// stop driving this source entirely rather than attempt recovery.
async fn drain_new_bytes(
    file: &mut File,
    offset: &mut u64,
    buffer: &mut LineBuffer,
    tx: &mpsc::Sender<LogLine>,
) -> std::result::Result<(), ()> {
    let len = match file.metadata() {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };

    if len < *offset {
        // Truncation: the file shrank under us.
        *offset = 0;
        buffer.reset();
        if file.seek(SeekFrom::Start(0)).is_err() {
            return Ok(());
        }
    } else if len == *offset {
        return Ok(());
    }

    let mut chunk = vec![0u8; (len - *offset) as usize];
    if file.seek(SeekFrom::Start(*offset)).is_err() {
        return Ok(());
    }
    if file.read_exact(&mut chunk).is_err() {
        return Ok(());
    }
    *offset = len;

    let text = String::from_utf8_lossy(&chunk);
    for line in buffer.feed(&text) {
        tx.send(LogLine::new(line, Utc::now())).await.map_err(|_| ())?;
    }
    Ok(())
}

fn file_missing_or_rotated(path: &Path, open_file: &File) -> bool {
    let Ok(disk_meta) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(open_meta) = open_file.metadata() else {
        return true;
    };
    !same_file_identity(&disk_meta, &open_meta)
}

#[cfg(unix)]
fn same_file_identity(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.ino() == b.ino() && a.dev() == b.dev()
}

#[cfg(not(unix))]
fn same_file_identity(_a: &std::fs::Metadata, _b: &std::fs::Metadata) -> bool {
    true
}

async fn reopen_with_retry(path: &Path, ctx: &CancellationToken) -> Option<File> {
    let deadline = tokio::time::Instant::now() + REOPEN_RETRY_WINDOW;
    while tokio::time::Instant::now() < deadline {
        if ctx.is_cancelled() {
            return None;
        }
        if let Ok(f) = File::open(path) {
            debug!(path = %path.display(), "local log source reopened after rotation");
            return Some(f);
        }
        tokio::time::sleep(REOPEN_RETRY_STEP).await;
    }
    None
}

fn open_and_position(path: &Path, read_from_start: bool) -> std::io::Result<(File, u64)> {
    let mut file = File::open(path)?;
    let offset = if read_from_start {
        0
    } else {
        file.seek(SeekFrom::End(0))?
    };
    Ok((file, offset))
}

/// Bridges a synchronous `notify` callback (or, on failure / network
/// filesystems, a plain poll timer) into the async wake channel the watch
/// loop selects on. Returning the watcher keeps it alive for the duration
/// of the loop; dropping it tears down the OS-level watch.
fn spawn_wake_source(path: &Path, wake_tx: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    if is_network_filesystem(path) {
        warn!(path = %path.display(), "local log source on network filesystem, using poll fallback");
        spawn_poll_ticker(wake_tx);
        return None;
    }

    let cb_tx = wake_tx.clone();
    let watcher = notify::recommended_watcher(move |res: std::result::Result<NotifyEvent, notify::Error>| {
        if res.is_ok() {
            let _ = cb_tx.send(());
        }
    });

    match watcher {
        Ok(mut w) => match w.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => Some(w),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to register native watch, falling back to polling");
                spawn_poll_ticker(wake_tx);
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to construct native watcher, falling back to polling");
            spawn_poll_ticker(wake_tx);
            None
        }
    }
}

fn spawn_poll_ticker(wake_tx: mpsc::UnboundedSender<()>) {
    tokio::spawn(async move {
        let mut ticker = interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if wake_tx.send(()).is_err() {
                break;
            }
        }
    });
}

/// Best-effort network-filesystem detection via `/proc/mounts` (Linux).
/// Non-Linux targets and unreadable `/proc/mounts` conservatively report
/// `false`, which simply means the native watcher is tried first.
fn is_network_filesystem(path: &Path) -> bool {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let Ok(file) = File::open("/proc/mounts") else {
        return false;
    };
    let reader = BufReader::new(file);

    let mut best_match: Option<(PathBuf, String)> = None;
    for line in reader.lines().map_while(std::result::Result::ok) {
        let mut parts = line.split_whitespace();
        let _src = parts.next();
        let mountpoint = parts.next();
        let fstype = parts.next();
        if let (Some(mnt), Some(fs_type)) = (mountpoint, fstype) {
            let mnt_path = PathBuf::from(mnt);
            if canonical.starts_with(&mnt_path) {
                let take = match &best_match {
                    None => true,
                    Some((best, _)) => mnt_path.as_os_str().len() > best.as_os_str().len(),
                };
                if take {
                    best_match = Some((mnt_path, fs_type.to_string()));
                }
            }
        }
    }

    matches!(
        best_match.map(|(_, fstype)| fstype),
        Some(fstype) if matches!(fstype.as_str(), "nfs" | "nfs4" | "cifs" | "smbfs" | "fuse.sshfs")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::time::timeout;

    #[tokio::test]
    async fn watch_emits_preexisting_line_when_reading_from_start() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "hello world\n").unwrap();

        let mut source = LocalLogSource::new(file.path().to_path_buf(), true);
        let ctx = CancellationToken::new();
        let mut rx = source.watch(ctx.clone()).await.unwrap();

        let line = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("channel closed unexpectedly");
        assert_eq!(line.raw_text, "hello world");

        ctx.cancel();
    }

    #[tokio::test]
    async fn watch_twice_fails_with_already_watching() {
        let file = NamedTempFile::new().unwrap();
        let mut source = LocalLogSource::new(file.path().to_path_buf(), true);
        let ctx = CancellationToken::new();
        let _rx = source.watch(ctx.clone()).await.unwrap();

        let err = source.watch(ctx).await.unwrap_err();
        assert!(matches!(err, crate::error::GarrisonError::AlreadyWatching));
    }

    #[tokio::test]
    async fn missing_file_closes_channel_without_error() {
        let mut source = LocalLogSource::new(PathBuf::from("/nonexistent/path.log"), true);
        let ctx = CancellationToken::new();
        let mut rx = source.watch(ctx.clone()).await.unwrap();

        let result = timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(result, Ok(None)));
    }
}
