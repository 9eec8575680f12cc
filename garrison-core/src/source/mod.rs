//! Log Source (C1): three transports producing a lazy sequence of
//! [`LogLine`](crate::line::LogLine)s behind one capability trait.

mod line_buffer;
mod local;
mod plain_fs;
mod secure_fs;

pub use local::LocalLogSource;
pub use plain_fs::PlainFsLogSource;
pub use secure_fs::SecureFsLogSource;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::LogSourceConfig;
use crate::error::{GarrisonError, Result};
use crate::line::LogLine;

/// Depth of the bounded line channel every transport uses. Backpressure,
/// not drops, is the policy when a consumer falls behind.
pub const LINE_CHANNEL_DEPTH: usize = 256;

/// A transport's capability contract: produce lines until cancelled or
/// closed. `watch` may be called at most once per instance.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn watch(&mut self, ctx: CancellationToken) -> Result<mpsc::Receiver<LogLine>>;

    async fn close(&mut self);
}

/// Construct the concrete `LogSource` for a [`LogSourceConfig`], dispatching
/// on its variant. No inheritance hierarchy, just a match.
pub fn build(config: &LogSourceConfig) -> Result<Box<dyn LogSource>> {
    match config {
        LogSourceConfig::Local {
            file_path,
            read_from_start,
        } => Ok(Box::new(LocalLogSource::new(
            file_path.clone(),
            *read_from_start,
        ))),
        LogSourceConfig::SecureFs {
            file_path,
            endpoint,
            read_from_start,
        } => Ok(Box::new(SecureFsLogSource::new(
            file_path.clone(),
            endpoint.clone(),
            *read_from_start,
        ))),
        LogSourceConfig::PlainFs {
            file_path,
            endpoint,
            read_from_start,
        } => Ok(Box::new(PlainFsLogSource::new(
            file_path.clone(),
            endpoint.clone(),
            *read_from_start,
        ))),
    }
}

/// Shared "already watching" guard: every variant's `watch` starts with
/// this check so the error and the invariant text live in one place.
fn guard_single_watch(already_watching: &mut bool) -> Result<()> {
    if *already_watching {
        return Err(GarrisonError::AlreadyWatching);
    }
    *already_watching = true;
    Ok(())
}
