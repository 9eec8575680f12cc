//! [`LogSourceConfig`]: the discriminated transport configuration, plus
//! the validation required at construction time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GarrisonError, Result};

const DEFAULT_SECURE_FS_PORT: u16 = 22;
const DEFAULT_PLAIN_FS_PORT: u16 = 21;
const DEFAULT_POLL_FREQUENCY: Duration = Duration::from_secs(5);

/// Inclusive bounds `poll_frequency` must fall within (1-300s, spec-fixed
/// rather than a deployment-configurable knob).
#[derive(Debug, Clone, Copy)]
pub struct PollFrequencyBounds {
    pub min: Duration,
    pub max: Duration,
}

impl Default for PollFrequencyBounds {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

/// Which of the three transport variants a [`LogSourceConfig`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    SecureFs,
    PlainFs,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::Local => "local",
            SourceKind::SecureFs => "secure-fs",
            SourceKind::PlainFs => "plain-fs",
        };
        f.write_str(s)
    }
}

/// Credentials and dial parameters shared by the two remote transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub poll_frequency: Duration,
}

/// A server's log transport configuration.
///
/// Constructed only through the `local`/`secure_fs`/`plain_fs` builders,
/// which enforce the required-field and range checks; there is no public
/// way to build a value that fails [`LogSourceConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSourceConfig {
    Local {
        file_path: PathBuf,
        read_from_start: bool,
    },
    SecureFs {
        file_path: PathBuf,
        endpoint: RemoteEndpoint,
        read_from_start: bool,
    },
    PlainFs {
        file_path: PathBuf,
        endpoint: RemoteEndpoint,
        read_from_start: bool,
    },
}

impl LogSourceConfig {
    pub fn local(file_path: impl Into<PathBuf>, read_from_start: bool) -> Result<Self> {
        let file_path = file_path.into();
        let cfg = Self::Local {
            file_path,
            read_from_start,
        };
        cfg.validate(PollFrequencyBounds::default())?;
        Ok(cfg)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn secure_fs(
        file_path: impl Into<PathBuf>,
        host: impl Into<String>,
        port: Option<u16>,
        username: impl Into<String>,
        password: impl Into<String>,
        poll_frequency: Option<Duration>,
        read_from_start: bool,
        bounds: PollFrequencyBounds,
    ) -> Result<Self> {
        let cfg = Self::SecureFs {
            file_path: file_path.into(),
            endpoint: RemoteEndpoint {
                host: host.into(),
                port: port.unwrap_or(DEFAULT_SECURE_FS_PORT),
                username: username.into(),
                password: password.into(),
                poll_frequency: poll_frequency.unwrap_or(DEFAULT_POLL_FREQUENCY),
            },
            read_from_start,
        };
        cfg.validate(bounds)?;
        Ok(cfg)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plain_fs(
        file_path: impl Into<PathBuf>,
        host: impl Into<String>,
        port: Option<u16>,
        username: impl Into<String>,
        password: impl Into<String>,
        poll_frequency: Option<Duration>,
        read_from_start: bool,
        bounds: PollFrequencyBounds,
    ) -> Result<Self> {
        let cfg = Self::PlainFs {
            file_path: file_path.into(),
            endpoint: RemoteEndpoint {
                host: host.into(),
                port: port.unwrap_or(DEFAULT_PLAIN_FS_PORT),
                username: username.into(),
                password: password.into(),
                poll_frequency: poll_frequency.unwrap_or(DEFAULT_POLL_FREQUENCY),
            },
            read_from_start,
        };
        cfg.validate(bounds)?;
        Ok(cfg)
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            LogSourceConfig::Local { .. } => SourceKind::Local,
            LogSourceConfig::SecureFs { .. } => SourceKind::SecureFs,
            LogSourceConfig::PlainFs { .. } => SourceKind::PlainFs,
        }
    }

    pub fn file_path(&self) -> &Path {
        match self {
            LogSourceConfig::Local { file_path, .. }
            | LogSourceConfig::SecureFs { file_path, .. }
            | LogSourceConfig::PlainFs { file_path, .. } => file_path,
        }
    }

    pub fn read_from_start(&self) -> bool {
        match self {
            LogSourceConfig::Local {
                read_from_start, ..
            }
            | LogSourceConfig::SecureFs {
                read_from_start, ..
            }
            | LogSourceConfig::PlainFs {
                read_from_start, ..
            } => *read_from_start,
        }
    }

    pub fn endpoint(&self) -> Option<&RemoteEndpoint> {
        match self {
            LogSourceConfig::Local { .. } => None,
            LogSourceConfig::SecureFs { endpoint, .. }
            | LogSourceConfig::PlainFs { endpoint, .. } => Some(endpoint),
        }
    }

    fn validate(&self, bounds: PollFrequencyBounds) -> Result<()> {
        if self.file_path().as_os_str().is_empty() {
            return Err(GarrisonError::InvalidConfig(
                "file_path is required".to_string(),
            ));
        }

        if let Some(endpoint) = self.endpoint() {
            if endpoint.host.trim().is_empty() {
                return Err(GarrisonError::InvalidConfig("host is required".to_string()));
            }
            if endpoint.username.trim().is_empty() {
                return Err(GarrisonError::InvalidConfig(
                    "username is required".to_string(),
                ));
            }
            if endpoint.password.is_empty() {
                return Err(GarrisonError::InvalidConfig(
                    "password is required".to_string(),
                ));
            }
            if endpoint.poll_frequency < bounds.min || endpoint.poll_frequency > bounds.max {
                return Err(GarrisonError::InvalidConfig(format!(
                    "poll_frequency {:?} outside allowed range {:?}..={:?}",
                    endpoint.poll_frequency, bounds.min, bounds.max
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_requires_nonempty_path() {
        let err = LogSourceConfig::local("", false).unwrap_err();
        assert!(matches!(err, GarrisonError::InvalidConfig(_)));
    }

    #[test]
    fn secure_fs_defaults_port_22() {
        let cfg = LogSourceConfig::secure_fs(
            "/var/log/squad.log",
            "10.0.0.5",
            None,
            "admin",
            "hunter2",
            None,
            true,
            PollFrequencyBounds::default(),
        )
        .unwrap();
        assert_eq!(cfg.endpoint().unwrap().port, 22);
    }

    #[test]
    fn plain_fs_defaults_port_21() {
        let cfg = LogSourceConfig::plain_fs(
            "/var/log/squad.log",
            "10.0.0.5",
            None,
            "admin",
            "hunter2",
            None,
            false,
            PollFrequencyBounds::default(),
        )
        .unwrap();
        assert_eq!(cfg.endpoint().unwrap().port, 21);
    }

    #[test]
    fn rejects_poll_frequency_outside_bounds() {
        let err = LogSourceConfig::secure_fs(
            "/var/log/squad.log",
            "10.0.0.5",
            None,
            "admin",
            "hunter2",
            Some(Duration::from_secs(600)),
            false,
            PollFrequencyBounds::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GarrisonError::InvalidConfig(_)));
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = LogSourceConfig::secure_fs(
            "/var/log/squad.log",
            "10.0.0.5",
            None,
            "",
            "",
            None,
            false,
            PollFrequencyBounds::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GarrisonError::InvalidConfig(_)));
    }
}
