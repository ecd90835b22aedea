//! Errors of the remote configuration boundary

use sam_api_types::{MissingEntry, ProtocolVersion};
use sam_config::ConfigError;

/// Status code the daemon uses for an activation that found errors.
pub const ACTIVATE_ERRORS: i32 = -2;
/// Status code the daemon uses for an activation with warnings only.
pub const ACTIVATE_WARNINGS: i32 = -3;

/// Errors of the remote configuration boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ArchiverError {
    #[error("daemon protocol {version} does not know: {}", .fields.join(", "))]
    ProtocolMismatch {
        version: ProtocolVersion,
        fields: Vec<String>,
    },
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("archiver daemon error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("archiver configuration is invalid: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
    #[error("archiver configuration has warnings: {}", .0.join("; "))]
    ConfigWarnings(Vec<String>),
}

/// Error class, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolMismatch,
    Validation,
    NotFound,
    AlreadyExists,
    Internal,
    InvalidConfig,
    ConfigWarnings,
}

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Transport or daemon trouble; the same request may succeed later.
    Retry,
    /// The request or the configuration needs to be corrected first.
    FixAndResubmit,
    /// The request took effect; show the messages to the user.
    Acknowledge,
}

impl ArchiverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Remote { .. } => ErrorKind::Internal,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::ConfigWarnings(_) => ErrorKind::ConfigWarnings,
        }
    }

    pub fn response(&self) -> Response {
        match self.kind() {
            ErrorKind::Internal => Response::Retry,
            ErrorKind::ConfigWarnings => Response::Acknowledge,
            _ => Response::FixAndResubmit,
        }
    }

    /// Numeric status as reported by the daemon.
    pub fn code(&self) -> i32 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::InvalidConfig(_) => ACTIVATE_ERRORS,
            Self::ConfigWarnings(_) => ACTIVATE_WARNINGS,
            _ => -1,
        }
    }

    /// The individual messages of an activation result.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::InvalidConfig(list) | Self::ConfigWarnings(list) => list.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<ConfigError> for ArchiverError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(what) => Self::NotFound(what),
            ConfigError::AlreadyExists(what) => Self::AlreadyExists(what),
            err @ ConfigError::PoolInUse { .. } => Self::Validation(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ArchiverError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ConfigError>() {
            Ok(err) => return err.into(),
            Err(err) => err,
        };
        match err.downcast::<MissingEntry>() {
            Ok(MissingEntry(what)) => Self::NotFound(what),
            Err(err) => Self::Validation(format!("{:#}", err)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn responses() {
        let err = ArchiverError::Remote {
            code: 5,
            message: "connection reset".into(),
        };
        assert_eq!(err.response(), Response::Retry);
        assert_eq!(err.code(), 5);

        let err = ArchiverError::InvalidConfig(vec!["a".into(), "b".into()]);
        assert_eq!(err.response(), Response::FixAndResubmit);
        assert_eq!(err.code(), -2);
        assert_eq!(err.messages().len(), 2);

        let err = ArchiverError::ConfigWarnings(vec!["c".into()]);
        assert_eq!(err.response(), Response::Acknowledge);
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn config_errors_keep_their_kind() {
        let err: ArchiverError =
            anyhow::Error::from(ConfigError::NotFound("pool 'x'".into())).into();
        assert_eq!(err, ArchiverError::NotFound("pool 'x'".into()));
        assert_eq!(err.to_string(), "pool 'x' not found");

        let err: ArchiverError =
            anyhow::Error::from(MissingEntry("criterion 07 of set 'images'".into())).into();
        assert_eq!(err, ArchiverError::NotFound("criterion 07 of set 'images'".into()));

        let err: ArchiverError = anyhow::format_err!("bad size").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
