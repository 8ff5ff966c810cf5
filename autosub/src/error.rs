//! Error types for the auto-repair engine.
//!
//! [`AutosubError`] carries an [`ErrorKind`] used to decide how far a failure propagates,
//! a static description, optional dynamic detail, the callsite and a captured backtrace.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result alias used throughout the crate.
pub type AutosubResult<T> = Result<T, AutosubError>;

/// Classification of failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The control plane could not be reached. The whole cycle is skipped.
    ConnectionFailed,
    /// The control plane rejected a command.
    ScriptExecutionFailed,
    /// An external tool exited with a non-zero status.
    ExternalToolFailed,
    /// An event message did not match the grammar of its family.
    EventParseFailed,
    /// A table repair was deferred because another subscription still replicates it.
    DependencyLocked,
    InvalidConfig,
    InvalidState,
    IoError,
    SerializationError,
    DeserializationError,
    ReportFailed,
}

impl ErrorKind {
    /// Returns `true` for failures that invalidate the whole control plane session.
    pub fn is_connection(&self) -> bool {
        matches!(self, ErrorKind::ConnectionFailed)
    }
}

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the engine.
#[derive(Debug, Clone)]
pub struct AutosubError {
    payload: Box<ErrorPayload>,
}

impl AutosubError {
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    pub fn description(&self) -> &str {
        &self.payload.description
    }

    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Attaches the originating error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Short single-line rendering without location or backtrace, used in log lines.
    pub fn summary(&self) -> String {
        match self.detail() {
            Some(detail) => format!("{}: {}", self.description(), detail),
            None => self.description().to_string(),
        }
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        AutosubError {
            payload: Box::new(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for AutosubError {
    fn eq(&self, other: &AutosubError) -> bool {
        self.payload.kind == other.payload.kind
            && self.payload.description == other.payload.description
    }
}

impl fmt::Display for AutosubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            payload.kind,
            payload.description,
            payload.location.file(),
            payload.location.line(),
            payload.location.column()
        )?;

        if let Some(detail) = payload.detail.as_deref() {
            write!(f, "\n  Detail:")?;
            for line in detail.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        let backtrace = payload.backtrace.to_string();
        if !backtrace.trim().is_empty() {
            write!(f, "\n  Backtrace:")?;
            for line in backtrace.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for AutosubError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for AutosubError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> AutosubError {
        AutosubError::from_components(kind, Cow::Borrowed(description), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for AutosubError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> AutosubError {
        AutosubError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(detail.into()),
            None,
        )
    }
}

impl From<std::io::Error> for AutosubError {
    #[track_caller]
    fn from(err: std::io::Error) -> AutosubError {
        let detail = err.to_string();
        AutosubError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for AutosubError {
    #[track_caller]
    fn from(err: serde_json::Error) -> AutosubError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        AutosubError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Transport failures towards the control plane bridge invalidate the session.
impl From<reqwest::Error> for AutosubError {
    #[track_caller]
    fn from(err: reqwest::Error) -> AutosubError {
        let (kind, description) = if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "Control plane response could not be decoded",
            )
        } else {
            (ErrorKind::ConnectionFailed, "Control plane request failed")
        };

        let detail = err.to_string();
        AutosubError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{autosub_error, bail};

    #[test]
    fn display_includes_kind_location_and_detail() {
        let err = autosub_error!(
            ErrorKind::ScriptExecutionFailed,
            "Control plane rejected the command",
            "1234: subscription is locked"
        );
        let rendered = err.to_string();

        assert!(rendered.starts_with("[ScriptExecutionFailed] Control plane rejected the command @ "));
        assert!(rendered.contains("error.rs"));
        assert!(rendered.contains("1234: subscription is locked"));
        assert_eq!(
            err.summary(),
            "Control plane rejected the command: 1234: subscription is locked"
        );
    }

    #[test]
    fn bail_returns_error_with_kind() {
        fn fails() -> AutosubResult<()> {
            bail!(ErrorKind::InvalidState, "Nothing to repair");
        }

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!err.kind().is_connection());
        assert_eq!(err.detail(), None);
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err: AutosubError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(error::Error::source(&err).is_some());
    }
}
