use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Backtrace captured when the error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fatal errors of the daemon.
#[derive(Debug)]
pub enum DaemonError {
    /// Configuration could not be loaded or is invalid, or tracing could not be set up.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error, such as a failure to build the runtime.
    Io(std::io::Error, CapturedBacktrace),
}

impl DaemonError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            DaemonError::Config(_, _) => "configuration error",
            DaemonError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> &Backtrace {
        match self {
            DaemonError::Config(_, cb) => &cb.0,
            DaemonError::Io(_, cb) => &cb.0,
        }
    }

    /// Creates a configuration error from any error.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        DaemonError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("autosubd failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace() {
            out.push_str("backtrace:\n");
            out.push_str(&self.backtrace().to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Config(source, _) => write!(f, "configuration error: {source}"),
            DaemonError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for DaemonError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DaemonError::Config(source, _) => Some(source.as_ref()),
            DaemonError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        DaemonError::Io(err, CapturedBacktrace::capture())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_category_and_causes() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "configuration missing");
        let report = DaemonError::config(io).render_report();

        assert!(report.starts_with("autosubd failed\n"));
        assert!(report.contains("category: configuration error\n"));
        assert!(report.contains("error: configuration error: configuration missing\n"));
        assert!(report.contains("cause 1: configuration missing\n"));
    }
}
