use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Two engines share a name, compared case-insensitively.
    #[error("duplicate engine name `{0}`")]
    DuplicateEngine(String),
    /// Two subscriptions share a name, compared case-insensitively.
    #[error("duplicate subscription name `{0}`")]
    DuplicateSubscription(String),
    /// A subscription references an engine missing from `engines`.
    #[error("subscription `{subscription}` references unknown engine `{engine}`")]
    UnknownEngine {
        subscription: String,
        engine: String,
    },
    /// A subscription uses an engine in a role the engine does not support.
    #[error("subscription `{subscription}` cannot use engine `{engine}` as {expected}")]
    RoleMismatch {
        subscription: String,
        engine: String,
        expected: &'static str,
    },
    #[error("`globals.poll_period_ms` cannot be zero")]
    PollPeriodZero,
    #[error("engine or subscription name cannot be blank")]
    BlankName,
}
