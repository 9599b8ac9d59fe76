use std::fmt;

/** An error tagged with the step that produced it. */
#[derive(Debug)]
pub struct AppError {
    pub step: String,
    pub msg: String,
    pub source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            msg: msg.into(),
            source: None,
        }
    }

    pub fn wrap(
        step: impl Into<String>,
        msg: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            step: step.into(),
            msg: msg.into(),
            source: Some(source.into()),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) if self.msg.is_empty() => {
                write!(f, "{}: {:#}", self.step, source)
            }
            Some(source) => write!(f, "{}: {}", self.msg, source),
            None => write!(f, "{}", self.msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

/// Returned by an operation whose governing enablement is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation not enabled")]
pub struct NotEnabled;

pub fn is_not_enabled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<NotEnabled>().is_some()
}

/// Step name attached by the phase that failed, if any.
pub fn step_of(err: &anyhow::Error) -> Option<&str> {
    err.chain()
        .find_map(|e| e.downcast_ref::<AppError>())
        .map(|e| e.step.as_str())
}
