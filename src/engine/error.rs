use ulid::Ulid;

use super::validate::ValidationError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    UnknownResource(String),
    /// Every problem found with the candidate, in check order.
    Invalid(Vec<ValidationError>),
    LimitExceeded(&'static str),
    /// The store could not be reached or refused the operation; retryable.
    Store(String),
}

impl EngineError {
    /// "Try again later" as opposed to "fix your input".
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }

    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            EngineError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::UnknownResource(name) => write!(f, "unknown resource: {name}"),
            EngineError::Invalid(errors) => {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", messages.join("; "))
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
