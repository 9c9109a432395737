use thiserror::Error;

/// Top-level error type shared by the model engine, the entity core and every
/// downstream crate (storage, server). Variants map 1:1 onto the error kinds
/// an HTTP surface is expected to translate into status codes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("model invalid: {0}")]
    ModelInvalid(String),

    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl RegistryError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn model_invalid(msg: impl Into<String>) -> Self {
        Self::ModelInvalid(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Name used for logging / metrics labels; stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ModelInvalid(_) => "model_invalid",
            Self::Upstream(_) => "upstream",
            Self::Internal(_) => "internal",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
