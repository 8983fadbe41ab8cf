use bson::{Document, doc};
use thiserror::Error;

/// Errors raised while parsing or evaluating expressions and pipelines.
///
/// Most variants carry an optional `path`: the full path of the expression node that
/// raised the error. The first node to stamp a path wins; enclosing nodes leave it alone.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String, path: Option<String> },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String, path: Option<String> },

    #[error("Too large: {reason}")]
    TooLarge { code: String, reason: String, path: Option<String> },

    #[error("Access denied: {reason}")]
    AccessDenied { reason: String, path: Option<String> },

    #[error("Not found: {reason}")]
    NotFound { reason: String, path: Option<String> },

    #[error("Cursor error: {reason}")]
    Cursor { reason: String, path: Option<String> },

    #[error("Script error: {reason}")]
    Script { reason: String, path: Option<String> },

    #[error("Unsupported: {reason}")]
    Unsupported { reason: String, path: Option<String> },

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, ExprError>;

impl ExprError {
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery { reason: reason.into(), path: None }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into(), path: None }
    }

    pub fn too_large(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TooLarge { code: code.into(), reason: reason.into(), path: None }
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied { reason: reason.into(), path: None }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound { reason: reason.into(), path: None }
    }

    pub fn cursor(reason: impl Into<String>) -> Self {
        Self::Cursor { reason: reason.into(), path: None }
    }

    pub fn script(reason: impl Into<String>) -> Self {
        Self::Script { reason: reason.into(), path: None }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported { reason: reason.into(), path: None }
    }

    /// Machine readable error code, e.g. `invalidArgument.query`.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidQuery { .. } => "invalidArgument.query",
            Self::InvalidArgument { .. } => "invalidArgument",
            Self::TooLarge { code, .. } => code,
            Self::AccessDenied { .. } => "accessDenied",
            Self::NotFound { .. } => "notFound",
            Self::Cursor { .. } => "cursor",
            Self::Script { .. } => "script",
            Self::Unsupported { .. } => "unsupported",
            Self::Json(_) => "invalidArgument.json",
            Self::Toml(_) => "invalidArgument.config",
            Self::Io(_) => "io",
        }
    }

    /// Human readable reason without the variant prefix.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::InvalidQuery { reason, .. }
            | Self::InvalidArgument { reason, .. }
            | Self::TooLarge { reason, .. }
            | Self::AccessDenied { reason, .. }
            | Self::NotFound { reason, .. }
            | Self::Cursor { reason, .. }
            | Self::Script { reason, .. }
            | Self::Unsupported { reason, .. } => reason.clone(),
            Self::Json(e) => e.to_string(),
            Self::Toml(e) => e.to_string(),
            Self::Io(e) => e.clone(),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::InvalidQuery { path, .. }
            | Self::InvalidArgument { path, .. }
            | Self::TooLarge { path, .. }
            | Self::AccessDenied { path, .. }
            | Self::NotFound { path, .. }
            | Self::Cursor { path, .. }
            | Self::Script { path, .. }
            | Self::Unsupported { path, .. } => path.as_deref(),
            Self::Json(_) | Self::Toml(_) | Self::Io(_) => None,
        }
    }

    fn path_slot(&mut self) -> Option<&mut Option<String>> {
        match self {
            Self::InvalidQuery { path, .. }
            | Self::InvalidArgument { path, .. }
            | Self::TooLarge { path, .. }
            | Self::AccessDenied { path, .. }
            | Self::NotFound { path, .. }
            | Self::Cursor { path, .. }
            | Self::Script { path, .. }
            | Self::Unsupported { path, .. } => Some(path),
            Self::Json(_) | Self::Toml(_) | Self::Io(_) => None,
        }
    }

    /// Stamps `path` onto the error unless an inner node already did.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if path.is_empty() {
            return self;
        }
        if let Some(slot) = self.path_slot() {
            if slot.is_none() {
                *slot = Some(path);
            }
        }
        self
    }

    /// Renders the error the way it is surfaced to API callers.
    #[must_use]
    pub fn to_fault(&self) -> Document {
        let mut fault = doc! {
            "object": "fault",
            "code": self.code(),
            "reason": self.reason(),
        };
        if let Some(path) = self.path() {
            fault.insert("path", path);
        }
        fault
    }
}

impl From<std::io::Error> for ExprError {
    fn from(e: std::io::Error) -> Self {
        ExprError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_path_wins() {
        let err = ExprError::invalid_query("boom").with_path("0.$match").with_path("0");
        assert_eq!(err.path(), Some("0.$match"));
        assert_eq!(err.code(), "invalidArgument.query");
    }

    #[test]
    fn empty_path_is_not_stamped() {
        let err = ExprError::invalid_argument("bad").with_path("").with_path("a.b");
        assert_eq!(err.path(), Some("a.b"));
    }

    #[test]
    fn fault_shape() {
        let fault = ExprError::too_large("cortex.tooLarge.memo", "too big").with_path("x").to_fault();
        assert_eq!(fault.get_str("object").unwrap(), "fault");
        assert_eq!(fault.get_str("code").unwrap(), "cortex.tooLarge.memo");
        assert_eq!(fault.get_str("reason").unwrap(), "too big");
        assert_eq!(fault.get_str("path").unwrap(), "x");
    }
}
