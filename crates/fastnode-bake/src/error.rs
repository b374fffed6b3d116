use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::record::ModuleId;

/// Core error type for the bake runtime.
///
/// Errors are `Clone` so a failed module can cache its error and hand the
/// same value to every later importer.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(
        "Failed to load bundled module '{id}'. This is not a dynamic import, and therefore is a bug in the bundler."
    )]
    InternalGraph { id: ModuleId },

    #[error(
        "Failed to resolve dynamic import '{id}'. All imports must be statically known at build time so that the bundler can trace everything."
    )]
    DynamicSpecifier { id: ModuleId },

    #[error("{message}")]
    Thrown { message: Arc<str> },

    #[error("TypeError: {message}")]
    TypeError { message: Arc<str> },

    #[error("Server entrypoint '{main}' does not export a `render` function")]
    MissingRender { main: ModuleId },

    #[error("Server entrypoint '{main}' exports `render`, but it is {found}, not a function")]
    RenderNotCallable { main: ModuleId, found: &'static str },

    #[error("`render` must return a Response, got {found}")]
    NotAResponse { found: &'static str },

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("Invalid graph snapshot: {0}")]
    Snapshot(Arc<str>),
}

impl Error {
    /// An error raised by module code.
    #[must_use]
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown {
            message: message.into().into(),
        }
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError {
            message: message.into().into(),
        }
    }

    #[must_use]
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot(message.into().into())
    }

    /// Whether this error points at the bundler rather than user code.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InternalGraph { .. })
    }

    /// Whether two errors are the same cached value.
    ///
    /// Errors carrying a message compare by allocation, so a rethrown cached
    /// failure is distinguishable from a fresh error with the same text.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Thrown { message: a }, Self::Thrown { message: b })
            | (Self::TypeError { message: a }, Self::TypeError { message: b })
            | (Self::Snapshot(a), Self::Snapshot(b)) => Arc::ptr_eq(a, b),
            (Self::InternalGraph { id: a }, Self::InternalGraph { id: b })
            | (Self::DynamicSpecifier { id: a }, Self::DynamicSpecifier { id: b }) => a == b,
            _ => false,
        }
    }
}
