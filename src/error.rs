//! Error taxonomy shared across the store, compiler and extractor.

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by store operations.
///
/// All failures propagate synchronously to the caller; nothing retries
/// automatically.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A low-level database failure, wrapping the driver error.
    #[error("backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    /// A query expression failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// An identifier failed to resolve after exact, pattern and row-id
    /// lookups.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of object was looked up ("graph", "layer", ...).
        kind: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },
    /// The caller is not entitled to the requested operation.
    ///
    /// Reserved for wrapping layers that enforce access control; the store
    /// itself never constructs it.
    #[error("permission denied: {0}")]
    Permission(String),
    /// A textual identifier did not match its expected grammar.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Structural validation of a graph failed fatally.
    #[error("invalid graph {id}: {}", messages.join("; "))]
    InvalidGraph {
        /// The graph that failed validation.
        id: String,
        /// Every validation problem found.
        messages: Vec<String>,
    },
    /// A well-formed request that the store cannot satisfy.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// A query expression was rejected by the compiler.
///
/// Carries the original expression text plus every problem found during the
/// walk, never just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CompileError {
    /// The expression as the caller supplied it.
    pub expression: String,
    /// All accumulated problems, in the order encountered.
    pub errors: Vec<String>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot compile \"{}\": {}",
            self.expression,
            self.errors.join("; ")
        )
    }
}

impl StoreError {
    /// Builds a [`StoreError::NotFound`] for the given kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
