//! Error types reported by graph and handle operations.

use std::fmt;
use std::panic::Location;

/// A specialized result type for fallible reactive operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classifies every error the engine can produce.
///
/// The set is closed: operations document which kinds they return and no other
/// kind will ever surface from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Inserting the edge would make the dependency graph cyclic.
    DependencyCycle,
    /// A node was asked to observe itself.
    SelfObservation,
    /// The handle's node has been removed from the graph.
    NullPointer,
    /// The value was read before it was ever written.
    ResourceNotInitialized,
    /// The stored value does not have the type the handle expects.
    TypeMismatch,
    /// The operation requires a state the node or batch is not in.
    InvalidState,
    /// The node is enrolled in an active batch and cannot be rebound or
    /// closed right now.
    BatchConflict,
    /// Reserved; not produced by the engine today.
    ThreadSafetyViolation,
    /// An internal invariant was found violated at runtime.
    GraphCorruption,
}

impl ErrorKind {
    /// Stable string form of the kind, e.g. for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DependencyCycle => "dependency cycle",
            ErrorKind::SelfObservation => "self observation",
            ErrorKind::NullPointer => "null pointer",
            ErrorKind::ResourceNotInitialized => "resource not initialized",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::BatchConflict => "batch operation conflict",
            ErrorKind::ThreadSafetyViolation => "thread safety violation",
            ErrorKind::GraphCorruption => "graph corruption",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by a graph or handle operation.
///
/// Carries the [`ErrorKind`], a short human-readable message and the source
/// location of the raise site.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message} (at {location})")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    location: &'static Location<'static>,
}

impl Error {
    #[track_caller]
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Location::caller(),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message without the kind prefix or location suffix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Where the error was raised.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}
