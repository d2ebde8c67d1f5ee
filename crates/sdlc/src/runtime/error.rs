use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for runtime operations that can fail.
pub type RtResult<T> = Result<T, RuntimeError>;

/// Error kinds raised by generated parsers and the value runtime.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `ParseError` -> "ParseError").
///
/// All kinds share a single root so that a fiber boundary can treat any of them
/// uniformly: an error unwinds the fiber and either lands in the resumable's
/// error state or re-raises in the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Input does not conform to the unit grammar. Propagates to the nearest
    /// enclosing `&try`, else the unit's `%error` hook, else the caller.
    ParseError,
    /// A failed `assert` statement.
    AssertionFailure,
    /// A completed regular-expression match state was fed more data.
    MatchStateReuse,
    /// A suspension operation was used outside of a fiber.
    NotSuspendable,

    InvalidArgument,
    OutOfRange,
    /// Read of an unset, defaultless optional field.
    AttributeNotSet,
    /// A unit instance was connected to a second sink.
    UnitAlreadyConnected,
    NotSupported,
    /// Regular-expression compilation or misuse of a capture-group state.
    PatternError,
    FormattingError,
    Unsupported,
    ValueUnavailable,
    InvalidValue,
    /// Host-binding value mismatch.
    TypeMismatch,
}

/// A runtime error: a kind plus a human-readable message and an optional
/// source location rendered as `file:line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a source location, replacing any previous one.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn pattern_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PatternError, message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidValue, message)
    }

    /// True for errors a `&try` scope recovers from via backtracking.
    pub fn is_recoverable(&self) -> bool {
        self.kind == ErrorKind::ParseError
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{kind}: {msg} ({loc})", kind = self.kind, msg = self.message),
            None => write!(f, "{kind}: {msg}", kind = self.kind, msg = self.message),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_location() {
        let err = RuntimeError::parse_error("expecting 5 bytes").with_location("foo.sdl:3");
        assert_eq!(err.to_string(), "ParseError: expecting 5 bytes (foo.sdl:3)");
    }

    #[test]
    fn kind_name_round_trips() {
        let name: &'static str = ErrorKind::AttributeNotSet.into();
        assert_eq!(name, "AttributeNotSet");
        assert_eq!("AttributeNotSet".parse::<ErrorKind>().unwrap(), ErrorKind::AttributeNotSet);
    }

    #[test]
    fn only_parse_errors_are_recoverable() {
        assert!(RuntimeError::parse_error("x").is_recoverable());
        assert!(!RuntimeError::out_of_range("x").is_recoverable());
    }
}
