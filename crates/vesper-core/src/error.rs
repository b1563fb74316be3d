//! Error taxonomy (spec §7).
//!
//! [`ErrorKind`] is a small `Copy` enum — the kind alone, no message —
//! mirroring the teacher's `LuaError`/`LuaFullError` split so a `Result`
//! carried through the hot interpreter path stays cheap to move around.
//! The message and source location live in [`Error`], built only when an
//! error actually needs to surface to a caller.

use std::fmt;

/// Discriminant for an error without its message (kept `Copy`, one byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed token stream.
    ParserError,
    /// Unexpected character, unterminated string, invalid UTF-8.
    SyntaxError,
    /// Undeclared variable in module mode, invalid export target.
    SemanticError,
    /// Operator applied to incompatible types, calling a non-callable.
    TypeError,
    /// Name-binding failure.
    ReferenceError,
    /// Domain error (e.g. integer mod zero).
    ArithmeticError,
    /// General runtime failure, including `error(...)` from script code.
    RuntimeError,
    /// Value stack would exceed its configured bound.
    StackOverflow,
    /// Allocator-tracked bytes would exceed the configured memory ceiling.
    OutOfMemory,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ParserError => "parser error",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::SemanticError => "semantic error",
            ErrorKind::TypeError => "type error",
            ErrorKind::ReferenceError => "reference error",
            ErrorKind::ArithmeticError => "arithmetic error",
            ErrorKind::RuntimeError => "runtime error",
            ErrorKind::StackOverflow => "stack overflow",
            ErrorKind::OutOfMemory => "out of memory",
        };
        write!(f, "{s}")
    }
}

/// A source location a script-level error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Rich error type combining [`ErrorKind`] with a message, optional source
/// location, and a synthesized stack trace.
///
/// Implements `Display` and `std::error::Error`, so it composes with `?`
/// and with a host application's own `anyhow`/`thiserror` usage.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
    /// One entry per frame, innermost first: `"at <fn> at <file:line:col>"`.
    pub trace: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            location: None,
            trace: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn push_frame(&mut self, frame: impl Into<String>) {
        self.trace.push(frame.into());
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::TypeError, message)
    }

    pub fn arithmetic_error(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ArithmeticError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::RuntimeError, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = self.location {
            write!(f, "{loc}: {}", self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        for frame in &self.trace {
            write!(f, "\n\t{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
