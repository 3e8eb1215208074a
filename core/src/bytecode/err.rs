use crate::error::{Level, PyzigErrorExt};
use crate::location::{Location, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BytecodeErrorKind {
    /// A node outside the compilable subset.
    Unsupported,
    /// A serialized program that does not decode.
    Malformed,
    /// Evaluation failed (division by zero, overflow, bad operand types).
    Runtime,
}

#[derive(Debug, Clone)]
pub struct BytecodeError {
    kind: BytecodeErrorKind,
    message: String,
    issuer: String,
    location: Option<Location>,
}

impl BytecodeError {
    pub fn unsupported(message: String, location: Option<Location>) -> Self {
        BytecodeError {
            kind: BytecodeErrorKind::Unsupported,
            message,
            issuer: "pyzig.bytecode.compiler".to_string(),
            location,
        }
    }

    pub fn malformed(message: String) -> Self {
        BytecodeError {
            kind: BytecodeErrorKind::Malformed,
            message,
            issuer: "pyzig.bytecode.serialize".to_string(),
            location: None,
        }
    }

    pub fn runtime(message: String) -> Self {
        BytecodeError {
            kind: BytecodeErrorKind::Runtime,
            message,
            issuer: "pyzig.bytecode.eval".to_string(),
            location: None,
        }
    }

    pub fn kind(&self) -> BytecodeErrorKind {
        self.kind
    }
}

impl std::fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{} (at {})", self.message, loc)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for BytecodeError {}

impl PyzigErrorExt for BytecodeError {
    fn level(&self) -> Level {
        Level::Error
    }

    fn message(&self) -> String {
        self.message.clone()
    }

    fn issuer(&self) -> String {
        self.issuer.clone()
    }

    fn span(&self) -> Option<Span> {
        None
    }

    fn location(&self) -> Option<Location> {
        self.location.clone()
    }
}
