use crate::error::{Level, PyzigErrorExt};
use crate::location::{Location, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoweringErrorKind {
    /// Nesting beyond the configured depth limit.
    ResourceExhausted,
    /// Writing the output text failed.
    Format,
}

/// The only fatal lowering failure. Everything else becomes a deferred
/// diagnostic in the generated text.
#[derive(Debug, Clone)]
pub struct LoweringError {
    kind: LoweringErrorKind,
    message: String,
    issuer: String,
    location: Option<Location>,
}

impl LoweringError {
    pub fn resource(message: String, location: Option<Location>) -> Self {
        LoweringError {
            kind: LoweringErrorKind::ResourceExhausted,
            message,
            issuer: "pyzig.lower.depth".to_string(),
            location,
        }
    }

    pub fn kind(&self) -> LoweringErrorKind {
        self.kind
    }
}

impl From<std::fmt::Error> for LoweringError {
    fn from(_: std::fmt::Error) -> Self {
        LoweringError {
            kind: LoweringErrorKind::Format,
            message: "failed to write generated text".to_string(),
            issuer: "pyzig.lower.writer".to_string(),
            location: None,
        }
    }
}

impl std::fmt::Display for LoweringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{} (at {})", self.message, loc)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for LoweringError {}

impl PyzigErrorExt for LoweringError {
    fn level(&self) -> Level {
        Level::Critical
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
