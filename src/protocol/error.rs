use thiserror::Error;

/// A channel line that does not match the hotplug wire grammar.
///
/// Malformed events are dropped by the handler and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEventError {
    #[error("empty event line")]
    Empty,

    #[error("expected 4 tokens, found {0}")]
    TokenCount(usize),

    #[error("unexpected token at position {position}: {token:?}")]
    UnexpectedToken { position: usize, token: String },

    #[error("missing value for {0}")]
    MissingValue(&'static str),

    #[error("unrecognized action: {0:?}")]
    UnknownAction(String),

    #[error("invalid devpath {devpath:?}: {reason}")]
    InvalidDevpath { devpath: String, reason: &'static str },

    #[error("field {field} contains whitespace")]
    Whitespace { field: &'static str },

    #[error("encoded event is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}
