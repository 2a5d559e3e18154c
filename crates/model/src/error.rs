use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The model provider cannot be reached.
    Unavailable,
    /// The credentials were rejected by the model provider.
    Unauthorized,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The content is moderated.
    Moderated,
    /// The provider answered, but the payload could not be understood.
    Malformed,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Returns whether errors of this kind usually go away by themselves,
    /// so that the request can be retried as is.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Unavailable | ErrorKind::RateLimitExceeded)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unavailable => write!(f, "Unavailable"),
            ErrorKind::Unauthorized => write!(f, "Unauthorized"),
            ErrorKind::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            ErrorKind::Moderated => write!(f, "Moderated"),
            ErrorKind::Malformed => write!(f, "Malformed response"),
            ErrorKind::Other => write!(f, "Other"),
        }
    }
}
