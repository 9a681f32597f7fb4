/// Errors from the token exchange. All variants are retryable; the caller
/// decides how often.
#[derive(Debug)]
pub enum AuthError {
    /// The token endpoint could not be reached.
    TokenEndpoint(String),
    /// The token endpoint answered with a non-success status.
    Rejected { status: u16, message: String },
    /// The token response body could not be parsed.
    Malformed(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::TokenEndpoint(msg) => write!(f, "token endpoint unreachable: {msg}"),
            AuthError::Rejected { status, message } => {
                write!(f, "token request rejected ({status}): {message}")
            }
            AuthError::Malformed(msg) => write!(f, "malformed token response: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}
