//! Terminal errors and their process exit codes.

use crate::config::ConfigError;

/// Conditions the runtime cannot recover from. The hosting process maps
/// them to exit codes via [`FatalError::exit_code`].
#[derive(Debug)]
pub enum FatalError {
    /// Configuration could not be loaded or validated. Exit code 1.
    Config(ConfigError),
    /// Token acquisition kept failing past the retry budget. Exit code 2.
    AuthExhausted { attempts: u32, message: String },
    /// The platform disagreed with us during handshake. Exit code 3.
    HandshakeMismatch(String),
}

impl FatalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Config(_) => 1,
            FatalError::AuthExhausted { .. } => 2,
            FatalError::HandshakeMismatch(_) => 3,
        }
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalError::Config(err) => write!(f, "configuration error: {err}"),
            FatalError::AuthExhausted { attempts, message } => {
                write!(f, "authentication failed after {attempts} attempts: {message}")
            }
            FatalError::HandshakeMismatch(msg) => write!(f, "handshake mismatch: {msg}"),
        }
    }
}

impl std::error::Error for FatalError {}

impl From<ConfigError> for FatalError {
    fn from(err: ConfigError) -> Self {
        FatalError::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(
            FatalError::Config(ConfigError::Missing("SPOKE_CLIENT_ID")).exit_code(),
            1
        );
        assert_eq!(
            FatalError::AuthExhausted {
                attempts: 5,
                message: "401".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(FatalError::HandshakeMismatch("bad greet".into()).exit_code(), 3);
    }
}
