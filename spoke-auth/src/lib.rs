//! # spoke-auth — bearer credentials for the Spoke runtime
//!
//! The platform's gRPC stream and its REST surface both authenticate with
//! OAuth2 bearer tokens obtained through the `client_credentials` grant.
//! [`TokenProvider`] owns that exchange: it caches the current token,
//! exposes its expiry so the session can schedule re-authentication, and
//! forces a fresh fetch on demand.
//!
//! Failure to obtain a token is always retryable at this layer; the
//! supervisor owns the retry budget and converts exhaustion into a
//! process-fatal error.

mod error;
mod provider;

pub use error::AuthError;
pub use provider::{AccessToken, TokenProvider};
