use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use spoke_core::AuthConfig;

use crate::error::AuthError;

/// Safety skew applied when deciding whether a cached token is still worth
/// handing out.
const CACHE_SKEW: Duration = Duration::from_secs(10);

/// Fallback lifetime when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

/// A bearer token and the earliest instant it may expire. Callers must
/// refresh before `expires_at`.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// `true` once the token's remaining lifetime is inside `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Instant::now() + margin >= self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Standard token endpoint response. Extra members are ignored.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

enum Grant {
    /// OAuth2 `client_credentials` against a token endpoint.
    ClientCredentials {
        client: reqwest::Client,
        config: AuthConfig,
    },
    /// A pre-issued token. Development and test setups.
    Fixed { secret: String, lifetime: Duration },
}

/// Obtains and caches bearer tokens via the OAuth2 `client_credentials`
/// grant.
pub struct TokenProvider {
    grant: Grant,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenProvider {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            grant: Grant::ClientCredentials {
                client: reqwest::Client::new(),
                config,
            },
            cached: Mutex::new(None),
        }
    }

    /// A provider that always hands out `secret`, never touching the
    /// network. Meant for development against platforms with pre-issued
    /// tokens, and for tests.
    pub fn fixed(secret: impl Into<String>) -> Self {
        Self::fixed_with_lifetime(secret, Duration::from_secs(60 * 60 * 24 * 365))
    }

    /// Like [`fixed`](Self::fixed) but with an explicit advertised
    /// lifetime, so re-authentication scheduling can be exercised.
    pub fn fixed_with_lifetime(secret: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            grant: Grant::Fixed {
                secret: secret.into(),
                lifetime,
            },
            cached: Mutex::new(None),
        }
    }

    /// Return the cached token, fetching a fresh one if none exists or the
    /// cached one is about to expire.
    pub async fn token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(CACHE_SKEW) {
                return Ok(token.clone());
            }
        }
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Force a fresh token fetch, replacing the cache. Used for mid-stream
    /// re-authentication.
    pub async fn refresh(&self) -> Result<AccessToken, AuthError> {
        let token = self.fetch().await?;
        let mut cached = self.cached.lock().await;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        let (client, config) = match &self.grant {
            Grant::ClientCredentials { client, config } => (client, config),
            Grant::Fixed { secret, lifetime } => {
                return Ok(AccessToken {
                    secret: secret.clone(),
                    expires_at: Instant::now() + *lifetime,
                });
            }
        };
        let response = client
            .post(&config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: snippet(&message),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if body.access_token.is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }

        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        tracing::debug!(
            lifetime_secs = lifetime.as_secs(),
            "Obtained access token"
        );
        Ok(AccessToken {
            secret: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("TokenProvider");
        match &self.grant {
            Grant::ClientCredentials { config, .. } => {
                dbg.field("grant", &"client_credentials")
                    .field("token_url", &config.token_url)
            }
            Grant::Fixed { .. } => dbg.field("grant", &"fixed"),
        }
        .finish_non_exhaustive()
    }
}

/// First line of an error body, bounded, for log-safe messages.
fn snippet(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(200).collect();
    if line.chars().count() > 200 {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_parses_standard_fields() {
        let body: TokenResponse = serde_json::from_str(
            r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600,"scope":"api"}"#,
        )
        .unwrap();
        assert_eq!(body.access_token, "abc");
        assert_eq!(body.expires_in, Some(3600));
    }

    #[test]
    fn token_response_tolerates_missing_expiry() {
        let body: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(body.expires_in, None);
    }

    #[tokio::test(start_paused = true)]
    async fn expires_within_accounts_for_margin() {
        let token = AccessToken {
            secret: "abc".into(),
            expires_at: Instant::now() + Duration::from_secs(90),
        };
        assert!(!token.expires_within(Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(token.expires_within(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn fixed_provider_never_touches_the_network() {
        let provider = TokenProvider::fixed("pre-issued");
        let token = provider.token().await.unwrap();
        assert_eq!(token.secret(), "pre-issued");
        assert!(!token.expires_within(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn fixed_lifetime_is_honored() {
        let provider = TokenProvider::fixed_with_lifetime("t", Duration::from_secs(30));
        let token = provider.refresh().await.unwrap();
        assert!(token.expires_within(Duration::from_secs(60)));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let token = AccessToken {
            secret: "super-secret".into(),
            expires_at: Instant::now(),
        };
        assert!(!format!("{token:?}").contains("super-secret"));
    }

    #[test]
    fn snippet_bounds_long_bodies() {
        let long = "x".repeat(500);
        assert!(snippet(&long).chars().count() <= 201);
        assert_eq!(snippet("short\nsecond line"), "short");
    }
}
