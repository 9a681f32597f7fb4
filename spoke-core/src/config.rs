//! Environment-driven runtime configuration.
//!
//! Resolution order: a `.env` file is loaded first (never overwriting
//! variables already set in the process environment), then `SPOKE_*`
//! variables are read. Every tunable has a default; only the credentials
//! and endpoints are required.

use std::time::Duration;

/// Error type for configuration loading. Maps to process exit code 1.
#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is absent.
    Missing(&'static str),
    /// A variable is present but unusable.
    Invalid { key: &'static str, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required configuration: {key}"),
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid configuration for {key}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Credentials for the platform's OAuth2 token endpoint.
#[derive(Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    /// Consecutive token failures tolerated before the process gives up
    /// with exit code 2.
    pub max_retries: u32,
}

impl AuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            max_retries: 5,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("token_url", &self.token_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// What to do when both worker pools are saturated and the inbound queue
/// is at capacity. Whether the platform honors `Overloaded` as a
/// backpressure signal is deployment-specific, hence the knob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Respond `Overloaded` immediately (default).
    #[default]
    Reject,
    /// Queue without a depth bound and let the pools pace the work.
    Wait,
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub processor_concurrency: usize,
    pub criterion_concurrency: usize,
    /// Work items allowed to wait for a pool slot before new arrivals are
    /// rejected (under [`OverflowPolicy::Reject`]).
    pub inbound_queue_depth: usize,
    pub processor_timeout: Duration,
    pub criterion_timeout: Duration,
    /// How long a cancelled handler may keep running before it is logged
    /// as stuck.
    pub grace_timeout: Duration,
    pub overflow_policy: OverflowPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            processor_concurrency: 32,
            criterion_concurrency: 128,
            inbound_queue_depth: 256,
            processor_timeout: Duration::from_secs(30),
            criterion_timeout: Duration::from_secs(5),
            grace_timeout: Duration::from_secs(10),
            overflow_policy: OverflowPolicy::Reject,
        }
    }
}

/// Stream session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub keepalive_interval: Duration,
    pub handshake_timeout: Duration,
    /// Refresh the token once its expiry is within this margin.
    pub token_renewal_margin: Duration,
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
    pub outbox_capacity: usize,
    /// How long draining waits for inflight work on graceful shutdown.
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            token_renewal_margin: Duration::from_secs(60),
            reconnect_backoff_min: Duration::from_millis(200),
            reconnect_backoff_max: Duration::from_secs(30),
            outbox_capacity: 1024,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Location of the platform's entity REST surface.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub base_url: String,
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `host:port` (or full URL) of the platform's gRPC service.
    pub grpc_endpoint: String,
    pub auth: AuthConfig,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
    /// Absent when this client only computes and never calls back into
    /// the entity store.
    pub data: Option<DataConfig>,
}

impl RuntimeConfig {
    /// Build a configuration with all tunables at their defaults.
    pub fn new(grpc_endpoint: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            grpc_endpoint: grpc_endpoint.into(),
            auth,
            dispatch: DispatchConfig::default(),
            session: SessionConfig::default(),
            data: None,
        }
    }

    /// Load from the process environment (plus `.env`, which never
    /// overwrites real environment variables).
    ///
    /// Required: `SPOKE_CLIENT_ID`, `SPOKE_CLIENT_SECRET`,
    /// `SPOKE_AUTH_TOKEN_URL`, `SPOKE_GRPC_ENDPOINT`. Optional:
    /// `SPOKE_API_BASE_URL` plus the tuning variables listed in the
    /// module docs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let auth = AuthConfig {
            client_id: required("SPOKE_CLIENT_ID")?,
            client_secret: required("SPOKE_CLIENT_SECRET")?,
            token_url: required("SPOKE_AUTH_TOKEN_URL")?,
            max_retries: parsed("SPOKE_AUTH_MAX_RETRIES", 5u32)?,
        };

        let dispatch = DispatchConfig {
            processor_concurrency: parsed("SPOKE_PROCESSOR_CONCURRENCY", 32usize)?,
            criterion_concurrency: parsed("SPOKE_CRITERION_CONCURRENCY", 128usize)?,
            inbound_queue_depth: parsed("SPOKE_INBOUND_QUEUE_DEPTH", 256usize)?,
            processor_timeout: millis("SPOKE_PROCESSOR_TIMEOUT_MILLIS", 30_000)?,
            criterion_timeout: millis("SPOKE_CRITERION_TIMEOUT_MILLIS", 5_000)?,
            grace_timeout: millis("SPOKE_GRACE_TIMEOUT_MILLIS", 10_000)?,
            overflow_policy: overflow_policy("SPOKE_OVERFLOW_POLICY")?,
        };

        let session = SessionConfig {
            keepalive_interval: millis("SPOKE_KEEPALIVE_INTERVAL_MILLIS", 30_000)?,
            handshake_timeout: millis("SPOKE_HANDSHAKE_TIMEOUT_MILLIS", 15_000)?,
            token_renewal_margin: millis("SPOKE_TOKEN_RENEWAL_MARGIN_MILLIS", 60_000)?,
            reconnect_backoff_min: millis("SPOKE_RECONNECT_BACKOFF_MIN_MILLIS", 200)?,
            reconnect_backoff_max: millis("SPOKE_RECONNECT_BACKOFF_MAX_MILLIS", 30_000)?,
            outbox_capacity: parsed("SPOKE_OUTBOX_CAPACITY", 1024usize)?,
            drain_timeout: millis("SPOKE_DRAIN_TIMEOUT_MILLIS", 30_000)?,
        };

        Ok(Self {
            grpc_endpoint: required("SPOKE_GRPC_ENDPOINT")?,
            auth,
            dispatch,
            session,
            data: std::env::var("SPOKE_API_BASE_URL")
                .ok()
                .filter(|url| !url.is_empty())
                .map(|base_url| DataConfig { base_url }),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn millis(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parsed(key, default).map(Duration::from_millis)
}

fn overflow_policy(key: &'static str) -> Result<OverflowPolicy, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => match value.to_ascii_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "wait" => Ok(OverflowPolicy::Wait),
            other => Err(ConfigError::Invalid {
                key,
                message: format!("expected 'reject' or 'wait', got '{other}'"),
            }),
        },
        _ => Ok(OverflowPolicy::default()),
    }
}
