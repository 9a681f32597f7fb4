//! # Spoke — a client-side workflow execution runtime
//!
//! The orchestration platform drives workflow state machines centrally;
//! a Spoke process is the compute side. It registers **processors**
//! (side-effecting transformations of a workflow entity) and **criteria**
//! (predicates gating workflow transitions), connects to the platform over
//! one bidirectional gRPC stream, and answers "compute this step for this
//! entity" requests until told to stop.
//!
//! # Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use spoke::prelude::*;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Order {
//!     total: f64,
//!     #[serde(default)]
//!     tags: Vec<String>,
//! }
//!
//! impl EntityType for Order {
//!     const MODEL_NAME: &'static str = "Order";
//!     const MODEL_VERSION: u32 = 1;
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     spoke::telemetry::init();
//!     let runtime = CoreRuntime::builder()
//!         .processor::<Order, _, _>("Tag", 1, |_ctx, mut order| async move {
//!             order.fields.tags.push("seen".into());
//!             Ok(order)
//!         })
//!         .criterion::<Order, _, _>("IsLarge", 1, |_ctx, order| async move {
//!             Ok(order.fields.total > 1000.0)
//!         })
//!         .build();
//!
//!     let config = match RuntimeConfig::from_env() {
//!         Ok(config) => config,
//!         Err(e) => {
//!             eprintln!("{e}");
//!             return std::process::ExitCode::from(1);
//!         }
//!     };
//!     spoke::to_exit_code(spoke::run(runtime, config).await)
//! }
//! ```

use std::sync::Arc;

pub use spoke_auth;
pub use spoke_core;
pub use spoke_data;
pub use spoke_grpc;

// Everything from the core at the top level for convenience.
pub use spoke_core::*;

pub use spoke_auth::TokenProvider;
pub use spoke_data::EntityService;
pub use spoke_grpc::{SessionPhase, Supervisor, SupervisorHandle};

/// Re-exports of the most commonly used types.
pub mod prelude {
    pub use spoke_core::prelude::*;
    pub use spoke_core::{Entity, EntityMeta, HandlerError, ModelKey};
    pub use spoke_grpc::{SessionPhase, Supervisor, SupervisorHandle};
}

pub mod telemetry {
    //! Structured logging bootstrap for hosting processes.

    /// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to
    /// `info`. Call once at process start; later calls are no-ops.
    pub fn init() {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

/// Wire everything up and run until shutdown or a fatal error.
///
/// Builds the token provider from `config.auth`, attaches an
/// [`EntityService`] when `config.data` is present (sharing that
/// provider), starts the supervisor, and hooks `SIGINT`/ctrl-c to a
/// graceful drain-and-close.
pub async fn run(runtime: CoreRuntime, config: RuntimeConfig) -> Result<(), FatalError> {
    let auth = Arc::new(TokenProvider::new(config.auth.clone()));
    let runtime = match &config.data {
        Some(data) => runtime.with_entities(Arc::new(EntityService::new(
            data.clone(),
            Arc::clone(&auth),
        ))),
        None => runtime,
    };

    let supervisor = Supervisor::with_auth(runtime, config, auth)?;
    let handle = supervisor.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            handle.shutdown();
        }
    });

    supervisor.run().await
}

/// Load the configuration from the environment and [`run`].
pub async fn run_from_env(runtime: CoreRuntime) -> Result<(), FatalError> {
    let config = RuntimeConfig::from_env()?;
    run(runtime, config).await
}

/// Map a runtime result onto the process exit-code contract:
/// `0` clean shutdown, `1` configuration error, `2` authentication
/// exhausted, `3` handshake protocol disagreement.
pub fn to_exit_code(result: Result<(), FatalError>) -> std::process::ExitCode {
    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Runtime terminated");
            std::process::ExitCode::from(e.exit_code() as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoke_core::ConfigError;

    #[test]
    fn exit_codes_follow_the_contract() {
        // `ExitCode` has no accessor or equality; check the mapping that
        // feeds it instead.
        assert_eq!(
            FatalError::Config(ConfigError::Missing("SPOKE_CLIENT_ID")).exit_code(),
            1
        );
        assert_eq!(
            FatalError::AuthExhausted {
                attempts: 3,
                message: "401".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(FatalError::HandshakeMismatch("v2".into()).exit_code(), 3);
    }
}
