//! Session lifecycle ownership: bring-up, reconnection, observables,
//! shutdown.
//!
//! The supervisor is the only component that loops. It runs sessions one
//! at a time, backing off between attempts (exponential, jittered, reset
//! once a session reaches `Running`), and converts the budgeted and
//! protocol-fatal failures into [`FatalError`]s for the hosting process.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use spoke_auth::TokenProvider;
use spoke_core::{ConfigError, CoreRuntime, FatalError, RuntimeConfig};

use crate::backoff::Backoff;
use crate::session::{run_session, SessionContext, SessionObserver, SessionPhase};
use crate::transport::{EventTransport, GrpcEventTransport};

/// Owns auth + transport + session and keeps the stream alive until
/// shutdown or a fatal error.
pub struct Supervisor {
    context: SessionContext,
    max_auth_retries: u32,
    backoff_bounds: (std::time::Duration, std::time::Duration),
    observer: Arc<SessionObserver>,
    phase_rx: watch::Receiver<SessionPhase>,
    ready_rx: watch::Receiver<bool>,
    last_error: watch::Sender<Option<String>>,
}

impl Supervisor {
    /// Production wiring: gRPC transport and a fresh token provider built
    /// from the configuration.
    pub fn new(runtime: CoreRuntime, config: RuntimeConfig) -> Result<Self, FatalError> {
        let transport = GrpcEventTransport::new(&config.grpc_endpoint).map_err(|e| {
            FatalError::Config(ConfigError::Invalid {
                key: "SPOKE_GRPC_ENDPOINT",
                message: e.to_string(),
            })
        })?;
        let auth = Arc::new(TokenProvider::new(config.auth.clone()));
        Ok(Self::with_parts(runtime, config, auth, Arc::new(transport)))
    }

    /// gRPC transport, caller-supplied token provider. The facade uses
    /// this so the stream and the entity service share one provider.
    pub fn with_auth(
        runtime: CoreRuntime,
        config: RuntimeConfig,
        auth: Arc<TokenProvider>,
    ) -> Result<Self, FatalError> {
        let transport = GrpcEventTransport::new(&config.grpc_endpoint).map_err(|e| {
            FatalError::Config(ConfigError::Invalid {
                key: "SPOKE_GRPC_ENDPOINT",
                message: e.to_string(),
            })
        })?;
        Ok(Self::with_parts(runtime, config, auth, Arc::new(transport)))
    }

    /// Explicit wiring; tests hand in an in-memory transport, the facade
    /// hands in the token provider it shares with the entity service.
    pub fn with_parts(
        runtime: CoreRuntime,
        config: RuntimeConfig,
        auth: Arc<TokenProvider>,
        transport: Arc<dyn EventTransport>,
    ) -> Self {
        let (observer, phase_rx, ready_rx) = SessionObserver::new();
        let (last_error, _) = watch::channel(None);
        let context = SessionContext {
            runtime,
            transport,
            auth,
            session_config: config.session.clone(),
            dispatch_config: config.dispatch.clone(),
            process_id: Uuid::new_v4().to_string(),
            shutdown: CancellationToken::new(),
        };
        Self {
            context,
            max_auth_retries: config.auth.max_retries,
            backoff_bounds: (
                config.session.reconnect_backoff_min,
                config.session.reconnect_backoff_max,
            ),
            observer,
            phase_rx,
            ready_rx,
            last_error,
        }
    }

    /// Observables + shutdown trigger, detachable before `run()` consumes
    /// the supervisor.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            phase: self.phase_rx.clone(),
            ready: self.ready_rx.clone(),
            last_error: self.last_error.subscribe(),
            shutdown: self.context.shutdown.clone(),
        }
    }

    /// Run sessions until shutdown (`Ok`) or a fatal error.
    pub async fn run(self) -> Result<(), FatalError> {
        let (min, max) = self.backoff_bounds;
        let mut backoff = Backoff::new(min, max);
        let mut auth_failures: u32 = 0;

        loop {
            if self.context.shutdown.is_cancelled() {
                self.observer.set(SessionPhase::Closed);
                return Ok(());
            }

            let result = run_session(&self.context, &self.observer).await;
            let reached_running = self.observer.take_reached_running();

            match result {
                Ok(()) => {
                    tracing::info!("Session closed cleanly");
                    self.observer.set(SessionPhase::Closed);
                    return Ok(());
                }
                Err(e) => {
                    self.last_error.send_replace(Some(e.to_string()));

                    if e.is_fatal() {
                        self.observer.set(SessionPhase::Closed);
                        return Err(FatalError::HandshakeMismatch(e.to_string()));
                    }
                    if e.is_auth() {
                        auth_failures += 1;
                        if auth_failures > self.max_auth_retries {
                            self.observer.set(SessionPhase::Closed);
                            return Err(FatalError::AuthExhausted {
                                attempts: auth_failures,
                                message: e.to_string(),
                            });
                        }
                    } else {
                        auth_failures = 0;
                    }
                    if reached_running {
                        backoff.reset();
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        delay_millis = delay.as_millis() as u64,
                        "Session ended, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.context.shutdown.cancelled() => {}
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("process_id", &self.context.process_id)
            .finish_non_exhaustive()
    }
}

/// Cloneable view on a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    phase: watch::Receiver<SessionPhase>,
    ready: watch::Receiver<bool>,
    last_error: watch::Receiver<Option<String>>,
    shutdown: CancellationToken,
}

impl SupervisorHandle {
    /// `true` iff a session is currently `Running`.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Request a graceful shutdown: drain inflight work, flush the outbox,
    /// close.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the session is `Running`. Returns `false` if the
    /// supervisor went away first.
    pub async fn wait_ready(&mut self) -> bool {
        loop {
            if *self.ready.borrow() {
                return true;
            }
            if self.ready.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Wait for the next phase change; `None` once the supervisor is gone.
    pub async fn phase_changed(&mut self) -> Option<SessionPhase> {
        self.phase.changed().await.ok()?;
        Some(*self.phase.borrow())
    }
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("phase", &self.phase())
            .field("ready", &self.is_ready())
            .finish()
    }
}
