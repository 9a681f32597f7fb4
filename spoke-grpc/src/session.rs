//! One handshake-to-close lifecycle of the event stream.
//!
//! The session owns the stream exclusively: it authenticates, connects,
//! performs the Join/Greet handshake, then runs a select loop that
//! interleaves inbound dispatch, keepalives, and token refresh. It never
//! reconnects itself — it returns a [`SessionError`] and lets the
//! supervisor decide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use spoke_auth::TokenProvider;
use spoke_core::frame::{JoinFrame, OutboundFrame};
use spoke_core::{outbox, CoreRuntime, DispatchConfig, Dispatcher, SessionConfig};

use crate::error::SessionError;
use crate::events::{self, decode_event, encode_event, GreetData, InboundEvent, SCHEMA_VERSION};
use crate::transport::{EventTransport, InboundEvents};

/// Where a session currently is in its lifecycle. Observable through the
/// supervisor's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Authenticating,
    Connecting,
    Handshaking,
    Running,
    Draining,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Handshaking => "handshaking",
            SessionPhase::Running => "running",
            SessionPhase::Draining => "draining",
            SessionPhase::Reconnecting => "reconnecting",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Publishes phase transitions to the supervisor's watch channels.
pub(crate) struct SessionObserver {
    phase: watch::Sender<SessionPhase>,
    ready: watch::Sender<bool>,
    reached_running: AtomicBool,
}

impl SessionObserver {
    pub(crate) fn new() -> (
        Arc<Self>,
        watch::Receiver<SessionPhase>,
        watch::Receiver<bool>,
    ) {
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let (ready_tx, ready_rx) = watch::channel(false);
        (
            Arc::new(Self {
                phase: phase_tx,
                ready: ready_tx,
                reached_running: AtomicBool::new(false),
            }),
            phase_rx,
            ready_rx,
        )
    }

    pub(crate) fn set(&self, phase: SessionPhase) {
        let running = matches!(phase, SessionPhase::Running);
        if running {
            self.reached_running.store(true, Ordering::Release);
        }
        self.ready.send_replace(running);
        tracing::debug!(phase = %phase, "Session phase");
        self.phase.send_replace(phase);
    }

    /// Whether the last session made it to `Running`; clears the flag.
    pub(crate) fn take_reached_running(&self) -> bool {
        self.reached_running.swap(false, Ordering::AcqRel)
    }
}

/// Everything one session run needs; owned by the supervisor and reused
/// across reconnects (registry, codec, and identity are stable).
pub(crate) struct SessionContext {
    pub runtime: CoreRuntime,
    pub transport: Arc<dyn EventTransport>,
    pub auth: Arc<TokenProvider>,
    pub session_config: SessionConfig,
    pub dispatch_config: DispatchConfig,
    /// Stable for the process lifetime, so the platform can correlate
    /// reconnects.
    pub process_id: String,
    pub shutdown: CancellationToken,
}

impl SessionContext {
    fn source(&self) -> String {
        format!("spoke/{}", self.process_id)
    }
}

/// Run one session to completion. `Ok(())` means a clean, drained close;
/// any error means the supervisor should reconnect (or give up, for fatal
/// ones).
pub(crate) async fn run_session(
    cx: &SessionContext,
    observer: &SessionObserver,
) -> Result<(), SessionError> {
    observer.set(SessionPhase::Authenticating);
    let token = tokio::select! {
        token = cx.auth.token() => token.map_err(SessionError::Auth)?,
        _ = cx.shutdown.cancelled() => return Ok(()),
    };
    let mut token_expiry = token.expires_at();

    observer.set(SessionPhase::Connecting);
    let (outbox, outbox_rx) = outbox(cx.session_config.outbox_capacity);
    let source = cx.source();
    let encoder_source = source.clone();
    let outbound = ReceiverStream::new(outbox_rx.into_inner())
        .filter_map(move |frame| {
            let event = match encode_event(&encoder_source, frame) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::error!(error = %e, "Dropping unencodable outbound frame");
                    None
                }
            };
            futures_util::future::ready(event)
        })
        .boxed();
    let mut inbound = tokio::select! {
        connected = cx.transport.connect(token.secret(), outbound) => {
            connected.map_err(SessionError::Connect)?
        }
        _ = cx.shutdown.cancelled() => return Ok(()),
    };

    observer.set(SessionPhase::Handshaking);
    let join = JoinFrame {
        process_id: cx.process_id.clone(),
        handlers: cx.runtime.registry().list(),
        schema_version: SCHEMA_VERSION,
    };
    let advertised = join.handlers.len();
    outbox
        .submit(OutboundFrame::Join(join))
        .await
        .map_err(|_| SessionError::StreamClosed)?;

    let greet = tokio::select! {
        greet = await_greet(&mut inbound, cx.session_config.handshake_timeout) => greet?,
        _ = cx.shutdown.cancelled() => return Ok(()),
    };
    tracing::info!(
        session_id = %greet.session_id,
        server_version = %greet.server_version,
        handlers = advertised,
        "Session established"
    );

    observer.set(SessionPhase::Running);
    let reset = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        cx.runtime.clone(),
        outbox.clone(),
        cx.dispatch_config.clone(),
        reset.clone(),
    );

    let interval = cx.session_config.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + interval, interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Any inbound traffic proves the link; keepalive acks are just the
    // guaranteed source of it on an otherwise idle stream.
    let mut last_inbound = Instant::now();
    let margin = cx.session_config.token_renewal_margin;

    let result = loop {
        let refresh_at = token_expiry
            .checked_sub(margin)
            .unwrap_or_else(Instant::now)
            .max(Instant::now() + Duration::from_secs(1));
        tokio::select! {
            _ = cx.shutdown.cancelled() => break Ok(()),
            received = inbound.next() => match received {
                None => break Err(SessionError::StreamClosed),
                Some(Err(e)) => break Err(SessionError::Stream(e)),
                Some(Ok(event)) => {
                    last_inbound = Instant::now();
                    match decode_event(&event) {
                        Ok(InboundEvent::Request(request)) => dispatcher.handle_inbound(request),
                        Ok(InboundEvent::KeepAliveAck(_)) => {}
                        Ok(InboundEvent::KeepAlive(data)) => {
                            if outbox
                                .submit(OutboundFrame::KeepAliveAck { timestamp_millis: data.timestamp })
                                .await
                                .is_err()
                            {
                                break Err(SessionError::StreamClosed);
                            }
                        }
                        Ok(InboundEvent::Greet(_)) => {
                            tracing::debug!("Ignoring repeated greet");
                        }
                        Ok(InboundEvent::Unknown { event_type }) => {
                            tracing::debug!(event_type = %event_type, "Ignoring unknown event type");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Ignoring undecodable inbound event");
                        }
                    }
                }
            },
            _ = keepalive.tick() => {
                if last_inbound.elapsed() >= interval * 2 {
                    break Err(SessionError::KeepAliveLost);
                }
                if outbox.idle_for() >= interval {
                    let frame = OutboundFrame::KeepAlive { timestamp_millis: unix_millis() };
                    if outbox.submit(frame).await.is_err() {
                        break Err(SessionError::StreamClosed);
                    }
                }
            },
            _ = tokio::time::sleep_until(refresh_at) => {
                match cx.auth.refresh().await {
                    Ok(fresh) => {
                        token_expiry = fresh.expires_at();
                        let frame = OutboundFrame::ReAuth { token: fresh.secret().to_string() };
                        if outbox.submit(frame).await.is_err() {
                            break Err(SessionError::StreamClosed);
                        }
                        tracing::debug!("Re-authenticated mid-stream");
                    }
                    Err(e) => break Err(SessionError::Auth(e)),
                }
            },
        }
    };

    match result {
        Ok(()) => {
            observer.set(SessionPhase::Draining);
            dispatcher.drain(cx.session_config.drain_timeout).await;
            reset.cancel();
            drop(dispatcher);
            drop(outbox);
            // Let the transport push the queue tail before the stream is
            // torn down; the platform re-requests anything that misses.
            let flush = async {
                while inbound.next().await.is_some() {}
            };
            let _ = tokio::time::timeout(Duration::from_secs(1), flush).await;
            observer.set(SessionPhase::Closed);
            Ok(())
        }
        Err(e) => {
            reset.cancel();
            observer.set(SessionPhase::Reconnecting);
            Err(e)
        }
    }
}

/// Wait for the platform's `Greet`. Keepalive traffic is tolerated;
/// anything else during the handshake is a protocol-level disagreement.
async fn await_greet(
    inbound: &mut InboundEvents,
    timeout: Duration,
) -> Result<GreetData, SessionError> {
    let deadline = Instant::now() + timeout;
    loop {
        let received = tokio::time::timeout_at(deadline, inbound.next())
            .await
            .map_err(|_| SessionError::HandshakeTimeout)?;
        match received {
            None => return Err(SessionError::StreamClosed),
            Some(Err(e)) => return Err(SessionError::Stream(e)),
            Some(Ok(event)) => match decode_event(&event) {
                Ok(InboundEvent::Greet(greet)) => {
                    if let Some(major) = parse_major(&greet.server_version) {
                        if major != SCHEMA_VERSION {
                            return Err(SessionError::HandshakeMismatch(format!(
                                "server speaks schema {major}, this client speaks {SCHEMA_VERSION}"
                            )));
                        }
                    }
                    return Ok(greet);
                }
                Ok(InboundEvent::KeepAlive(_)) | Ok(InboundEvent::KeepAliveAck(_)) => continue,
                Ok(other) => {
                    return Err(SessionError::HandshakeMismatch(format!(
                        "expected {}, received {}",
                        events::types::GREET,
                        other.kind_name()
                    )))
                }
                Err(e) => return Err(SessionError::HandshakeMismatch(e.to_string())),
            },
        }
    }
}

/// Major component of a dotted version string; `None` if it has none.
fn parse_major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_major_handles_common_shapes() {
        assert_eq!(parse_major("1.4.2"), Some(1));
        assert_eq!(parse_major("2"), Some(2));
        assert_eq!(parse_major("v3"), None);
        assert_eq!(parse_major(""), None);
    }

    #[test]
    fn phase_display_names() {
        assert_eq!(SessionPhase::Running.to_string(), "running");
        assert_eq!(SessionPhase::Reconnecting.to_string(), "reconnecting");
    }
}
