//! Request dispatch: routing, admission control, deadlines, and the
//! exactly-one-response guarantee.
//!
//! [`Dispatcher::handle_inbound`] never blocks the session's receive loop:
//! it either spawns a work item onto a bounded worker pool or rejects with
//! an immediate error response. Processors and criteria get separate pools
//! because their latency profiles differ by an order of magnitude.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::BoxedEntity;
use crate::config::{DispatchConfig, OverflowPolicy};
use crate::entity::ModelKey;
use crate::frame::{ErrorKind, InboundRequest, Outcome, OutboundFrame, ResponseFrame};
use crate::handler::{HandlerContext, HandlerEntry, HandlerKind, HandlerOutput};
use crate::outbox::Outbox;
use crate::runtime::CoreRuntime;

/// Routes inbound requests to registered handlers and funnels their
/// responses into the outbox.
///
/// One dispatcher lives per stream session: its inflight bookkeeping and
/// duplicate tracking are session-scoped, and its cancellation token is a
/// child of the session's, so a reset cancels every running handler.
#[derive(Clone)]
pub struct Dispatcher {
    runtime: CoreRuntime,
    outbox: Outbox,
    config: DispatchConfig,
    processor_pool: Arc<Semaphore>,
    criterion_pool: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    inflight: Arc<DashMap<String, HandlerKind>>,
    seen: Arc<DashSet<String>>,
    drained: Arc<Notify>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        runtime: CoreRuntime,
        outbox: Outbox,
        config: DispatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor_pool: Arc::new(Semaphore::new(config.processor_concurrency.max(1))),
            criterion_pool: Arc::new(Semaphore::new(config.criterion_concurrency.max(1))),
            runtime,
            outbox,
            config,
            queued: Arc::new(AtomicUsize::new(0)),
            inflight: Arc::new(DashMap::new()),
            seen: Arc::new(DashSet::new()),
            drained: Arc::new(Notify::new()),
            cancel,
        }
    }

    /// Ingest one request frame. Non-blocking: the call returns once the
    /// work item is spawned or an error response is on its way.
    pub fn handle_inbound(&self, frame: InboundRequest) {
        let InboundRequest {
            request_id,
            kind,
            handler_name,
            handler_version,
            model,
            payload,
            deadline_millis,
        } = frame;

        // One response per request id, first one wins.
        if !self.seen.insert(request_id.clone()) {
            tracing::warn!(request_id = %request_id, "duplicate request id, dropping frame");
            return;
        }
        self.inflight.insert(request_id.clone(), kind);

        let entry = match self
            .runtime
            .registry()
            .resolve(kind, &handler_name, handler_version)
        {
            Some(entry) => entry,
            None => {
                self.reject(ResponseFrame::error(
                    request_id,
                    kind,
                    ErrorKind::HandlerNotFound,
                    format!("no {kind} registered under the name {handler_name}"),
                ));
                return;
            }
        };

        if entry.model != model {
            self.reject(ResponseFrame::error(
                request_id,
                kind,
                ErrorKind::MalformedPayload,
                format!(
                    "{kind} {handler_name} is bound to {}, request declared {model}",
                    entry.model
                ),
            ));
            return;
        }

        let entity = match self.runtime.codec().decode(&model, &payload) {
            Ok(entity) => entity,
            Err(e) => {
                self.reject(ResponseFrame::error(
                    request_id,
                    kind,
                    ErrorKind::MalformedPayload,
                    e.to_string(),
                ));
                return;
            }
        };

        let default_timeout = match kind {
            HandlerKind::Processor => self.config.processor_timeout,
            HandlerKind::Criterion => self.config.criterion_timeout,
        };
        let hint = deadline_millis.map(Duration::from_millis);
        if hint == Some(Duration::ZERO) {
            self.reject(ResponseFrame::error(
                request_id,
                kind,
                ErrorKind::Timeout,
                "deadline elapsed before dispatch",
            ));
            return;
        }
        let timeout = hint.map_or(default_timeout, |h| h.min(default_timeout));
        let deadline = Instant::now() + timeout;

        let pool = match kind {
            HandlerKind::Processor => Arc::clone(&self.processor_pool),
            HandlerKind::Criterion => Arc::clone(&self.criterion_pool),
        };
        let permit = match Arc::clone(&pool).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                let overloaded = matches!(self.config.overflow_policy, OverflowPolicy::Reject)
                    && self.queued.load(Ordering::Acquire) >= self.config.inbound_queue_depth;
                if overloaded {
                    self.reject(ResponseFrame::error(
                        request_id,
                        kind,
                        ErrorKind::Overloaded,
                        "worker pool saturated and inbound queue full",
                    ));
                    return;
                }
                // Counted here, on the ingest path, so a burst of arrivals
                // observes the queue depth it is about to create.
                self.queued.fetch_add(1, Ordering::AcqRel);
                None
            }
        };

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher
                .run_work_item(request_id, kind, model, entry, entity, permit, pool, deadline)
                .await;
        });
    }

    /// Number of requests whose response has not yet been submitted.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Wait until every inflight work item has resolved, up to `limit`.
    /// Used by the session while draining.
    pub async fn drain(&self, limit: Duration) {
        let deadline = Instant::now() + limit;
        loop {
            if self.inflight.is_empty() {
                return;
            }
            let notified = self.drained.notified();
            if self.inflight.is_empty() {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(
                    remaining = self.inflight.len(),
                    "drain deadline elapsed with work items still inflight"
                );
                return;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_work_item(
        &self,
        request_id: String,
        kind: HandlerKind,
        model: ModelKey,
        entry: Arc<HandlerEntry>,
        entity: BoxedEntity,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
        pool: Arc<Semaphore>,
        deadline: Instant,
    ) {
        // Queued → Running: wait for a pool slot unless we already hold one.
        let _permit = match permit {
            Some(permit) => permit,
            None => {
                // The ingest path already counted this item as queued.
                let acquired = tokio::select! {
                    permit = pool.acquire_owned() => permit.ok(),
                    _ = self.cancel.cancelled() => None,
                };
                self.queued.fetch_sub(1, Ordering::AcqRel);
                match acquired {
                    Some(permit) => permit,
                    None => {
                        // Session reset while queued: no response, the
                        // platform re-requests after reconnect.
                        self.discard(&request_id);
                        return;
                    }
                }
            }
        };

        if Instant::now() >= deadline {
            self.finish(ResponseFrame::error(
                request_id,
                kind,
                ErrorKind::Timeout,
                "deadline elapsed while queued",
            ))
            .await;
            return;
        }

        let token = self.cancel.child_token();
        let ctx = HandlerContext::new(
            request_id.clone(),
            model,
            deadline,
            token.clone(),
            Arc::clone(self.runtime.entities()),
        );
        // Spawned so a panicking handler takes down its own task only.
        let mut task = tokio::spawn((entry.invoke)(ctx, entity));

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                // Session reset: the child token is already cancelled with
                // its parent; whatever the handler returns now has nowhere
                // to go. The platform re-requests after reconnect.
                tracing::debug!(request_id = %request_id, "session reset, dropping work item");
                self.discard(&request_id);
                return;
            }
            joined = &mut task => match joined {
                Ok(Ok(HandlerOutput::Payload(payload))) => Outcome::Entity(payload),
                Ok(Ok(HandlerOutput::Matches(matches))) => Outcome::Matches(matches),
                Ok(Err(err)) => Outcome::Error {
                    kind: ErrorKind::HandlerFailed,
                    message: err.message().to_string(),
                },
                Err(join_err) => Outcome::Error {
                    kind: ErrorKind::HandlerFailed,
                    message: panic_message(join_err),
                },
            },
            _ = tokio::time::sleep_until(deadline) => {
                token.cancel();
                // The worker is not killed; it is watched until the grace
                // period runs out and then only logged.
                let grace = self.config.grace_timeout;
                let watched_id = request_id.clone();
                let handler = format!("{}/v{}", entry.name, entry.version);
                tokio::spawn(async move {
                    if tokio::time::timeout(grace, task).await.is_err() {
                        tracing::warn!(
                            request_id = %watched_id,
                            handler = %handler,
                            "handler still running after cancellation grace period"
                        );
                    }
                });
                Outcome::Error {
                    kind: ErrorKind::Timeout,
                    message: "deadline exceeded".into(),
                }
            }
        };

        self.finish(ResponseFrame {
            request_id,
            kind,
            outcome,
        })
        .await;
    }

    fn reject(&self, frame: ResponseFrame) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.finish(frame).await;
        });
    }

    async fn finish(&self, frame: ResponseFrame) {
        let request_id = frame.request_id.clone();
        if let Outcome::Error { kind, ref message } = frame.outcome {
            tracing::debug!(
                request_id = %request_id,
                error_kind = %kind,
                message = %message,
                "responding with failure"
            );
        }
        if self
            .outbox
            .submit(OutboundFrame::Response(frame))
            .await
            .is_err()
        {
            tracing::debug!(
                request_id = %request_id,
                "session closed before the response could be submitted"
            );
        }
        self.discard(&request_id);
    }

    fn discard(&self, request_id: &str) {
        self.inflight.remove(request_id);
        self.drained.notify_waiters();
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_panic() {
        let panic = err.into_panic();
        if let Some(msg) = panic.downcast_ref::<&'static str>() {
            format!("handler panicked: {msg}")
        } else if let Some(msg) = panic.downcast_ref::<String>() {
            format!("handler panicked: {msg}")
        } else {
            "handler panicked".to_string()
        }
    } else {
        "handler task was cancelled".to_string()
    }
}
