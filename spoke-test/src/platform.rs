use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_core::future::BoxFuture;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use spoke_grpc::events::types;
use spoke_grpc::proto::{cloud_event, CloudEvent};
use spoke_grpc::{EventTransport, InboundEvents, OutboundEvents, TransportError};

/// Scripted in-memory stand-in for the orchestration platform.
///
/// Cloneable; all clones observe the same state. Each
/// [`connect`](EventTransport::connect) opens a fresh session whose
/// server→client half stays writable through [`MockPlatform::send`] until
/// the next connect or an explicit [`MockPlatform::kill_session`].
#[derive(Clone)]
pub struct MockPlatform {
    inner: Arc<Inner>,
}

struct Inner {
    auto_greet: AtomicBool,
    auto_keepalive_ack: AtomicBool,
    server_version: Mutex<String>,
    refuse_connects: AtomicUsize,
    connects: AtomicUsize,
    bearers: Mutex<Vec<String>>,
    received: Mutex<Vec<CloudEvent>>,
    session_tx: Mutex<Option<mpsc::Sender<Result<CloudEvent, TransportError>>>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                auto_greet: AtomicBool::new(true),
                auto_keepalive_ack: AtomicBool::new(true),
                server_version: Mutex::new("1.0.0".to_string()),
                refuse_connects: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                bearers: Mutex::new(Vec::new()),
                received: Mutex::new(Vec::new()),
                session_tx: Mutex::new(None),
            }),
        }
    }

    /// The transport to hand to `Supervisor::with_parts`.
    pub fn transport(&self) -> Arc<dyn EventTransport> {
        Arc::new(self.clone())
    }

    /// Change the `serverVersion` greeted back on joins.
    pub fn with_server_version(self, version: impl Into<String>) -> Self {
        *self.inner.server_version.lock().unwrap() = version.into();
        self
    }

    /// Do not answer joins; the test greets (or does not) by hand.
    pub fn manual_greet(self) -> Self {
        self.inner.auto_greet.store(false, Ordering::SeqCst);
        self
    }

    /// Refuse the next `n` connect attempts with a connect error.
    pub fn refuse_next_connects(&self, n: usize) {
        self.inner.refuse_connects.store(n, Ordering::SeqCst);
    }

    /// Stop (or resume) acknowledging keepalives; used to simulate a dead
    /// link that still holds the TCP stream open.
    pub fn set_auto_keepalive_ack(&self, enabled: bool) {
        self.inner
            .auto_keepalive_ack
            .store(enabled, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Bearer tokens presented on each connect, in order.
    pub fn bearers(&self) -> Vec<String> {
        self.inner.bearers.lock().unwrap().clone()
    }

    /// Everything the client has sent, in wire order.
    pub fn received(&self) -> Vec<CloudEvent> {
        self.inner.received.lock().unwrap().clone()
    }

    /// Decoded data payloads of every received event of `event_type`.
    pub fn received_of_type(&self, event_type: &str) -> Vec<Value> {
        self.inner
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.r#type == event_type)
            .filter_map(|event| {
                event
                    .text_data()
                    .and_then(|text| serde_json::from_str(&text).ok())
            })
            .collect()
    }

    /// Wait until at least `count` events of `event_type` have arrived and
    /// return their payloads; `None` on timeout.
    pub async fn wait_for_type(
        &self,
        event_type: &str,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<Value>> {
        let wait = async {
            loop {
                let seen = self.received_of_type(event_type);
                if seen.len() >= count {
                    return seen;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Push an event to the current session. `false` if no session is
    /// connected (or it already closed its inbound half).
    pub async fn send(&self, event: CloudEvent) -> bool {
        let tx = self.inner.session_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(Ok(event)).await.is_ok(),
            None => false,
        }
    }

    /// Greet the current session by hand (for [`manual_greet`] setups).
    pub async fn send_greet(&self) -> bool {
        let version = self.inner.server_version.lock().unwrap().clone();
        self.send(self.event(
            types::GREET,
            json!({"sessionId": Uuid::new_v4().to_string(), "serverVersion": version}),
        ))
        .await
    }

    /// Inject a processor calculation request.
    pub async fn send_processor_request(
        &self,
        request_id: &str,
        processor_name: &str,
        model_name: &str,
        model_version: u32,
        payload: Value,
    ) -> bool {
        self.send(self.event(
            types::PROCESSOR_REQUEST,
            json!({
                "requestId": request_id,
                "processorName": processor_name,
                "modelName": model_name,
                "modelVersion": model_version,
                "payload": payload,
            }),
        ))
        .await
    }

    /// Inject a criterion calculation request.
    pub async fn send_criterion_request(
        &self,
        request_id: &str,
        criterion_name: &str,
        model_name: &str,
        model_version: u32,
        payload: Value,
    ) -> bool {
        self.send(self.event(
            types::CRITERIA_REQUEST,
            json!({
                "requestId": request_id,
                "criterionName": criterion_name,
                "modelName": model_name,
                "modelVersion": model_version,
                "payload": payload,
            }),
        ))
        .await
    }

    /// Drop the server→client half of the current session, as a crashed or
    /// partitioned platform would.
    pub fn kill_session(&self) {
        self.inner.session_tx.lock().unwrap().take();
    }

    /// Build a platform-sourced event.
    pub fn event(&self, event_type: &str, data: Value) -> CloudEvent {
        CloudEvent {
            id: Uuid::new_v4().to_string(),
            source: "platform/mock".to_string(),
            spec_version: "1.0".to_string(),
            r#type: event_type.to_string(),
            data: Some(cloud_event::Data::TextData(data.to_string())),
        }
    }

    fn record(&self, event: CloudEvent) {
        self.inner.received.lock().unwrap().push(event);
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTransport for MockPlatform {
    fn connect<'a>(
        &'a self,
        bearer: &'a str,
        mut outbound: OutboundEvents,
    ) -> BoxFuture<'a, Result<InboundEvents, TransportError>> {
        Box::pin(async move {
            let refusals = self.inner.refuse_connects.load(Ordering::SeqCst);
            if refusals > 0 {
                self.inner
                    .refuse_connects
                    .store(refusals - 1, Ordering::SeqCst);
                return Err(TransportError::Connect("connection refused (scripted)".into()));
            }

            self.inner.connects.fetch_add(1, Ordering::SeqCst);
            self.inner.bearers.lock().unwrap().push(bearer.to_string());

            let (tx, rx) = mpsc::channel(64);
            *self.inner.session_tx.lock().unwrap() = Some(tx.clone());

            let platform = self.clone();
            tokio::spawn(async move {
                while let Some(event) = outbound.next().await {
                    let event_type = event.r#type.clone();
                    platform.record(event);
                    match event_type.as_str() {
                        types::JOIN if platform.inner.auto_greet.load(Ordering::SeqCst) => {
                            let version =
                                platform.inner.server_version.lock().unwrap().clone();
                            let greet = platform.event(
                                types::GREET,
                                json!({
                                    "sessionId": Uuid::new_v4().to_string(),
                                    "serverVersion": version,
                                }),
                            );
                            let _ = tx.send(Ok(greet)).await;
                        }
                        types::KEEP_ALIVE
                            if platform.inner.auto_keepalive_ack.load(Ordering::SeqCst) =>
                        {
                            let ack = platform
                                .event(types::KEEP_ALIVE_ACK, json!({"timestamp": 0}));
                            let _ = tx.send(Ok(ack)).await;
                        }
                        _ => {}
                    }
                }
                tracing::debug!("mock platform: client closed its outbound half");
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as InboundEvents)
        })
    }
}
