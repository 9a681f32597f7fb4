//! Dispatcher behavior, driven end to end against a captured outbox.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use spoke_core::frame::{ErrorKind, InboundRequest, Outcome, OutboundFrame, ResponseFrame};
use spoke_core::{
    outbox, CoreRuntime, DispatchConfig, Dispatcher, Entity, EntityType, HandlerError,
    HandlerKind, ModelKey, OutboxReceiver,
};

#[derive(Debug, Serialize, Deserialize)]
struct Item {
    name: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    weight: Option<f64>,
}

impl EntityType for Item {
    const MODEL_NAME: &'static str = "Item";
    const MODEL_VERSION: u32 = 1;
}

fn request(id: &str, kind: HandlerKind, handler: &str) -> InboundRequest {
    InboundRequest {
        request_id: id.into(),
        kind,
        handler_name: handler.into(),
        handler_version: None,
        model: ModelKey::new("Item", 1),
        payload: json!({"name": "a", "tags": [], "weight": 3.0}),
        deadline_millis: None,
    }
}

async fn next_response(rx: &mut OutboxReceiver) -> ResponseFrame {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a response frame")
        .expect("outbox closed");
    match frame {
        OutboundFrame::Response(response) => response,
        other => panic!("expected a response frame, got {other:?}"),
    }
}

fn error_kind(response: &ResponseFrame) -> Option<ErrorKind> {
    match response.outcome {
        Outcome::Error { kind, .. } => Some(kind),
        _ => None,
    }
}

#[tokio::test]
async fn happy_processor_round_trips_the_entity() {
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("TagAdder", 1, |_ctx, mut item| async move {
            item.fields.tags.push("tagged".into());
            Ok(item)
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    let mut frame = request("r1", HandlerKind::Processor, "TagAdder");
    frame.payload = json!({"name": "a", "tags": []});
    dispatcher.handle_inbound(frame);

    let response = next_response(&mut rx).await;
    assert_eq!(response.request_id, "r1");
    assert_eq!(
        response.outcome,
        Outcome::Entity(json!({"name": "a", "tags": ["tagged"]}))
    );
    assert_eq!(dispatcher.inflight_len(), 0);
}

#[tokio::test]
async fn criterion_returns_matches_false() {
    let runtime = CoreRuntime::builder()
        .criterion::<Item, _, _>("IsHeavy", 1, |_ctx, item| async move {
            Ok(item.fields.weight.unwrap_or(0.0) > 10.0)
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    dispatcher.handle_inbound(request("r1", HandlerKind::Criterion, "IsHeavy"));

    let response = next_response(&mut rx).await;
    assert_eq!(response.outcome, Outcome::Matches(false));
}

#[tokio::test]
async fn unknown_handler_is_rejected_without_invocation() {
    let invoked = Arc::new(AtomicBool::new(false));
    let observed = invoked.clone();
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Exists", 1, move |_ctx, item| {
            observed.store(true, Ordering::SeqCst);
            async move { Ok(item) }
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Nope"));

    let response = next_response(&mut rx).await;
    assert_eq!(error_kind(&response), Some(ErrorKind::HandlerNotFound));
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Touch", 1, |_ctx, item| async move { Ok(item) })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    let mut frame = request("r1", HandlerKind::Processor, "Touch");
    frame.payload = json!({"name": 12});
    dispatcher.handle_inbound(frame);

    let response = next_response(&mut rx).await;
    assert_eq!(error_kind(&response), Some(ErrorKind::MalformedPayload));
}

#[tokio::test]
async fn model_mismatch_is_rejected() {
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Touch", 1, |_ctx, item| async move { Ok(item) })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    let mut frame = request("r1", HandlerKind::Processor, "Touch");
    frame.model = ModelKey::new("Order", 2);
    dispatcher.handle_inbound(frame);

    let response = next_response(&mut rx).await;
    assert_eq!(error_kind(&response), Some(ErrorKind::MalformedPayload));
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_the_handler() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let observed = cancelled.clone();
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Sleepy", 1, move |ctx, item| {
            let observed = observed.clone();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(item),
                    _ = ctx.cancellation().cancelled() => {
                        observed.store(true, Ordering::SeqCst);
                        Err(HandlerError::new("cancelled"))
                    }
                }
            }
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    let mut frame = request("r1", HandlerKind::Processor, "Sleepy");
    frame.deadline_millis = Some(200);
    dispatcher.handle_inbound(frame);

    let response = next_response(&mut rx).await;
    assert_eq!(error_kind(&response), Some(ErrorKind::Timeout));
    // Give the watched handler task a moment to observe its token.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn zero_deadline_hint_times_out_without_invocation() {
    let invoked = Arc::new(AtomicBool::new(false));
    let observed = invoked.clone();
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Touch", 1, move |_ctx, item| {
            observed.store(true, Ordering::SeqCst);
            async move { Ok(item) }
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    let mut frame = request("r1", HandlerKind::Processor, "Touch");
    frame.deadline_millis = Some(0);
    dispatcher.handle_inbound(frame);

    let response = next_response(&mut rx).await;
    assert_eq!(error_kind(&response), Some(ErrorKind::Timeout));
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn handler_error_maps_to_handler_failed() {
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Broken", 1, |_ctx, _item: Entity<Item>| async move {
            Err(HandlerError::new("inventory service unavailable"))
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Broken"));

    let response = next_response(&mut rx).await;
    match &response.outcome {
        Outcome::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::HandlerFailed);
            assert!(message.contains("inventory service unavailable"));
        }
        other => panic!("expected an error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn handler_panic_is_captured() {
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Panicky", 1, |_ctx, _item: Entity<Item>| async move {
            panic!("boom")
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Panicky"));

    let response = next_response(&mut rx).await;
    match &response.outcome {
        Outcome::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::HandlerFailed);
            assert!(message.contains("boom"));
        }
        other => panic!("expected an error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_request_id_gets_exactly_one_response() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Touch", 1, move |_ctx, item| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(item) }
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let dispatcher = Dispatcher::new(
        runtime,
        outbox,
        DispatchConfig::default(),
        CancellationToken::new(),
    );

    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Touch"));
    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Touch"));

    let response = next_response(&mut rx).await;
    assert_eq!(response.request_id, "r1");
    // No second frame arrives.
    let silent = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(silent.is_err());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn saturation_rejects_with_overloaded() {
    let gate = Arc::new(Semaphore::new(0));
    let release = gate.clone();
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Slow", 1, move |_ctx, item| {
            let gate = gate.clone();
            async move {
                gate.acquire().await.expect("gate closed").forget();
                Ok(item)
            }
        })
        .build();
    let (outbox, mut rx) = outbox(16);
    let config = DispatchConfig {
        processor_concurrency: 1,
        inbound_queue_depth: 1,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::new(runtime, outbox, config, CancellationToken::new());

    // First runs, second queues, third is shed.
    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Slow"));
    dispatcher.handle_inbound(request("r2", HandlerKind::Processor, "Slow"));
    dispatcher.handle_inbound(request("r3", HandlerKind::Processor, "Slow"));

    let shed = next_response(&mut rx).await;
    assert_eq!(shed.request_id, "r3");
    assert_eq!(error_kind(&shed), Some(ErrorKind::Overloaded));

    // Releasing the gate lets the two admitted requests complete.
    release.add_permits(2);
    let a = next_response(&mut rx).await;
    let b = next_response(&mut rx).await;
    let mut ids = vec![a.request_id.clone(), b.request_id.clone()];
    ids.sort();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert!(a.is_success() && b.is_success());
}

#[tokio::test]
async fn session_reset_drops_queued_work_silently() {
    let gate = Arc::new(Semaphore::new(0));
    let blocked = gate.clone();
    let runtime = CoreRuntime::builder()
        .processor::<Item, _, _>("Slow", 1, move |_ctx, item| {
            let gate = blocked.clone();
            async move {
                gate.acquire().await.expect("gate closed").forget();
                Ok(item)
            }
        })
        .build();
    let (outbox, rx) = outbox(16);
    let cancel = CancellationToken::new();
    let config = DispatchConfig {
        processor_concurrency: 1,
        inbound_queue_depth: 8,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::new(runtime, outbox, config, cancel.clone());

    dispatcher.handle_inbound(request("r1", HandlerKind::Processor, "Slow"));
    dispatcher.handle_inbound(request("r2", HandlerKind::Processor, "Slow"));
    tokio::task::yield_now().await;

    cancel.cancel();
    drop(rx);
    dispatcher.drain(Duration::from_secs(2)).await;
    assert_eq!(dispatcher.inflight_len(), 0);
}
