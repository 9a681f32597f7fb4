//! The whole stack through the facade: register, connect, compute, drain.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use spoke::prelude::*;
use spoke::spoke_grpc::events::types;
use spoke::{AuthConfig, RuntimeConfig, Supervisor, TokenProvider};
use spoke_test::MockPlatform;

#[derive(Debug, Serialize, Deserialize)]
struct Pet {
    name: String,
    #[serde(default)]
    vaccinated: bool,
}

impl EntityType for Pet {
    const MODEL_NAME: &'static str = "Pet";
    const MODEL_VERSION: u32 = 1;
}

#[tokio::test]
async fn facade_runtime_computes_both_handler_kinds() {
    let runtime = CoreRuntime::builder()
        .processor::<Pet, _, _>("Vaccinate", 1, |_ctx, mut pet| async move {
            pet.fields.vaccinated = true;
            Ok(pet)
        })
        .criterion::<Pet, _, _>("IsVaccinated", 1, |_ctx, pet| async move {
            Ok(pet.fields.vaccinated)
        })
        .build();

    let mut config = RuntimeConfig::new(
        "http://unused.invalid:1",
        AuthConfig::new("id", "secret", "http://unused.invalid/token"),
    );
    config.session.reconnect_backoff_min = Duration::from_millis(20);

    let platform = MockPlatform::new();
    let auth = Arc::new(TokenProvider::fixed("t"));
    let supervisor = Supervisor::with_parts(runtime, config, auth, platform.transport());
    let mut handle = supervisor.handle();
    let join = tokio::spawn(supervisor.run());

    assert!(handle.wait_ready().await);
    assert_eq!(handle.phase(), spoke::SessionPhase::Running);

    platform
        .send_processor_request("p1", "Vaccinate", "Pet", 1, json!({"name": "rex", "vaccinated": false}))
        .await;
    let responses = platform
        .wait_for_type(types::PROCESSOR_RESPONSE, 1, Duration::from_secs(3))
        .await
        .expect("no processor response");
    assert_eq!(
        responses[0]["payload"],
        json!({"name": "rex", "vaccinated": true})
    );

    platform
        .send_criterion_request("c1", "IsVaccinated", "Pet", 1, json!({"name": "rex", "vaccinated": true}))
        .await;
    let verdicts = platform
        .wait_for_type(types::CRITERIA_RESPONSE, 1, Duration::from_secs(3))
        .await
        .expect("no criteria response");
    assert_eq!(verdicts[0]["matches"], true);

    handle.shutdown();
    assert!(join.await.unwrap().is_ok());
    assert_eq!(handle.phase(), spoke::SessionPhase::Closed);
}
