//! Event payloads and the mapping between core frames and the CloudEvents
//! envelope.
//!
//! Payloads ride as JSON in the envelope's text data, camelCase on the
//! wire. Decoding is lenient about event types it does not know
//! ([`InboundEvent::Unknown`]) but strict about payloads of the types it
//! does.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use spoke_core::frame::{InboundRequest, Outcome, OutboundFrame, ResponseFrame};
use spoke_core::registry::HandlerDescriptor;
use spoke_core::{ErrorKind, HandlerKind, ModelKey};

use crate::error::WireError;
use crate::proto::{cloud_event, CloudEvent};

/// CloudEvents specification version stamped on every frame.
pub const SPEC_VERSION: &str = "1.0";

/// Protocol schema version announced in `Join` and checked against the
/// platform's `Greet`.
pub const SCHEMA_VERSION: u32 = 1;

/// The event type discriminators.
pub mod types {
    pub const JOIN: &str = "Join";
    pub const GREET: &str = "Greet";
    pub const PROCESSOR_REQUEST: &str = "EntityProcessorCalculationRequest";
    pub const PROCESSOR_RESPONSE: &str = "EntityProcessorCalculationResponse";
    pub const CRITERIA_REQUEST: &str = "EntityCriteriaCalculationRequest";
    pub const CRITERIA_RESPONSE: &str = "EntityCriteriaCalculationResponse";
    pub const KEEP_ALIVE: &str = "KeepAlive";
    pub const KEEP_ALIVE_ACK: &str = "KeepAliveAck";
    /// The platform has not pinned this name down; keep it in one place.
    pub const RE_AUTH: &str = "ReAuth";
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub process_id: String,
    pub handlers: Vec<HandlerDescriptor>,
    pub schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreetData {
    pub session_id: String,
    pub server_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorRequestData {
    pub request_id: String,
    pub processor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_version: Option<u32>,
    pub model_name: String,
    pub model_version: u32,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_millis: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaRequestData {
    pub request_id: String,
    pub criterion_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criterion_version: Option<u32>,
    pub model_name: String,
    pub model_version: u32,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_millis: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorResponseData {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaResponseData {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepAliveData {
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReAuthData {
    pub token: String,
}

/// A decoded inbound frame, from the session's point of view.
#[derive(Debug)]
pub enum InboundEvent {
    Greet(GreetData),
    Request(InboundRequest),
    KeepAlive(KeepAliveData),
    KeepAliveAck(KeepAliveData),
    /// An event type this client does not know. Logged and ignored.
    Unknown { event_type: String },
}

impl InboundEvent {
    /// Short name used in diagnostics.
    pub fn kind_name(&self) -> &str {
        match self {
            InboundEvent::Greet(_) => types::GREET,
            InboundEvent::Request(request) => match request.kind {
                HandlerKind::Processor => types::PROCESSOR_REQUEST,
                HandlerKind::Criterion => types::CRITERIA_REQUEST,
            },
            InboundEvent::KeepAlive(_) => types::KEEP_ALIVE,
            InboundEvent::KeepAliveAck(_) => types::KEEP_ALIVE_ACK,
            InboundEvent::Unknown { event_type } => event_type,
        }
    }
}

fn data_of<T: serde::de::DeserializeOwned>(event: &CloudEvent) -> Result<T, WireError> {
    let text = event.text_data().ok_or_else(|| WireError::Malformed {
        event_type: event.r#type.clone(),
        message: "missing data".into(),
    })?;
    serde_json::from_str(&text).map_err(|e| WireError::Malformed {
        event_type: event.r#type.clone(),
        message: e.to_string(),
    })
}

/// Decode one envelope into a session-level event.
pub fn decode_event(event: &CloudEvent) -> Result<InboundEvent, WireError> {
    match event.r#type.as_str() {
        types::GREET => Ok(InboundEvent::Greet(data_of::<GreetData>(event)?)),
        types::PROCESSOR_REQUEST => {
            let data: ProcessorRequestData = data_of(event)?;
            Ok(InboundEvent::Request(InboundRequest {
                request_id: data.request_id,
                kind: HandlerKind::Processor,
                handler_name: data.processor_name,
                handler_version: data.processor_version,
                model: ModelKey::new(data.model_name, data.model_version),
                payload: data.payload,
                deadline_millis: data.deadline_millis,
            }))
        }
        types::CRITERIA_REQUEST => {
            let data: CriteriaRequestData = data_of(event)?;
            Ok(InboundEvent::Request(InboundRequest {
                request_id: data.request_id,
                kind: HandlerKind::Criterion,
                handler_name: data.criterion_name,
                handler_version: data.criterion_version,
                model: ModelKey::new(data.model_name, data.model_version),
                payload: data.payload,
                deadline_millis: data.deadline_millis,
            }))
        }
        types::KEEP_ALIVE => Ok(InboundEvent::KeepAlive(data_of(event)?)),
        types::KEEP_ALIVE_ACK => Ok(InboundEvent::KeepAliveAck(data_of(event)?)),
        other => Ok(InboundEvent::Unknown {
            event_type: other.to_string(),
        }),
    }
}

fn envelope(source: &str, event_type: &str, data: String) -> CloudEvent {
    CloudEvent {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        spec_version: SPEC_VERSION.to_string(),
        r#type: event_type.to_string(),
        data: Some(cloud_event::Data::TextData(data)),
    }
}

fn json_of<T: Serialize>(event_type: &str, data: &T) -> Result<String, WireError> {
    serde_json::to_string(data)
        .map_err(|e| WireError::Encode(format!("{event_type} payload: {e}")))
}

/// Encode an outbound frame into its envelope.
pub fn encode_event(source: &str, frame: OutboundFrame) -> Result<CloudEvent, WireError> {
    match frame {
        OutboundFrame::Join(join) => {
            let data = JoinData {
                process_id: join.process_id,
                handlers: join.handlers,
                schema_version: join.schema_version,
            };
            Ok(envelope(source, types::JOIN, json_of(types::JOIN, &data)?))
        }
        OutboundFrame::Response(response) => encode_response(source, response),
        OutboundFrame::KeepAlive { timestamp_millis } => {
            let data = KeepAliveData {
                timestamp: timestamp_millis,
            };
            Ok(envelope(
                source,
                types::KEEP_ALIVE,
                json_of(types::KEEP_ALIVE, &data)?,
            ))
        }
        OutboundFrame::KeepAliveAck { timestamp_millis } => {
            let data = KeepAliveData {
                timestamp: timestamp_millis,
            };
            Ok(envelope(
                source,
                types::KEEP_ALIVE_ACK,
                json_of(types::KEEP_ALIVE_ACK, &data)?,
            ))
        }
        OutboundFrame::ReAuth { token } => {
            let data = ReAuthData { token };
            Ok(envelope(
                source,
                types::RE_AUTH,
                json_of(types::RE_AUTH, &data)?,
            ))
        }
    }
}

fn encode_response(source: &str, response: ResponseFrame) -> Result<CloudEvent, WireError> {
    match response.kind {
        HandlerKind::Processor => {
            let data = match response.outcome {
                Outcome::Entity(payload) => ProcessorResponseData {
                    request_id: response.request_id,
                    success: true,
                    payload: Some(payload),
                    error_kind: None,
                    error_message: None,
                },
                Outcome::Matches(_) => {
                    return Err(WireError::Encode(
                        "criterion outcome on a processor response".into(),
                    ))
                }
                Outcome::Error { kind, message } => ProcessorResponseData {
                    request_id: response.request_id,
                    success: false,
                    payload: None,
                    error_kind: Some(kind),
                    error_message: Some(message),
                },
            };
            Ok(envelope(
                source,
                types::PROCESSOR_RESPONSE,
                json_of(types::PROCESSOR_RESPONSE, &data)?,
            ))
        }
        HandlerKind::Criterion => {
            let data = match response.outcome {
                Outcome::Matches(matches) => CriteriaResponseData {
                    request_id: response.request_id,
                    success: true,
                    matches: Some(matches),
                    error_kind: None,
                    error_message: None,
                },
                Outcome::Entity(_) => {
                    return Err(WireError::Encode(
                        "processor outcome on a criterion response".into(),
                    ))
                }
                Outcome::Error { kind, message } => CriteriaResponseData {
                    request_id: response.request_id,
                    success: false,
                    matches: None,
                    error_kind: Some(kind),
                    error_message: Some(message),
                },
            };
            Ok(envelope(
                source,
                types::CRITERIA_RESPONSE,
                json_of(types::CRITERIA_RESPONSE, &data)?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spoke_core::frame::JoinFrame;

    fn inbound(event_type: &str, data: Value) -> CloudEvent {
        CloudEvent {
            id: "e-1".into(),
            source: "platform".into(),
            spec_version: SPEC_VERSION.into(),
            r#type: event_type.into(),
            data: Some(cloud_event::Data::TextData(data.to_string())),
        }
    }

    #[test]
    fn processor_request_decodes_with_wire_names() {
        let event = inbound(
            types::PROCESSOR_REQUEST,
            json!({
                "requestId": "r1",
                "processorName": "TagAdder",
                "modelName": "Item",
                "modelVersion": 1,
                "payload": {"name": "a"},
                "deadlineMillis": 200,
            }),
        );
        match decode_event(&event).unwrap() {
            InboundEvent::Request(request) => {
                assert_eq!(request.request_id, "r1");
                assert_eq!(request.kind, HandlerKind::Processor);
                assert_eq!(request.handler_name, "TagAdder");
                assert_eq!(request.handler_version, None);
                assert_eq!(request.model, ModelKey::new("Item", 1));
                assert_eq!(request.deadline_millis, Some(200));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn criteria_request_decodes() {
        let event = inbound(
            types::CRITERIA_REQUEST,
            json!({
                "requestId": "r2",
                "criterionName": "IsHeavy",
                "criterionVersion": 2,
                "modelName": "Item",
                "modelVersion": 1,
                "payload": {"weight": 3},
            }),
        );
        match decode_event(&event).unwrap() {
            InboundEvent::Request(request) => {
                assert_eq!(request.kind, HandlerKind::Criterion);
                assert_eq!(request.handler_version, Some(2));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_tolerated() {
        let event = inbound("SomethingNew", json!({}));
        match decode_event(&event).unwrap() {
            InboundEvent::Unknown { event_type } => assert_eq!(event_type, "SomethingNew"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn known_type_with_bad_payload_is_an_error() {
        let event = inbound(types::GREET, json!({"nope": true}));
        assert!(decode_event(&event).is_err());
    }

    #[test]
    fn join_encodes_camel_case() {
        let event = encode_event(
            "spoke/p-1",
            OutboundFrame::Join(JoinFrame {
                process_id: "p-1".into(),
                handlers: vec![],
                schema_version: SCHEMA_VERSION,
            }),
        )
        .unwrap();
        assert_eq!(event.r#type, types::JOIN);
        assert_eq!(event.spec_version, SPEC_VERSION);
        assert_eq!(event.source, "spoke/p-1");
        assert!(!event.id.is_empty());
        let data: Value = serde_json::from_str(&event.text_data().unwrap()).unwrap();
        assert_eq!(data["processId"], "p-1");
        assert_eq!(data["schemaVersion"], 1);
        assert!(data["handlers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn successful_processor_response_encodes() {
        let event = encode_event(
            "spoke/p-1",
            OutboundFrame::Response(ResponseFrame {
                request_id: "r1".into(),
                kind: HandlerKind::Processor,
                outcome: Outcome::Entity(json!({"name": "a"})),
            }),
        )
        .unwrap();
        assert_eq!(event.r#type, types::PROCESSOR_RESPONSE);
        let data: Value = serde_json::from_str(&event.text_data().unwrap()).unwrap();
        assert_eq!(data["requestId"], "r1");
        assert_eq!(data["success"], true);
        assert_eq!(data["payload"]["name"], "a");
        assert!(data.get("errorKind").is_none());
    }

    #[test]
    fn failed_criterion_response_carries_error_kind() {
        let event = encode_event(
            "spoke/p-1",
            OutboundFrame::Response(ResponseFrame::error(
                "r2",
                HandlerKind::Criterion,
                ErrorKind::Timeout,
                "deadline exceeded",
            )),
        )
        .unwrap();
        assert_eq!(event.r#type, types::CRITERIA_RESPONSE);
        let data: Value = serde_json::from_str(&event.text_data().unwrap()).unwrap();
        assert_eq!(data["success"], false);
        assert_eq!(data["errorKind"], "Timeout");
        assert_eq!(data["errorMessage"], "deadline exceeded");
        assert!(data.get("matches").is_none());
    }

    #[test]
    fn every_frame_gets_a_fresh_id() {
        let frame = || OutboundFrame::KeepAlive {
            timestamp_millis: 7,
        };
        let a = encode_event("s", frame()).unwrap();
        let b = encode_event("s", frame()).unwrap();
        assert_ne!(a.id, b.id);
    }
}
