//! The seam between the session and the actual network.
//!
//! A transport turns a bearer token and an outbound event stream into an
//! inbound event stream. Production uses [`GrpcEventTransport`]; tests use
//! the in-memory platform from `spoke-test`. The session owns everything
//! above this line — handshake, keepalive, dispatch — so swapping the
//! transport swaps only the wire.

use std::pin::Pin;

use futures_core::future::BoxFuture;
use futures_core::Stream;
use futures_util::StreamExt;
use tonic::metadata::MetadataValue;
use tonic::transport::Endpoint;
use tonic::Request;

use crate::client::EventStreamClient;
use crate::error::TransportError;
use crate::proto::CloudEvent;

/// Client → server event stream.
pub type OutboundEvents = Pin<Box<dyn Stream<Item = CloudEvent> + Send>>;

/// Server → client event stream.
pub type InboundEvents = Pin<Box<dyn Stream<Item = Result<CloudEvent, TransportError>> + Send>>;

/// Opens one bidirectional event stream per call.
pub trait EventTransport: Send + Sync + 'static {
    /// Connect with the given bearer token, handing the transport the
    /// outbound half and receiving the inbound half.
    fn connect<'a>(
        &'a self,
        bearer: &'a str,
        outbound: OutboundEvents,
    ) -> BoxFuture<'a, Result<InboundEvents, TransportError>>;
}

/// Production transport: tonic channel + bearer metadata.
pub struct GrpcEventTransport {
    endpoint: Endpoint,
}

impl GrpcEventTransport {
    /// `endpoint` is `host:port` or a full URL; a bare authority gets an
    /// `http://` scheme.
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let uri = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let endpoint = Endpoint::from_shared(uri).map_err(|e| {
            TransportError::Config(format!("invalid gRPC endpoint '{endpoint}': {e}"))
        })?;
        Ok(Self { endpoint })
    }
}

impl EventTransport for GrpcEventTransport {
    fn connect<'a>(
        &'a self,
        bearer: &'a str,
        outbound: OutboundEvents,
    ) -> BoxFuture<'a, Result<InboundEvents, TransportError>> {
        Box::pin(async move {
            let channel = self
                .endpoint
                .connect()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let mut client = EventStreamClient::new(channel);

            let mut request = Request::new(outbound);
            let header = MetadataValue::try_from(format!("Bearer {bearer}"))
                .map_err(|e| TransportError::Config(format!("invalid bearer token: {e}")))?;
            request.metadata_mut().insert("authorization", header);

            let inbound = client.connect(request).await?.into_inner();
            tracing::debug!(uri = %self.endpoint.uri(), "Event stream opened");
            Ok(inbound
                .map(|item| item.map_err(TransportError::from))
                .boxed() as InboundEvents)
        })
    }
}

impl std::fmt::Debug for GrpcEventTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcEventTransport")
            .field("endpoint", &self.endpoint.uri())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_authority_gets_a_scheme() {
        let transport = GrpcEventTransport::new("platform.example:8080").unwrap();
        assert_eq!(
            transport.endpoint.uri().to_string(),
            "http://platform.example:8080/"
        );
    }

    #[test]
    fn full_url_is_kept() {
        let transport = GrpcEventTransport::new("https://platform.example:443").unwrap();
        assert_eq!(transport.endpoint.uri().scheme_str(), Some("https"));
    }

    #[test]
    fn garbage_endpoint_is_rejected() {
        assert!(GrpcEventTransport::new("not a uri").is_err());
    }
}
