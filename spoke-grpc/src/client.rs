//! Thin tonic client for the platform's single bidirectional RPC.
//!
//! Written against tonic's low-level [`Grpc`](tonic::client::Grpc) API
//! rather than generated stubs, so the build carries no protoc step. The
//! method path and prost codec match the platform's service definition;
//! everything above this (handshake, keepalive, dispatch) speaks
//! [`CloudEvent`]s and does not care how they move.

use futures_core::Stream;
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

use crate::proto::CloudEvent;

/// Full method path of the event stream RPC.
pub const STREAM_METHOD: &str = "/spoke.v1.EventStream/Connect";

/// Client for the event stream service.
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    inner: tonic::client::Grpc<Channel>,
}

impl EventStreamClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Open the bidirectional stream. `request` carries the client→server
    /// event stream plus request metadata (the bearer token); the response
    /// is the server→client half.
    pub async fn connect<S>(
        &mut self,
        request: Request<S>,
    ) -> Result<Response<Streaming<CloudEvent>>, Status>
    where
        S: Stream<Item = CloudEvent> + Send + 'static,
    {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("channel not ready: {e}")))?;
        let codec: ProstCodec<CloudEvent, CloudEvent> = ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(STREAM_METHOD);
        self.inner.streaming(request, path, codec).await
    }
}
