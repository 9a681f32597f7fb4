//! # spoke-data — the platform's entity store, as seen by handlers
//!
//! Processors frequently need to read or write entities other than the one
//! they were invoked on. Those operations go over the platform's REST
//! surface (namespaced under `/api/<model>`), not the gRPC stream.
//! [`EntityService`] is the concrete client behind the
//! [`EntityApi`](spoke_core::EntityApi) seam that handler contexts expose.
//!
//! The service shares the runtime's [`TokenProvider`](spoke_auth::TokenProvider)
//! so REST calls and the stream always present the same identity.

mod service;

pub use service::EntityService;
