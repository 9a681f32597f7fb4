//! The CloudEvents v1 envelope, as carried over the platform's protobuf
//! stream.
//!
//! Maintained by hand against the platform's service definition so the
//! build carries no protoc step; field numbers follow the CloudEvents
//! protobuf format specification.

/// A single frame on the bidirectional stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloudEvent {
    /// Unique per frame.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// Identifies the emitting party.
    #[prost(string, tag = "2")]
    pub source: ::prost::alloc::string::String,
    /// CloudEvents specification version, `"1.0"`.
    #[prost(string, tag = "3")]
    pub spec_version: ::prost::alloc::string::String,
    /// Event discriminator; see [`crate::events::types`].
    #[prost(string, tag = "4")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(oneof = "cloud_event::Data", tags = "6, 7")]
    pub data: ::core::option::Option<cloud_event::Data>,
}

/// Nested message and enum types in `CloudEvent`.
pub mod cloud_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(bytes, tag = "6")]
        BinaryData(::prost::alloc::vec::Vec<u8>),
        #[prost(string, tag = "7")]
        TextData(::prost::alloc::string::String),
    }
}

impl CloudEvent {
    /// The event's data as UTF-8 text, regardless of which representation
    /// the sender chose.
    pub fn text_data(&self) -> Option<&str> {
        match &self.data {
            Some(cloud_event::Data::TextData(text)) => Some(text.as_str()),
            Some(cloud_event::Data::BinaryData(bytes)) => std::str::from_utf8(bytes).ok(),
            None => None,
        }
    }
}
