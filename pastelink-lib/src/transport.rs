//! The contract between a [`Connection`](crate::connection::Connection) and the
//! engine that actually negotiates and carries the connection.
//!
//! Implementations push every asynchronous notification into the
//! [`EventSender`] they are given; the connection consumes them one at a time.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

impl TransportConfig {
    /// Wraps an ordered URL list into a single server entry.
    pub fn from_urls(urls: Vec<String>) -> Self {
        Self {
            ice_servers: vec![IceServer { urls }],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Pranswer => "pranswer",
            Self::Answer => "answer",
            Self::Rollback => "rollback",
        })
    }
}

/// An offer or answer, produced and consumed by the transport unmodified.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub mime_type: String,
    pub data: Bytes,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    Binary(Bytes),
    /// `len` bytes of `buffer` starting at `offset`.
    View {
        buffer: Bytes,
        offset: usize,
        len: usize,
    },
    Blob(Blob),
}

impl MessagePayload {
    /// Characters for text, bytes for buffers and views, declared size for
    /// blobs.
    pub fn size(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Binary(bytes) => bytes.len(),
            Self::View { len, .. } => *len,
            Self::Blob(blob) => blob.size(),
        }
    }

    /// `false` for a view whose range does not fit inside its buffer.
    pub fn is_in_bounds(&self) -> bool {
        match self {
            Self::View {
                buffer,
                offset,
                len,
            } => offset
                .checked_add(*len)
                .map_or(false, |end| end <= buffer.len()),
            _ => true,
        }
    }

    /// Collapses every binary form into `Binary`. Views that fall outside of
    /// their buffer are clamped to it.
    pub fn normalize(self) -> Self {
        match self {
            Self::Text(_) | Self::Binary(_) => self,
            Self::View {
                buffer,
                offset,
                len,
            } => {
                let start = offset.min(buffer.len());
                let end = start.saturating_add(len).min(buffer.len());
                Self::Binary(buffer.slice(start..end))
            }
            Self::Blob(blob) => Self::Binary(blob.data),
        }
    }
}

impl From<&str> for MessagePayload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MessagePayload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for MessagePayload {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for MessagePayload {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value.into())
    }
}

impl From<Blob> for MessagePayload {
    fn from(value: Blob) -> Self {
        Self::Blob(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IceTransportState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageTransportState {
    Connecting,
    Connected,
    Closed,
}

/// The message transport (SCTP) as seen once gathering has completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageTransportInfo {
    pub max_message_size: usize,
    pub state: MessageTransportState,
}

pub enum TransportEvent {
    IceGatheringStateChange(GatheringState),
    NegotiationNeeded,
    DataChannel(Arc<dyn DataChannel>),
    IceCandidateError {
        url: String,
        error_code: u16,
        error_text: String,
    },
    PeerConnectionStateChange(PeerConnectionState),
    MessageTransportError(TransportError),
    IceTransportStateChange(IceTransportState),
    ChannelOpen,
    ChannelMessage(MessagePayload),
    ChannelError(TransportError),
    ChannelClose,
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IceGatheringStateChange(state) => {
                f.debug_tuple("IceGatheringStateChange").field(state).finish()
            }
            Self::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            Self::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            Self::IceCandidateError {
                url,
                error_code,
                error_text,
            } => f
                .debug_struct("IceCandidateError")
                .field("url", url)
                .field("error_code", error_code)
                .field("error_text", error_text)
                .finish(),
            Self::PeerConnectionStateChange(state) => {
                f.debug_tuple("PeerConnectionStateChange").field(state).finish()
            }
            Self::MessageTransportError(err) => {
                f.debug_tuple("MessageTransportError").field(err).finish()
            }
            Self::IceTransportStateChange(state) => {
                f.debug_tuple("IceTransportStateChange").field(state).finish()
            }
            Self::ChannelOpen => f.write_str("ChannelOpen"),
            Self::ChannelMessage(payload) => f
                .debug_tuple("ChannelMessage")
                .field(&payload.size())
                .finish(),
            Self::ChannelError(err) => f.debug_tuple("ChannelError").field(err).finish(),
            Self::ChannelClose => f.write_str("ChannelClose"),
        }
    }
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        config: TransportConfig,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;
    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError>;
    fn message_transport(&self) -> Option<MessageTransportInfo>;
    /// Idempotent. Teardown may finish in the background.
    fn close(&self);
}

pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    /// Routes the channel's open/message/error/close notifications into
    /// `events`.
    fn attach(&self, events: EventSender);
    /// Queues `payload` for delivery.
    fn send(&self, payload: MessagePayload) -> Result<(), TransportError>;
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_size_by_kind() {
        assert_eq!(MessagePayload::from("héllo").size(), 5);
        assert_eq!(MessagePayload::from(vec![0u8; 7]).size(), 7);
        let view = MessagePayload::View {
            buffer: Bytes::from_static(b"0123456789"),
            offset: 2,
            len: 3,
        };
        assert_eq!(view.size(), 3);
        assert_eq!(view.normalize(), MessagePayload::Binary(Bytes::from_static(b"234")));
        let blob = MessagePayload::from(Blob::new("image/png", vec![1u8, 2, 3, 4]));
        assert_eq!(blob.size(), 4);
        assert_eq!(blob.normalize(), MessagePayload::Binary(Bytes::from_static(&[1, 2, 3, 4])));
    }

    #[test]
    fn session_description_uses_the_browser_json_shape() {
        let desc = SessionDescription::offer("v=0");
        let json = serde_json::to_string(&desc).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);
        assert_eq!(serde_json::from_str::<SessionDescription>(&json).unwrap(), desc);
    }

    #[test]
    fn ice_urls_become_one_server_entry() {
        let config = TransportConfig::from_urls(vec![
            "stun:a.example.org".to_owned(),
            "stun:b.example.org".to_owned(),
        ]);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls[1], "stun:b.example.org");
    }
}
