use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use derive_new::new;
use tracing::{debug, trace, warn};
use webrtc::{
    api::{media_engine::MediaEngine, setting_engine::SettingEngine, APIBuilder},
    data_channel::data_channel_init::RTCDataChannelInit,
    ice_transport::{
        ice_connection_state::RTCIceConnectionState, ice_gatherer_state::RTCIceGathererState,
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        RTCPeerConnection,
    },
    sctp_transport::sctp_transport_state::RTCSctpTransportState,
};

use crate::{
    error::TransportError,
    transport::{
        DataChannel, EventSender, GatheringState, IceTransportState, MessageTransportInfo,
        MessageTransportState, PeerConnectionState, SdpType, SessionDescription, Transport,
        TransportConfig, TransportEvent, TransportFactory,
    },
};

use super::{data_channel::RtcDataChannel, spawn_teardown};

const PROTOCOL: &str = "PASTELINK/1.0";
/// Used when the SCTP transport does not advertise a limit.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

fn to_rtc_config(config: TransportConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn to_rtc_desc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    Ok(match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(TransportError::InvalidDescription(
                "rollback is not supported".to_owned(),
            ))
        }
    })
}

fn from_rtc_desc(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::InvalidDescription(
                "unspecified description type".to_owned(),
            ))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn to_gathering_state(state: RTCIceGathererState) -> Option<GatheringState> {
    match state {
        RTCIceGathererState::New => Some(GatheringState::New),
        RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
        RTCIceGathererState::Complete => Some(GatheringState::Complete),
        RTCIceGathererState::Unspecified | RTCIceGathererState::Closed => None,
    }
}

fn to_peer_connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_ice_transport_state(state: RTCIceConnectionState) -> Option<IceTransportState> {
    match state {
        RTCIceConnectionState::New => Some(IceTransportState::New),
        RTCIceConnectionState::Checking => Some(IceTransportState::Checking),
        RTCIceConnectionState::Connected => Some(IceTransportState::Connected),
        RTCIceConnectionState::Completed => Some(IceTransportState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceTransportState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceTransportState::Failed),
        RTCIceConnectionState::Closed => Some(IceTransportState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

/// Builds `RTCPeerConnection`s.
#[derive(Clone, Debug, new)]
pub struct RtcTransportFactory {
    /// How long ICE keeps trying before reporting a permanent failure.
    ice_failed_timeout: Duration,
}

impl Default for RtcTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(20 * 60))
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        config: TransportConfig,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_timeouts(None, Some(self.ice_failed_timeout), None);
        let rtc = APIBuilder::new()
            .with_interceptor_registry(Registry::new())
            .with_media_engine(MediaEngine::default())
            .with_setting_engine(setting_engine)
            .build()
            .new_peer_connection(to_rtc_config(config))
            .await?;
        Ok(Arc::new(RtcTransport::new(rtc, events)))
    }
}

pub struct RtcTransport {
    rtc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl Drop for RtcTransport {
    fn drop(&mut self) {
        trace!("drop transport");
        self.close();
    }
}

impl RtcTransport {
    fn new(rtc: RTCPeerConnection, events: EventSender) -> Self {
        {
            let events = events.clone();
            rtc.on_ice_gathering_state_change(Box::new(move |state| {
                debug!("on_ice_gathering_state_change {}", state);
                if let Some(state) = to_gathering_state(state) {
                    let _ = events.send(TransportEvent::IceGatheringStateChange(state));
                }
                Box::pin(async {})
            }));
        }
        {
            let events = events.clone();
            rtc.on_negotiation_needed(Box::new(move || {
                let _ = events.send(TransportEvent::NegotiationNeeded);
                Box::pin(async {})
            }));
        }
        {
            let events = events.clone();
            rtc.on_data_channel(Box::new(move |rtc_data_channel| {
                let channel: Arc<dyn DataChannel> = RtcDataChannel::new(rtc_data_channel);
                let _ = events.send(TransportEvent::DataChannel(channel));
                Box::pin(async {})
            }));
        }
        {
            let events = events.clone();
            rtc.on_peer_connection_state_change(Box::new(move |state| {
                if let Some(state) = to_peer_connection_state(state) {
                    let _ = events.send(TransportEvent::PeerConnectionStateChange(state));
                }
                Box::pin(async {})
            }));
        }
        {
            let events = events.clone();
            rtc.on_ice_connection_state_change(Box::new(move |state| {
                if let Some(state) = to_ice_transport_state(state) {
                    let _ = events.send(TransportEvent::IceTransportStateChange(state));
                }
                Box::pin(async {})
            }));
        }
        rtc.sctp().on_error(Box::new(move |err| {
            let _ = events.send(TransportEvent::MessageTransportError(err.into()));
            Box::pin(async {})
        }));

        Self {
            rtc: Arc::new(rtc),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        from_rtc_desc(self.rtc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        from_rtc_desc(self.rtc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        Ok(self.rtc.set_local_description(to_rtc_desc(desc)?).await?)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        Ok(self.rtc.set_remote_description(to_rtc_desc(desc)?).await?)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.rtc.local_description().await?;
        from_rtc_desc(desc).ok()
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let rtc_data_channel = self
            .rtc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    protocol: Some(PROTOCOL.to_owned()),
                    ..Default::default()
                }),
            )
            .await?;
        Ok(RtcDataChannel::new(rtc_data_channel))
    }

    fn message_transport(&self) -> Option<MessageTransportInfo> {
        let sctp = self.rtc.sctp();
        let state = match sctp.state() {
            RTCSctpTransportState::Connected => MessageTransportState::Connected,
            RTCSctpTransportState::Closed => MessageTransportState::Closed,
            RTCSctpTransportState::Unspecified | RTCSctpTransportState::Connecting => {
                MessageTransportState::Connecting
            }
        };
        let max_message_size = match sctp.get_capabilities().max_message_size {
            0 => DEFAULT_MAX_MESSAGE_SIZE,
            size => size as usize,
        };
        Some(MessageTransportInfo {
            max_message_size,
            state,
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rtc = self.rtc.clone();
        spawn_teardown(async move {
            // NOTE: An established connection is not closed by drop, so close it explicitly.
            if let Err(err) = rtc.close().await {
                warn!("failed to close peer connection: {}", err);
            }
            trace!("peer connection closed");
        });
    }
}
