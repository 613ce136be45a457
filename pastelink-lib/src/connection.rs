mod binder;
mod failure;
mod negotiation;

use std::{
    convert::Infallible,
    future::Future,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    select, spawn,
    sync::{mpsc, watch},
};
use tracing::{debug, info, trace};

use crate::{
    broadcast::{Broadcast, Subscription},
    error::{ConnectionError, ErrorKind, Warning},
    transport::{
        DataChannel, EventReceiver, EventSender, GatheringState, IceTransportState,
        MessagePayload, MessageTransportState, PeerConnectionState, Transport, TransportConfig,
        TransportEvent, TransportFactory,
    },
};

/// Furthest milestone the connection has reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum State {
    Offline,
    CanOffer,
    Connecting,
    Ready,
    Connected,
}

pub type StatusSubscription = Subscription<State, ConnectionError>;
pub type MessageSubscription = Subscription<MessagePayload, Infallible>;

struct Inner {
    state: State,
    channel: Option<Arc<dyn DataChannel>>,
    channel_requested: bool,
    channel_open: bool,
    max_message_size: Option<usize>,
    warnings: Vec<Warning>,
    failure: Option<ConnectionError>,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    status: Broadcast<State, ConnectionError>,
    message: Broadcast<MessagePayload, Infallible>,
    transport: Option<Arc<dyn Transport>>,
    events: EventSender,
    remote_offer_accepted: watch::Sender<bool>,
}

/// A single peer-to-peer data connection negotiated out-of-band.
///
/// Every transport notification is handled by one control loop in arrival
/// order. Progress is published on [`Connection::status`], inbound payloads on
/// [`Connection::message`]. Dropping the connection closes it.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        trace!("drop connection");
        self.shared.close();
    }
}

impl Connection {
    /// Creates the transport with `ice_servers` as one server entry.
    ///
    /// A transport that cannot be created leaves the connection closed with a
    /// construction failure on its status stream.
    pub async fn new<F>(ice_servers: Vec<String>, factory: &F) -> Self
    where
        F: TransportFactory + ?Sized,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let result = factory
            .create(TransportConfig::from_urls(ice_servers), events_tx.clone())
            .await;
        let (transport, construction_error) = match result {
            Ok(transport) => (Some(transport), None),
            Err(err) => (None, Some(err)),
        };
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: State::Offline,
                channel: None,
                channel_requested: false,
                channel_open: false,
                max_message_size: None,
                warnings: Vec::new(),
                failure: None,
                closed: false,
            }),
            status: Broadcast::new(),
            message: Broadcast::new(),
            transport,
            events: events_tx,
            remote_offer_accepted: watch::channel(false).0,
        });
        if let Some(err) = construction_error {
            shared.fail(
                ErrorKind::Construction,
                "failed to configure transport",
                Some(err),
            );
            return Self { shared };
        }
        let terminated = shared.status.first(|_| false);
        spawn(run(Arc::downgrade(&shared), events_rx, terminated));
        Self { shared }
    }

    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.shared.inner.lock().warnings.clone()
    }

    /// Maximum message size advertised by the transport, known once the
    /// connection is ready.
    pub fn max_message_size(&self) -> Option<usize> {
        self.shared.inner.lock().max_message_size
    }

    pub fn status(&self) -> StatusSubscription {
        self.shared.status.subscribe()
    }

    pub fn message(&self) -> MessageSubscription {
        self.shared.message.subscribe()
    }

    pub fn send(&self, payload: impl Into<MessagePayload>) -> Result<(), ConnectionError> {
        self.shared.send(payload.into())
    }

    pub fn close(&self) {
        self.shared.close();
    }
}

async fn run(
    shared: Weak<Shared>,
    mut events: EventReceiver,
    terminated: impl Future<Output = Result<Option<State>, ConnectionError>>,
) {
    tokio::pin!(terminated);
    loop {
        let event = select! {
            event = events.recv() => event,
            _ = &mut terminated => None,
        };
        let Some(event) = event else {
            break;
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        trace!("transport event {:?}", event);
        shared.handle(event);
    }
    trace!("event loop finished");
}

impl Shared {
    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::IceGatheringStateChange(state) => self.on_gathering_state(state),
            TransportEvent::NegotiationNeeded => self.on_negotiation_needed(),
            TransportEvent::DataChannel(channel) => self.bind_channel(channel),
            TransportEvent::IceCandidateError {
                url,
                error_code,
                error_text,
            } => self.warn(format!(
                "ICE candidate error {} on {}: {}",
                error_code, url, error_text
            )),
            TransportEvent::PeerConnectionStateChange(state) => {
                self.on_peer_connection_state(state)
            }
            TransportEvent::MessageTransportError(err) => {
                self.fail(ErrorKind::Transport, "message transport error", Some(err));
            }
            TransportEvent::IceTransportStateChange(state) => self.on_ice_transport_state(state),
            TransportEvent::ChannelOpen => self.on_channel_open(),
            TransportEvent::ChannelMessage(payload) => self.on_channel_message(payload),
            TransportEvent::ChannelError(err) => {
                self.fail(ErrorKind::Transport, "data channel error", Some(err));
            }
            TransportEvent::ChannelClose => {
                debug!("data channel closed");
                self.close();
            }
        }
    }

    /// Must be called with `inner` locked so that gate waiters observe the
    /// state and the stream consistently.
    fn transition(&self, inner: &mut Inner, to: State) {
        debug!("state {:?} -> {:?}", inner.state, to);
        inner.state = to;
        self.status.publish(to);
    }

    fn on_negotiation_needed(&self) {
        let state = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if inner.state == State::Offline {
                self.transition(&mut inner, State::CanOffer);
                return;
            }
            inner.state
        };
        match state {
            State::Ready | State::Connected => {
                self.fail(
                    ErrorKind::ProtocolViolation,
                    "renegotiation is not supported",
                    None,
                );
            }
            _ => self.warn(format!("unexpected negotiation request while {:?}", state)),
        }
    }

    fn on_gathering_state(&self, gathering: GatheringState) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        match gathering {
            GatheringState::New => trace!("gathering new"),
            GatheringState::Gathering => {
                if inner.state <= State::CanOffer {
                    self.transition(&mut inner, State::Connecting);
                } else {
                    let state = inner.state;
                    drop(inner);
                    self.warn(format!("gathering restarted while {:?}", state));
                }
            }
            GatheringState::Complete => {
                if inner.state != State::Connecting {
                    let state = inner.state;
                    drop(inner);
                    self.warn(format!("gathering completed while {:?}", state));
                    return;
                }
                let info = self.transport.as_ref().and_then(|t| t.message_transport());
                match info {
                    Some(info) if info.state != MessageTransportState::Closed => {
                        inner.max_message_size = Some(info.max_message_size);
                        self.transition(&mut inner, State::Ready);
                        info!("all candidates gathered");
                        if inner.channel_open {
                            self.transition(&mut inner, State::Connected);
                        }
                    }
                    Some(_) => {
                        drop(inner);
                        self.fail(
                            ErrorKind::Transport,
                            "message transport closed after gathering",
                            None,
                        );
                    }
                    None => {
                        drop(inner);
                        self.fail(
                            ErrorKind::Transport,
                            "message transport missing after gathering",
                            None,
                        );
                    }
                }
            }
        }
    }

    fn on_peer_connection_state(&self, state: PeerConnectionState) {
        debug!("on_peer_connection_state_change {:?}", state);
        match state {
            PeerConnectionState::New
            | PeerConnectionState::Connecting
            | PeerConnectionState::Connected => {}
            PeerConnectionState::Disconnected | PeerConnectionState::Failed => {
                self.warn(format!("peer connection {:?}", state));
            }
            PeerConnectionState::Closed => self.close(),
        }
    }

    fn on_ice_transport_state(&self, state: IceTransportState) {
        if state == IceTransportState::Failed {
            self.fail(ErrorKind::Transport, "ICE transport failed", None);
        } else {
            trace!("ice transport {:?}", state);
        }
    }

    fn send(&self, payload: MessagePayload) -> Result<(), ConnectionError> {
        let (channel, max_message_size) = {
            let inner = self.inner.lock();
            if inner.state != State::Connected {
                return Err(ConnectionError::new(
                    ErrorKind::ProtocolViolation,
                    format!("cannot send while {:?}", inner.state),
                ));
            }
            (inner.channel.clone(), inner.max_message_size.unwrap_or(0))
        };
        let channel = channel.ok_or_else(|| {
            ConnectionError::new(ErrorKind::ProtocolViolation, "no data channel is bound")
        })?;
        if !payload.is_in_bounds() {
            return Err(ConnectionError::new(
                ErrorKind::ProtocolViolation,
                "view range is outside of its buffer",
            ));
        }
        let size = payload.size();
        if size == 0 || size > max_message_size {
            return Err(ConnectionError::new(
                ErrorKind::ProtocolViolation,
                format!("payload size {} is outside 1..={}", size, max_message_size),
            )
            .with_context("size", size)
            .with_context("max_message_size", max_message_size));
        }
        channel.send(payload).map_err(|err| {
            ConnectionError::new(ErrorKind::Transport, "data channel rejected the payload")
                .with_cause(err)
        })
    }

    /// Idempotent. Ends both streams and tears down the channel and the
    /// transport.
    fn close(&self) {
        let channel = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.channel_open = false;
            inner.state = State::Offline;
            inner.channel.clone()
        };
        self.status.cancel();
        self.message.cancel();
        if let Some(channel) = channel {
            channel.close();
        }
        if let Some(transport) = &self.transport {
            transport.close();
        }
        info!("connection closed");
    }
}
