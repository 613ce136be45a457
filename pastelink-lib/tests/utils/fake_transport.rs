use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use pastelink_lib::{
    transport::{
        DataChannel, EventSender, MessagePayload, MessageTransportInfo, MessageTransportState,
        SessionDescription, Transport, TransportConfig, TransportEvent, TransportFactory,
    },
    TransportError,
};

pub const FAKE_MAX_MESSAGE_SIZE: usize = 16;

pub struct FakeDataChannel {
    label: String,
    events: Mutex<Option<EventSender>>,
    pub sent: Mutex<Vec<MessagePayload>>,
    closed: AtomicBool,
}

impl FakeDataChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn emit(&self, event: TransportEvent) {
        let events = self.events.lock();
        let events = events.as_ref().expect("channel is not attached");
        // The queue is gone once the connection has closed.
        let _ = events.send(event);
    }

    pub fn open(&self) {
        self.emit(TransportEvent::ChannelOpen);
    }

    pub fn receive(&self, payload: impl Into<MessagePayload>) {
        self.emit(TransportEvent::ChannelMessage(payload.into()));
    }

    pub fn error(&self, text: &str) {
        self.emit(TransportEvent::ChannelError(TransportError::Other(
            text.to_owned(),
        )));
    }

    pub fn remote_close(&self) {
        self.emit(TransportEvent::ChannelClose);
    }

    pub fn is_attached(&self) -> bool {
        self.events.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn attach(&self, events: EventSender) {
        *self.events.lock() = Some(events);
    }

    fn send(&self, payload: MessagePayload) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A scriptable transport. Tests fire the notifications a real engine would.
pub struct FakeTransport {
    config: Mutex<Option<TransportConfig>>,
    events: Mutex<Option<EventSender>>,
    channels: Mutex<Vec<Arc<FakeDataChannel>>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    reject_remote: AtomicBool,
    message_transport: Mutex<Option<MessageTransportInfo>>,
    close_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(None),
            events: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            reject_remote: AtomicBool::new(false),
            message_transport: Mutex::new(Some(MessageTransportInfo {
                max_message_size: FAKE_MAX_MESSAGE_SIZE,
                state: MessageTransportState::Connecting,
            })),
            close_calls: AtomicUsize::new(0),
        })
    }

    pub fn factory() -> (FakeFactory, Arc<Self>) {
        let transport = Self::new();
        (
            FakeFactory {
                transport: Some(transport.clone()),
            },
            transport,
        )
    }

    pub fn emit(&self, event: TransportEvent) {
        let events = self.events.lock();
        let events = events.as_ref().expect("transport was not created");
        let _ = events.send(event);
    }

    pub fn config(&self) -> Option<TransportConfig> {
        self.config.lock().clone()
    }

    pub fn channels(&self) -> Vec<Arc<FakeDataChannel>> {
        self.channels.lock().clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    pub fn set_message_transport(&self, info: Option<MessageTransportInfo>) {
        *self.message_transport.lock() = info;
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0\r\ns=fake offer\r\n"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.remote.lock().is_none() {
            return Err(TransportError::Other("no remote offer".to_owned()));
        }
        Ok(SessionDescription::answer("v=0\r\ns=fake answer\r\n"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        *self.local.lock() = Some(SessionDescription {
            sdp: format!("{}a=candidate:1 1 udp 1 192.0.2.1 9 typ host\r\n", desc.sdp),
            ..desc
        });
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidDescription(
                "malformed description".to_owned(),
            ));
        }
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = FakeDataChannel::new(label);
        self.channels.lock().push(channel.clone());
        // Browsers ask for negotiation as soon as the first channel exists.
        self.emit(TransportEvent::NegotiationNeeded);
        Ok(channel)
    }

    fn message_transport(&self) -> Option<MessageTransportInfo> {
        *self.message_transport.lock()
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeFactory {
    transport: Option<Arc<FakeTransport>>,
}

impl FakeFactory {
    /// A factory whose transport cannot be configured.
    pub fn failing() -> Self {
        Self { transport: None }
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        config: TransportConfig,
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let Some(transport) = &self.transport else {
            return Err(TransportError::Other("invalid ICE server url".to_owned()));
        };
        *transport.config.lock() = Some(config);
        *transport.events.lock() = Some(events);
        Ok(transport.clone())
    }
}
