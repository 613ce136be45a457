use std::sync::Arc;

use tokio::{spawn, sync::mpsc};
use tracing::{trace, warn};
use webrtc::data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel};

use crate::{
    error::TransportError,
    transport::{DataChannel, EventSender, MessagePayload, TransportEvent},
};

use super::spawn_teardown;

pub struct RtcDataChannel {
    rtc: Arc<RTCDataChannel>,
    outgoing_tx: mpsc::UnboundedSender<MessagePayload>,
}

impl RtcDataChannel {
    pub fn new(rtc: Arc<RTCDataChannel>) -> Arc<Self> {
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<MessagePayload>();
        {
            // NOTE: `send` must not block the caller, so outgoing payloads are
            //       queued here and written by a task.
            let rtc = rtc.clone();
            spawn(async move {
                while let Some(payload) = outgoing_rx.recv().await {
                    let result = match payload.normalize() {
                        MessagePayload::Text(text) => rtc.send_text(text).await,
                        MessagePayload::Binary(data) => rtc.send(&data).await,
                        MessagePayload::View { .. } | MessagePayload::Blob(_) => continue,
                    };
                    if let Err(webrtc::Error::ErrClosedPipe) = result {
                        return;
                    } else if let Err(err) = result {
                        warn!("send failed: {}", err);
                    }
                }
                trace!("data channel sender finished");
            });
        }
        Arc::new(Self { rtc, outgoing_tx })
    }
}

fn to_payload(msg: DataChannelMessage) -> MessagePayload {
    if msg.is_string {
        MessagePayload::Text(String::from_utf8_lossy(&msg.data).into_owned())
    } else {
        MessagePayload::Binary(msg.data)
    }
}

impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.rtc.label().to_owned()
    }

    fn attach(&self, events: EventSender) {
        {
            let events = events.clone();
            self.rtc.on_open(Box::new(move || {
                let _ = events.send(TransportEvent::ChannelOpen);
                Box::pin(async {})
            }));
        }
        {
            let events = events.clone();
            self.rtc.on_message(Box::new(move |msg| {
                let _ = events.send(TransportEvent::ChannelMessage(to_payload(msg)));
                Box::pin(async {})
            }));
        }
        {
            let events = events.clone();
            self.rtc.on_error(Box::new(move |err| {
                let _ = events.send(TransportEvent::ChannelError(err.into()));
                Box::pin(async {})
            }));
        }
        self.rtc.on_close(Box::new(move || {
            let _ = events.send(TransportEvent::ChannelClose);
            Box::pin(async {})
        }));
    }

    fn send(&self, payload: MessagePayload) -> Result<(), TransportError> {
        self.outgoing_tx
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let rtc = self.rtc.clone();
        spawn_teardown(async move {
            if let Err(err) = rtc.close().await {
                warn!("failed to close data channel: {}", err);
            }
        });
    }
}
