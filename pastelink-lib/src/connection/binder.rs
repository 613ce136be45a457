use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::{
    error::ErrorKind,
    transport::{DataChannel, MessagePayload},
};

use super::{Shared, State};

impl Shared {
    /// Takes ownership of the connection's only data channel and routes its
    /// lifecycle into the event queue.
    pub(super) fn bind_channel(&self, channel: Arc<dyn DataChannel>) {
        let label = channel.label();
        {
            let mut inner = self.inner.lock();
            if inner.channel.is_none() && !inner.closed {
                inner.channel = Some(channel.clone());
                inner.channel_requested = true;
            } else if inner.channel.is_none() {
                drop(inner);
                trace!("data channel {} arrived after close", label);
                channel.close();
                return;
            } else {
                drop(inner);
                channel.close();
                self.fail(
                    ErrorKind::ProtocolViolation,
                    &format!("data channel {:?} arrived while another one is bound", label),
                    None,
                );
                return;
            }
        }
        channel.attach(self.events.clone());
        debug!("data channel {} bound", label);
    }

    pub(super) fn on_channel_open(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.channel_open {
            trace!("data channel already open");
            return;
        }
        inner.channel_open = true;
        match inner.state {
            State::Ready => {
                self.transition(&mut inner, State::Connected);
                info!("connected");
            }
            state => debug!("data channel opened while {:?}, waiting for ready", state),
        }
    }

    pub(super) fn on_channel_message(&self, payload: MessagePayload) {
        let inner = self.inner.lock();
        if inner.closed || !inner.channel_open {
            trace!("message dropped, channel is not open");
            return;
        }
        self.message.publish(payload.normalize());
    }
}
