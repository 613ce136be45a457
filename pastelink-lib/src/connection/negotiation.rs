use std::sync::Arc;

use tokio::select;
use tracing::{debug, info};

use crate::{
    error::{ConnectionError, ErrorKind},
    transport::{SdpType, SessionDescription, Transport},
};

use super::{Connection, Shared, State};

const CHANNEL_LABEL: &str = "data";

impl Connection {
    /// Creates the data channel if needed, then produces an offer that already
    /// contains every gathered candidate.
    pub async fn create_offer(&self) -> Result<SessionDescription, ConnectionError> {
        let shared = &self.shared;
        let transport = shared.transport()?;
        if shared.request_channel() {
            let channel = transport
                .create_data_channel(CHANNEL_LABEL)
                .await
                .map_err(|err| {
                    shared.fail(
                        ErrorKind::Negotiation,
                        "failed to create data channel",
                        Some(err),
                    )
                })?;
            shared.bind_channel(channel);
        }
        shared.reach(State::CanOffer).await?;
        let offer = transport.create_offer().await.map_err(|err| {
            shared.fail(ErrorKind::Negotiation, "failed to create offer", Some(err))
        })?;
        shared.complete_local_description(&transport, offer).await
    }

    /// Produces an answer to an accepted remote offer that already contains
    /// every gathered candidate. The data channel arrives from the remote peer.
    pub async fn create_answer(&self) -> Result<SessionDescription, ConnectionError> {
        let shared = &self.shared;
        let transport = shared.transport()?;
        shared.reach_answerable().await?;
        let answer = transport.create_answer().await.map_err(|err| {
            shared.fail(ErrorKind::Negotiation, "failed to create answer", Some(err))
        })?;
        shared.complete_local_description(&transport, answer).await
    }

    /// Installs the remote peer's description. A rejection ends the connection;
    /// it is reported on the status stream only.
    pub async fn accept_sdp(&self, remote: SessionDescription) {
        let shared = &self.shared;
        let Ok(transport) = shared.transport() else {
            debug!("remote description ignored, connection has ended");
            return;
        };
        let sdp_type = remote.sdp_type;
        if let Err(err) = transport.set_remote_description(remote).await {
            shared.fail(
                ErrorKind::Negotiation,
                "remote description rejected",
                Some(err),
            );
            return;
        }
        info!("remote {} accepted", sdp_type);
        if sdp_type == SdpType::Offer {
            shared.remote_offer_accepted.send_replace(true);
        }
    }
}

impl Shared {
    fn transport(&self) -> Result<Arc<dyn Transport>, ConnectionError> {
        if let Some(err) = self.inner.lock().terminal_error() {
            return Err(err);
        }
        self.transport.clone().ok_or_else(ConnectionError::closed)
    }

    /// Returns `true` exactly once, for the caller that must create the
    /// channel.
    fn request_channel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.channel.is_some() || inner.channel_requested {
            return false;
        }
        inner.channel_requested = true;
        true
    }

    /// Waits until the state is at least `target`.
    ///
    /// The current state is consulted first because the status stream does not
    /// replay values published before the wait started.
    async fn reach(&self, target: State) -> Result<(), ConnectionError> {
        let wait = {
            let inner = self.inner.lock();
            if let Some(err) = inner.terminal_error() {
                return Err(err);
            }
            if inner.state >= target {
                return Ok(());
            }
            self.status.first(move |state| *state >= target)
        };
        match wait.await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(self
                .inner
                .lock()
                .terminal_error()
                .unwrap_or_else(ConnectionError::closed)),
            Err(err) => Err(err),
        }
    }

    /// Answering peers are not guaranteed a negotiation request, so an
    /// accepted remote offer also opens the gate.
    async fn reach_answerable(&self) -> Result<(), ConnectionError> {
        let mut remote_offer_accepted = self.remote_offer_accepted.subscribe();
        select! {
            result = self.reach(State::CanOffer) => result,
            Ok(_) = remote_offer_accepted.wait_for(|accepted| *accepted) => {
                match self.inner.lock().terminal_error() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }

    /// Installs `desc` locally, waits for gathering to complete and returns the
    /// final local description.
    async fn complete_local_description(
        &self,
        transport: &Arc<dyn Transport>,
        desc: SessionDescription,
    ) -> Result<SessionDescription, ConnectionError> {
        transport.set_local_description(desc).await.map_err(|err| {
            self.fail(
                ErrorKind::Negotiation,
                "failed to set local description",
                Some(err),
            )
        })?;
        self.reach(State::Ready).await?;
        let local = transport.local_description().await.ok_or_else(|| {
            self.fail(
                ErrorKind::Negotiation,
                "transport has no local description",
                None,
            )
        })?;
        info!("local {} ready", local.sdp_type);
        Ok(local)
    }
}
