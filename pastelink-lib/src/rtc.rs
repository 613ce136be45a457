//! [`Transport`](crate::transport::Transport) backed by the `webrtc` crate.

mod data_channel;
mod peer_connection;

use std::future::Future;

use tracing::warn;

pub use self::{data_channel::RtcDataChannel, peer_connection::RtcTransportFactory};

/// Runs an async teardown from a synchronous context.
fn spawn_teardown(teardown: impl Future<Output = ()> + Send + 'static) {
    if let Ok(rt) = tokio::runtime::Handle::try_current() {
        rt.spawn(teardown);
        return;
    }
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt.block_on(teardown),
        Err(err) => warn!("failed to run teardown: {}", err),
    }
}
