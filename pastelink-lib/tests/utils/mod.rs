#![allow(dead_code)]

pub mod fake_transport;

use std::{sync::Arc, time::Duration};

use pastelink_lib::{
    connection::StatusSubscription,
    transport::{GatheringState, TransportEvent},
    Connection, ConnectionError, State,
};
use tokio::time::sleep;

pub use fake_transport::*;

pub const STUN: &str = "stun:example.org";

/// Lets the connection's event loop drain everything queued so far.
pub async fn settle() {
    sleep(Duration::from_millis(20)).await;
}

/// Values queued on `status` right now. Stops at the first terminal event.
pub fn drain_states(status: &mut StatusSubscription) -> Vec<State> {
    let mut states = Vec::new();
    while let Some(Ok(state)) = status.try_next() {
        states.push(state);
    }
    states
}

pub async fn next_failure(status: &mut StatusSubscription) -> Option<ConnectionError> {
    loop {
        match status.next().await? {
            Ok(_) => continue,
            Err(err) => return Some(err),
        }
    }
}

pub fn gather(transport: &FakeTransport) {
    for state in [
        GatheringState::New,
        GatheringState::Gathering,
        GatheringState::Complete,
    ] {
        transport.emit(TransportEvent::IceGatheringStateChange(state));
    }
}

pub async fn new_connection() -> (Connection, Arc<FakeTransport>) {
    let (factory, transport) = FakeTransport::factory();
    let conn = Connection::new(vec![STUN.to_owned()], &factory).await;
    (conn, transport)
}

/// Runs the offering side up to `Connected`.
pub async fn connected_offerer() -> (Connection, Arc<FakeTransport>, Arc<FakeDataChannel>) {
    let (conn, transport) = new_connection().await;
    let driver = async {
        settle().await;
        gather(&transport);
        settle().await;
    };
    let (offer, ()) = tokio::join!(conn.create_offer(), driver);
    offer.expect("offer");
    let channel = transport.channels()[0].clone();
    channel.open();
    settle().await;
    assert_eq!(conn.state(), State::Connected);
    (conn, transport, channel)
}
