pub mod broadcast;
pub mod connection;
pub mod error;
pub mod rtc;
pub mod signaling;
pub mod transport;

pub use crate::{
    connection::{Connection, State},
    error::{ConnectionError, ErrorKind, TransportError, Warning},
    transport::{MessagePayload, SessionDescription},
};
