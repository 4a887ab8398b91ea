//! The cooker-facing half of the service.
//!
//! Cookers are provisioned (over BLE, out of band) to dial this server
//! instead of the vendor cloud. [`Server`] accepts the TCP sockets,
//! [`Connection`] runs the framed request/response protocol on each one,
//! [`Device`] layers the handshake, heartbeat and mirrored state on top,
//! and [`Manager`] keeps the registry of live devices and fans their
//! activity out to subscribers.

use anova_hub_common::codec::CodecError;
use anova_hub_common::commands::ParseError;
use thiserror::Error;

pub mod connection;
pub mod device;
pub mod manager;
pub mod server;

#[cfg(test)]
pub(crate) mod sim;

pub use connection::Connection;
pub use device::{Device, DeviceState};
pub use manager::Manager;
pub use server::{ConnectionHandler, Server};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("command {0} is not supported over the wifi link")]
    CommandNotSupported(&'static str),
    #[error("timed out waiting for the device to respond")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("handshake failed")]
    Handshake(#[source] Box<Error>),
    #[error("device rejected the start command")]
    StartFailed,
    #[error("device rejected the stop command")]
    StopFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
