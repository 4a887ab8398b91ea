//! TCP endpoint the cookers dial into.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Connection;

/// Receives every accepted connection, one invocation per socket.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(self: Arc<Self>, connection: Arc<Connection>);
}

pub struct Server {
    listener: TcpListener,
    host: String,
    port: u16,
}

impl Server {
    /// Binds the listener. An empty host binds all interfaces and fills
    /// `host_port` with a best-effort guess of the machine's LAN address,
    /// which BLE provisioning hands to the cooker.
    pub async fn bind(host: &str, port: u16) -> io::Result<Self> {
        let bind_host = if host.is_empty() { "0.0.0.0" } else { host };
        let listener = TcpListener::bind((bind_host, port)).await?;
        let port = listener.local_addr()?.port();

        let host = if host.is_empty() {
            local_ipv4().unwrap_or_default()
        } else {
            host.to_string()
        };

        Ok(Self {
            listener,
            host,
            port,
        })
    }

    /// The endpoint to advertise to cookers.
    pub fn host_port(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// Accepts connections until `shutdown` flips. Connections already
    /// accepted keep running until their own end of stream.
    pub async fn run(self, handler: Arc<dyn ConnectionHandler>, mut shutdown: watch::Receiver<bool>) {
        info!(host = %self.host, port = self.port, "serving cooker connections");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(%err, "error accepting connection");
                            continue;
                        }
                    };
                    info!(%peer, "new connection");
                    let connection = Connection::new(stream, peer.to_string());
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(connection).await;
                    });
                }
            }
        }
        debug!("listener stopped");
    }
}

/// Best-effort non-loopback IPv4 discovery. Connecting a UDP socket only
/// performs a routing lookup; no packet leaves the machine.
fn local_ipv4() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_loopback() => Some(addr.ip().to_string()),
        _ => None,
    }
}
