//! UDP client for the out-of-band rcon status query

use log::{debug, info};
use shared::protocol::{decode_reply, encode_rcon_request, MAX_DATAGRAM_SIZE};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

/// Where and how to query the game server.
#[derive(Debug, Clone)]
pub struct RconSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub command: String,
    pub reply_timeout: Duration,
}

/// Reasons a poll produced no reply. None of them are fatal for the collector.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no reply from server within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("could not resolve server address {0}")]
    Unresolved(String),

    #[error("rcon client is closed")]
    Closed,
}

/// Sends `rcon <password> <command>` and waits for the single reply datagram.
pub struct RconClient {
    socket: Option<UdpSocket>,
    settings: RconSettings,
    request: Vec<u8>,
}

impl RconClient {
    /// Binds an ephemeral local UDP socket.
    pub async fn connect(settings: RconSettings) -> Result<Self, FetchError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        info!(
            "Rcon client bound to {} for {}:{}",
            socket.local_addr()?,
            settings.host,
            settings.port
        );

        let request = encode_rcon_request(&settings.password, &settings.command);

        Ok(Self {
            socket: Some(socket),
            settings,
            request,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    /// Queries the server once.
    ///
    /// The host is resolved on every call so that a server which is not up yet
    /// only costs a skipped poll. Datagrams from other peers are ignored until
    /// the reply deadline passes.
    pub async fn fetch_status(&self) -> Result<String, FetchError> {
        let socket = self.socket.as_ref().ok_or(FetchError::Closed)?;
        let server = self.resolve().await?;

        socket.send_to(&self.request, server).await?;
        debug!("Sent {} byte status request to {}", self.request.len(), server);

        let deadline = Instant::now() + self.settings.reply_timeout;
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
                Ok(received) => received?,
                Err(_) => return Err(FetchError::Timeout(self.settings.reply_timeout)),
            };

            if from != server {
                debug!("Ignoring {} byte datagram from {}", len, from);
                continue;
            }

            return Ok(decode_reply(&buffer[..len]));
        }
    }

    /// Releases the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("Rcon client closed");
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, FetchError> {
        let target = format!("{}:{}", self.settings.host, self.settings.port);
        let addrs: Vec<SocketAddr> = lookup_host(&target).await?.collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or(FetchError::Unresolved(target))
    }
}
