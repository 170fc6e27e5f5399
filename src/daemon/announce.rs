//! Periodic self-announcement for cluster discovery.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::protocol::wire::encode_frame;

/// Fan-out sink for announcements. Fire-and-forget: no ordering or delivery
/// guarantee is claimed.
pub trait Publish: Send {
    fn publish(&mut self, route: &[u8], info: &[u8]) -> std::io::Result<()>;
}

/// Publishes announcements as a single datagram of two frames.
pub struct UdpPublisher {
    socket: UdpSocket,
}

impl UdpPublisher {
    pub fn connect(endpoint: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(endpoint)?;
        Ok(Self { socket })
    }
}

impl Publish for UdpPublisher {
    fn publish(&mut self, route: &[u8], info: &[u8]) -> std::io::Result<()> {
        let mut datagram = encode_frame(route);
        datagram.extend_from_slice(&encode_frame(info));
        self.socket.send(&datagram)?;
        Ok(())
    }
}

/// Owns the announce deadline; the state loop polls `due` on its tick.
pub struct Announcer {
    publisher: Box<dyn Publish>,
    interval: Duration,
    next_at: Instant,
}

impl Announcer {
    /// The first announcement fires immediately, then every `interval`.
    pub fn new(publisher: Box<dyn Publish>, interval: Duration) -> Self {
        Self {
            publisher,
            interval,
            next_at: Instant::now(),
        }
    }

    pub fn due(&self) -> bool {
        Instant::now() >= self.next_at
    }

    /// Publish the node's route and info snapshot.
    pub fn fire(&mut self, route: &[u8], info: &Value) {
        tracing::debug!("announcing the node");
        let serialized = info.to_string();
        if let Err(err) = self.publisher.publish(route, serialized.as_bytes()) {
            tracing::debug!("announce dropped: {err}");
        }
        self.next_at = Instant::now() + self.interval;
    }
}
