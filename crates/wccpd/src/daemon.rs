//! Event loop driving one endpoint over the WCCP socket.
//!
//! The endpoint is synchronous. Each pass waits for a datagram, the
//! housekeeping timer or shutdown, runs the endpoint, then flushes whatever
//! it queued in the outbox before waiting again.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use wccp_core::endpoint::{Outbox, TIME_UNIT};
use wccp_core::wire::BUFFER_SIZE;
use wccp_core::{Endpoint, EndpointError, IpHeader, Time};

enum Event {
    Shutdown,
    Datagram(io::Result<(usize, SocketAddr)>),
    Timer,
}

/// Seconds since the epoch.
fn now() -> Time {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct Daemon {
    socket: UdpSocket,
    endpoint: Box<dyn Endpoint>,
    port: u16,
    outbox: Outbox,
}

impl Daemon {
    pub fn new(socket: UdpSocket, endpoint: Box<dyn Endpoint>, port: u16) -> Self {
        Self {
            socket,
            endpoint,
            port,
            outbox: Outbox::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let local = self.endpoint.core().addr;
        let mut buf = vec![0u8; BUFFER_SIZE];

        // Announce immediately rather than after the first timer.
        self.endpoint.housekeeping(now(), &mut self.outbox);
        self.flush().await;

        loop {
            let wait = self.endpoint.wait_time(now()).min(TIME_UNIT);
            let event = tokio::select! {
                _ = shutdown.recv() => Event::Shutdown,
                r = self.socket.recv_from(&mut buf) => Event::Datagram(r),
                _ = tokio::time::sleep(Duration::from_secs(wait)) => Event::Timer,
            };

            match event {
                Event::Shutdown => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                Event::Datagram(Ok((len, SocketAddr::V4(from)))) => {
                    let ip = IpHeader {
                        src: *from.ip(),
                        dst: local,
                    };
                    if let Err(e) = self.endpoint.handle_message(now(), ip, &buf[..len]) {
                        log_rejected(&e, from, &buf[..len]);
                    }
                }
                Event::Datagram(Ok((_, SocketAddr::V6(from)))) => {
                    tracing::trace!(from = %from, "ignoring IPv6 datagram");
                }
                Event::Datagram(Err(e)) => {
                    tracing::warn!(error = %e, "recv_from failed");
                }
                Event::Timer => {}
            }

            self.endpoint.housekeeping(now(), &mut self.outbox);
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        let queued: Vec<_> = self.outbox.drain().collect();
        for d in queued {
            let to = SocketAddrV4::new(d.to, self.port);
            if let Err(e) = self.socket.send_to(&d.bytes, to).await {
                tracing::warn!(to = %to, error = %e, "send_to failed");
            }
        }
    }
}

fn log_rejected(e: &EndpointError, from: SocketAddrV4, bytes: &[u8]) {
    match e {
        EndpointError::Parse(_) => tracing::trace!(
            from = %from,
            error = %e,
            head = hex::encode(&bytes[..bytes.len().min(32)]),
            "malformed datagram"
        ),
        EndpointError::Security(_) | EndpointError::Stale(_) | EndpointError::Unexpected(_) => {
            tracing::debug!(from = %from, error = %e, "message dropped")
        }
        _ => tracing::info!(from = %from, error = %e, "message rejected"),
    }
}
