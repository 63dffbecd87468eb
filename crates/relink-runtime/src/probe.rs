//! Background endpoint probe
//!
//! When the engine is stuck on a degraded endpoint (a proxy or a static
//! backup address), this worker periodically re-resolves the primary hosts
//! and test-dials one fresh address with a full heartbeat exchange. A
//! successful probe tells the runtime the real endpoints are reachable
//! again, and the runtime cuts the connection over. Probes are active-only
//! and rate-limited per rolling hour.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use relink_core::frame::{self, Decode, Frame, NOOP_TASK_ID};
use relink_core::{ConnectStatus, TransportConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::connection::ConnectionEngine;
use crate::source::EndpointSource;

/// A probe validated this address end to end.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeEvent {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Rolling-window rate limiter.
struct RateWindow {
    window: Duration,
    cap: u32,
    stamps: VecDeque<Instant>,
}

impl RateWindow {
    fn new(window: Duration, cap: u32) -> Self {
        Self {
            window,
            cap,
            stamps: VecDeque::new(),
        }
    }

    /// Record and permit, or refuse when the window is full.
    fn allow(&mut self, now: Instant) -> bool {
        while self
            .stamps
            .front()
            .is_some_and(|&at| now.duration_since(at) >= self.window)
        {
            self.stamps.pop_front();
        }
        if self.stamps.len() as u32 >= self.cap {
            return false;
        }
        self.stamps.push_back(now);
        true
    }
}

pub(crate) fn spawn(
    config: Arc<TransportConfig>,
    source: Arc<EndpointSource>,
    engine: Arc<ConnectionEngine>,
    events: mpsc::UnboundedSender<ProbeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run(config, source, engine, events))
}

async fn run(
    config: Arc<TransportConfig>,
    source: Arc<EndpointSource>,
    engine: Arc<ConnectionEngine>,
    events: mpsc::UnboundedSender<ProbeEvent>,
) {
    let mut limiter = RateWindow::new(Duration::from_secs(60 * 60), config.probe.max_per_hour);

    loop {
        tokio::time::sleep(config.probe.period).await;

        if !source.app_state().is_active() {
            continue;
        }
        if engine.status() != ConnectStatus::Connected {
            continue;
        }
        let Some(current) = engine.profile().endpoint else {
            continue;
        };
        if !current.kind.is_degraded() {
            continue;
        }

        let Some(ips) = source.resolve_primary().await else {
            continue;
        };
        // the degraded endpoint is still what resolution gives us
        if ips.contains(&current.ip) {
            continue;
        }
        let Some(&ip) = ips.choose(&mut rand::thread_rng()) else {
            continue;
        };
        let Some(&port) = source.ports().first() else {
            continue;
        };

        if !limiter.allow(Instant::now()) {
            debug!("probe budget for this hour exhausted");
            continue;
        }

        match exchange_heartbeat(
            SocketAddr::from((ip, port)),
            config.heartbeat_cmd_id,
            config.probe.probe_timeout,
        )
        .await
        {
            Ok(()) => {
                info!(%ip, port, "probe validated a primary endpoint");
                if events.send(ProbeEvent { ip, port }).is_err() {
                    return;
                }
            }
            Err(err) => debug!(%ip, port, %err, "probe failed"),
        }
    }
}

/// Connect and run one full heartbeat round trip within `timeout`.
async fn exchange_heartbeat(
    addr: SocketAddr,
    heartbeat_cmd_id: u32,
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, async move {
        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(&Frame::heartbeat(heartbeat_cmd_id).encode())
            .await?;

        let mut buf = Vec::with_capacity(256);
        let mut chunk = [0u8; 256];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "closed before the heartbeat reply",
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
            match frame::decode(&buf) {
                Ok(Decode::Packet { frame, .. }) if frame.task_id == NOOP_TASK_ID => {
                    return Ok(());
                }
                Ok(Decode::Packet { .. }) | Ok(Decode::Continue) => {}
                Err(err) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        err.to_string(),
                    ));
                }
            }
        }
    })
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "probe timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_caps_and_slides() {
        let mut limiter = RateWindow::new(Duration::from_secs(10), 2);
        let start = Instant::now();

        assert!(limiter.allow(start));
        assert!(limiter.allow(start + Duration::from_secs(1)));
        assert!(!limiter.allow(start + Duration::from_secs(2)));
        // first stamp ages out of the window
        assert!(limiter.allow(start + Duration::from_secs(11)));
    }

    #[tokio::test]
    async fn heartbeat_exchange_succeeds_against_an_echoing_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            assert!(n >= frame::HEADER_LEN);
            sock.write_all(&Frame::heartbeat(6).encode()).await.unwrap();
        });

        exchange_heartbeat(addr, 6, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn silent_peer_times_the_probe_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and say nothing
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = exchange_heartbeat(addr, 6, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
