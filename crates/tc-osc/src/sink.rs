use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::encoder::EncodedPacket;
use crate::error::OscError;

/// Send counters, readable from any thread.
#[derive(Debug, Default)]
pub struct SinkStats {
    packets: AtomicU64,
    bytes: AtomicU64,
    failures: AtomicU64,
}

/// Plain copy of [`SinkStats`] at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkCounters {
    /// Datagrams handed to the OS.
    pub packets: u64,
    /// Bytes handed to the OS.
    pub bytes: u64,
    /// Sends that failed or were truncated.
    pub failures: u64,
}

impl SinkStats {
    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> SinkCounters {
        SinkCounters {
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Fire-and-forget UDP sender to one destination.
///
/// The destination is resolved once in [`NetworkSink::connect`]. `send` never
/// blocks and never retries: a failure is counted and the packet is gone.
pub struct NetworkSink {
    socket: UdpSocket,
    destination: SocketAddr,
    stats: Arc<SinkStats>,
    warned: AtomicBool,
}

impl NetworkSink {
    /// Resolve `host:port` and bind an ephemeral non-blocking socket.
    ///
    /// IPv4 addresses are preferred when the host resolves to both families.
    ///
    /// # Errors
    /// Resolution or socket setup failure, fatal at startup.
    pub fn connect(host: &str, port: u16) -> Result<Self, OscError> {
        let resolve_err = |reason: String| OscError::Resolve {
            host: host.to_string(),
            port,
            reason,
        };
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| resolve_err(e.to_string()))?
            .collect();
        let destination = candidates
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| resolve_err("aucune adresse".to_string()))?;

        let bind_addr: SocketAddr = if destination.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        log::info!("Sortie OSC : {host}:{port} -> {destination}");
        Ok(Self {
            socket,
            destination,
            stats: Arc::new(SinkStats::default()),
            warned: AtomicBool::new(false),
        })
    }

    /// Resolved destination.
    #[must_use]
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Shared counters, for the reporter.
    #[must_use]
    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    /// Send one datagram, best effort. Returns `false` if it did not leave.
    pub fn send(&self, packet: &EncodedPacket) -> bool {
        let bytes = packet.as_bytes();
        match self.socket.send_to(bytes, self.destination) {
            Ok(n) if n == bytes.len() => {
                self.stats.packets.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes.fetch_add(n as u64, Ordering::Relaxed);
                true
            }
            Ok(n) => {
                self.fail(&format!("envoi tronqué {n}/{}", bytes.len()));
                false
            }
            Err(e) => {
                self.fail(&e.to_string());
                false
            }
        }
    }

    /// Send every packet of a tick, in order. Returns how many left.
    pub fn send_all(&self, packets: &[EncodedPacket]) -> usize {
        packets.iter().filter(|p| self.send(p)).count()
    }

    fn fail(&self, reason: &str) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        // Only the first failure is logged from the audio thread
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!("Envoi OSC vers {} en échec : {reason}", self.destination);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tc_core::config::NonFinitePolicy;
    use tc_core::feature::{FeatureCatalog, FeatureSnapshot, FeatureSpec, FeatureValue};

    use super::*;
    use crate::encoder::PacketEncoder;
    use crate::message::decode_packet;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        socket
    }

    fn packets(n: usize) -> Vec<EncodedPacket> {
        let mut catalog = FeatureCatalog::default();
        catalog.push("aubio", FeatureSpec::scalar("bpm")).unwrap();
        let snap = FeatureSnapshot::new(0, Arc::new(catalog), vec![FeatureValue::Scalar(128.0)]);
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
        (0..n).flat_map(|_| encoder.encode(&snap).unwrap()).collect()
    }

    #[test]
    fn delivers_to_loopback() {
        let rx = receiver();
        let port = rx.local_addr().unwrap().port();
        let sink = NetworkSink::connect("127.0.0.1", port).unwrap();
        assert_eq!(sink.destination().port(), port);

        let sent = packets(2);
        assert_eq!(sink.send_all(&sent), 2);

        let mut buf = [0u8; 2048];
        for p in &sent {
            let (n, _) = rx.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], p.as_bytes());
            let messages = decode_packet(&buf[..n]).unwrap();
            assert_eq!(messages[0].address, "/aubio/bpm");
        }
        let counters = sink.stats().snapshot();
        assert_eq!(counters.packets, 2);
        assert_eq!(counters.bytes, sent.iter().map(|p| p.len() as u64).sum::<u64>());
        assert_eq!(counters.failures, 0);
    }

    #[test]
    fn localhost_prefers_ipv4() {
        let sink = NetworkSink::connect("localhost", 1331).unwrap();
        assert!(sink.destination().is_ipv4());
    }

    #[test]
    fn unresolvable_host_is_fatal() {
        assert!(matches!(
            NetworkSink::connect("tonecast.invalid", 1331),
            Err(OscError::Resolve { .. })
        ));
    }

    #[test]
    fn oversize_datagram_is_counted_not_raised() {
        let rx = receiver();
        let sink = NetworkSink::connect("127.0.0.1", rx.local_addr().unwrap().port()).unwrap();
        let huge = EncodedPacket::from_bytes(vec![0; 70_000]);
        assert!(!sink.send(&huge));
        assert!(!sink.send(&huge));
        assert_eq!(sink.stats().snapshot().failures, 2);
        assert_eq!(sink.stats().snapshot().packets, 0);
    }
}
