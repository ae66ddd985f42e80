//! The bridge proper: two broadcast-capable UDP sockets and the TAP
//! descriptor, multiplexed on one thread. Egress consults the learning
//! table to pick unicast over broadcast; ingress runs the flow screen and
//! feeds the learning table before injecting into the TAP.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;
use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::flow::{self, Verdict};
use crate::frame::{EtherView, MAX_FRAME};
use crate::table::{Blacklist, ConnectionTable, LearningTable};
use crate::tap::Tap;

pub struct Bridge {
    tap: AsyncFd<Tap>,
    inbound: UdpSocket,
    outbound: UdpSocket,
    broadcast: SocketAddrV4,
    learning: LearningTable,
    connections: ConnectionTable,
    blacklist: Blacklist,
}

enum Wake {
    Shutdown,
    /// One frame of this length sits at the front of the buffer.
    Tap(usize),
    Inbound,
    Outbound,
    Idle,
}

impl Bridge {
    pub async fn open(cfg: &Config) -> Result<Self> {
        let tap = Tap::open(&cfg.device, cfg.interface.as_deref())
            .with_context(|| format!("failed to open TAP device {}", cfg.device.display()))?;
        let tap = AsyncFd::new(tap).context("failed to register TAP with the reactor")?;

        let broadcast = SocketAddrV4::new(cfg.broadcast, cfg.port);
        let inbound = bind_broadcast_socket(SocketAddr::V4(broadcast))
            .await
            .with_context(|| format!("failed to bind inbound socket to {broadcast}"))?;
        let outbound = bind_broadcast_socket(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            0,
        )))
        .await
        .context("failed to bind outbound socket")?;

        info!(device = %cfg.device.display(), %broadcast, "bridge ready");
        Ok(Self {
            tap,
            inbound,
            outbound,
            broadcast,
            learning: LearningTable::default(),
            connections: ConnectionTable::default(),
            blacklist: Blacklist::default(),
        })
    }

    /// Drives the bridge until the readiness wait fails or a shutdown
    /// signal arrives. One descriptor is serviced per wakeup, TAP before
    /// inbound before outbound; per-frame I/O errors are logged and the
    /// loop keeps going.
    pub async fn run(self) -> Result<()> {
        let Bridge {
            mut tap,
            inbound,
            outbound,
            broadcast,
            mut learning,
            mut connections,
            mut blacklist,
        } = self;
        let mut buf = [0u8; MAX_FRAME];

        loop {
            let wake = tokio::select! {
                biased;

                res = signal::ctrl_c() => {
                    res.context("failed to listen for shutdown signal")?;
                    Wake::Shutdown
                }
                res = tap.readable_mut() => {
                    let mut guard = res.context("TAP readiness wait failed")?;
                    match guard.try_io(|inner| inner.get_mut().read(&mut buf)) {
                        Ok(Ok(len)) => Wake::Tap(len),
                        Ok(Err(err)) => {
                            warn!("TAP read failed: {err}");
                            Wake::Idle
                        }
                        Err(_would_block) => Wake::Idle,
                    }
                }
                res = inbound.readable() => {
                    res.context("inbound readiness wait failed")?;
                    Wake::Inbound
                }
                res = outbound.readable() => {
                    res.context("outbound readiness wait failed")?;
                    Wake::Outbound
                }
            };

            match wake {
                Wake::Shutdown => {
                    info!("shutdown signal received");
                    return Ok(());
                }
                Wake::Tap(len) => {
                    egress(&buf[..len], &outbound, broadcast, &learning, &mut connections).await;
                }
                Wake::Inbound => {
                    deliver(&inbound, &mut tap, &mut buf, &mut learning, &connections, &mut blacklist);
                }
                Wake::Outbound => {
                    deliver(&outbound, &mut tap, &mut buf, &mut learning, &connections, &mut blacklist);
                }
                Wake::Idle => {}
            }
        }
    }
}

async fn bind_broadcast_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Forwards one TAP frame to the segment.
async fn egress(
    frame: &[u8],
    outbound: &UdpSocket,
    broadcast: SocketAddrV4,
    learning: &LearningTable,
    connections: &mut ConnectionTable,
) {
    let Some(target) = egress_target(frame, broadcast, learning, connections) else {
        return;
    };
    if let Err(err) = outbound.send_to(frame, SocketAddr::V4(target)).await {
        warn!(%target, "UDP send failed: {err}");
    }
}

/// Decides where a TAP frame goes, recording any new outbound flow on the
/// way. Returns the learned peer for the destination MAC, the broadcast
/// address when nothing is learned, or nothing when the frame is dropped.
fn egress_target(
    frame: &[u8],
    broadcast: SocketAddrV4,
    learning: &LearningTable,
    connections: &mut ConnectionTable,
) -> Option<SocketAddrV4> {
    let view = match EtherView::parse(frame) {
        Ok(view) => view,
        Err(err) => {
            debug!("egress frame dropped: {err}");
            return None;
        }
    };
    match flow::note_egress(view, connections) {
        Ok(true) => trace!("tracked new outbound IPv6/TCP flow"),
        Ok(false) => {}
        Err(err) => {
            debug!("egress frame dropped: {err}");
            return None;
        }
    }
    Some(learning.lookup(view.dst()).unwrap_or(broadcast))
}

/// Services one readable UDP socket: receives a frame, screens it, and
/// injects it into the TAP when admitted.
fn deliver(
    socket: &UdpSocket,
    tap: &mut AsyncFd<Tap>,
    buf: &mut [u8; MAX_FRAME],
    learning: &mut LearningTable,
    connections: &ConnectionTable,
    blacklist: &mut Blacklist,
) {
    let (len, origin) = match socket.try_recv_from(buf) {
        Ok((len, SocketAddr::V4(origin))) => (len, origin),
        Ok((_, SocketAddr::V6(origin))) => {
            debug!(%origin, "ignoring datagram from non-IPv4 peer");
            return;
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
        Err(err) => {
            warn!("UDP receive failed: {err}");
            return;
        }
    };
    if !admit_ingress(&buf[..len], origin, learning, connections, blacklist) {
        return;
    }
    if let Err(err) = tap.get_mut().write(&buf[..len]) {
        warn!("TAP write failed: {err}");
    }
}

/// Screens one received frame and updates the learning table. Returns
/// whether the frame should reach the TAP.
fn admit_ingress(
    frame: &[u8],
    origin: SocketAddrV4,
    learning: &mut LearningTable,
    connections: &ConnectionTable,
    blacklist: &mut Blacklist,
) -> bool {
    let view = match EtherView::parse(frame) {
        Ok(view) => view,
        Err(err) => {
            debug!(%origin, "inbound frame dropped: {err}");
            return false;
        }
    };
    match flow::screen_ingress(view, connections, blacklist) {
        Verdict::Deliver => {}
        Verdict::Drop(reason) => {
            debug!(%origin, ?reason, "inbound frame dropped");
            return false;
        }
    }
    let src = view.src();
    if learning.learn(src, origin) {
        trace!(mac = %src, %origin, "learned peer");
    }
    true
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;
    use crate::frame::build::{ether, ipv6, tcp};
    use crate::frame::{Mac, ETH_P_IPV6, IPPROTO_TCP};
    use crate::table::FlowKey;

    const HOST_A: [u8; 6] = [0x02, 0, 0, 0, 0, 1];
    const HOST_B: [u8; 6] = [0x02, 0, 0, 0, 0, 2];

    fn bcast() -> SocketAddrV4 {
        "10.0.0.255:7717".parse().unwrap()
    }

    fn peer() -> SocketAddrV4 {
        "10.0.0.5:5555".parse().unwrap()
    }

    #[test]
    fn unknown_destination_goes_to_broadcast_until_learned() {
        let mut learning = LearningTable::default();
        let mut connections = ConnectionTable::default();
        let mut blacklist = Blacklist::default();

        let out = ether(HOST_B, HOST_A, 0x0800, &[0u8; 46]);
        assert_eq!(
            egress_target(&out, bcast(), &learning, &mut connections),
            Some(bcast())
        );

        // A frame from the peer teaches the table where HOST_B lives.
        let back = ether(HOST_A, HOST_B, 0x0800, &[0u8; 46]);
        assert!(admit_ingress(&back, peer(), &mut learning, &connections, &mut blacklist));
        assert_eq!(learning.lookup(Mac(HOST_B)), Some(peer()));

        assert_eq!(
            egress_target(&out, bcast(), &learning, &mut connections),
            Some(peer())
        );
    }

    #[test]
    fn egress_records_outbound_syn() {
        let learning = LearningTable::default();
        let mut connections = ConnectionTable::default();
        let local: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let remote: Ipv6Addr = "2001:db8::2".parse().unwrap();

        let syn = ether(HOST_B, HOST_A, ETH_P_IPV6, &ipv6(IPPROTO_TCP, local, remote, &tcp(40000, 443, true)));
        assert_eq!(egress_target(&syn, bcast(), &learning, &mut connections), Some(bcast()));
        assert!(connections.contains(&FlowKey {
            local_port: 40000,
            remote_port: 443,
            remote_addr: remote,
        }));
    }

    #[test]
    fn runt_egress_frame_dropped() {
        let learning = LearningTable::default();
        let mut connections = ConnectionTable::default();
        assert_eq!(egress_target(&[0u8; 10], bcast(), &learning, &mut connections), None);
    }

    #[test]
    fn truncated_ipv6_egress_dropped() {
        let learning = LearningTable::default();
        let mut connections = ConnectionTable::default();
        let short = ether(HOST_B, HOST_A, ETH_P_IPV6, &[0x60, 0, 0, 0]);
        assert_eq!(egress_target(&short, bcast(), &learning, &mut connections), None);
        assert!(connections.is_empty());
    }

    #[test]
    fn ipv4_ingress_passes_and_learns() {
        let mut learning = LearningTable::default();
        let connections = ConnectionTable::default();
        let mut blacklist = Blacklist::default();

        let v4 = ether(HOST_A, HOST_B, 0x0800, &[0u8; 46]);
        assert!(admit_ingress(&v4, peer(), &mut learning, &connections, &mut blacklist));
        assert!(learning.contains(Mac(HOST_B)));
    }

    #[test]
    fn broadcast_source_delivered_but_not_learned() {
        let mut learning = LearningTable::default();
        let connections = ConnectionTable::default();
        let mut blacklist = Blacklist::default();

        let frame = ether(HOST_A, [0xff; 6], 0x0800, &[0u8; 46]);
        assert!(admit_ingress(&frame, peer(), &mut learning, &connections, &mut blacklist));
        assert!(learning.is_empty());
    }

    #[test]
    fn twenty_byte_ipv6_frame_dropped_without_state() {
        let mut learning = LearningTable::default();
        let connections = ConnectionTable::default();
        let mut blacklist = Blacklist::default();

        let frame = ether(HOST_A, HOST_B, ETH_P_IPV6, &[0x60, 0, 0, 0, 0, 0]);
        assert_eq!(frame.len(), 20);
        assert!(!admit_ingress(&frame, peer(), &mut learning, &connections, &mut blacklist));
        assert!(learning.is_empty());
        assert!(blacklist.is_empty());
    }

    #[test]
    fn unsolicited_ingress_not_written_and_sender_banned() {
        let mut learning = LearningTable::default();
        let connections = ConnectionTable::default();
        let mut blacklist = Blacklist::default();
        let bad: Ipv6Addr = "2001:db8::ff".parse().unwrap();
        let local: Ipv6Addr = "2001:db8::1".parse().unwrap();

        let syn = ether(HOST_A, HOST_B, ETH_P_IPV6, &ipv6(IPPROTO_TCP, bad, local, &tcp(443, 40000, true)));
        assert!(!admit_ingress(&syn, peer(), &mut learning, &connections, &mut blacklist));
        assert!(blacklist.contains(&bad));
        // A dropped frame never reaches the learning table either.
        assert!(learning.is_empty());
    }
}
