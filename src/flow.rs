//! The connection-oriented filter. Outbound IPv6/TCP handshakes register
//! flows; inbound IPv6/TCP traffic is admitted only against a registered
//! flow, and anything unsolicited gets its sender blacklisted.

use crate::frame::{EtherView, FrameError};
use crate::table::{Blacklist, ConnectionTable, FlowKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Truncated,
    BadVersion,
    Blacklisted,
    Unsolicited,
}

impl From<FrameError> for DropReason {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Truncated { .. } => DropReason::Truncated,
            FrameError::BadVersion(_) => DropReason::BadVersion,
        }
    }
}

/// Inspects a frame leaving the TAP. An IPv6/TCP segment with SYN set
/// registers the flow keyed from the local side: source port is local,
/// destination port and address are remote. Returns whether a new flow was
/// recorded; non-IPv6 and non-TCP frames fall through untouched.
pub fn note_egress(
    frame: EtherView<'_>,
    connections: &mut ConnectionTable,
) -> Result<bool, FrameError> {
    if !frame.is_ipv6() {
        return Ok(false);
    }
    let ip = frame.ipv6()?;
    if !ip.is_tcp() {
        return Ok(false);
    }
    let tcp = ip.tcp()?;
    if !tcp.syn() {
        return Ok(false);
    }
    Ok(connections.note(FlowKey {
        local_port: tcp.src_port(),
        remote_port: tcp.dst_port(),
        remote_addr: ip.dst_addr(),
    }))
}

/// Screens a frame arriving from a UDP peer. Non-IPv6 frames pass. For
/// IPv6: the blacklist consults the destination address while enforcement
/// records the source address; TCP segments must match a flow the local
/// side initiated, and an unsolicited segment bans its sender.
pub fn screen_ingress(
    frame: EtherView<'_>,
    connections: &ConnectionTable,
    blacklist: &mut Blacklist,
) -> Verdict {
    if !frame.is_ipv6() {
        return Verdict::Deliver;
    }
    let ip = match frame.ipv6() {
        Ok(ip) => ip,
        Err(err) => return Verdict::Drop(err.into()),
    };
    if blacklist.contains(&ip.dst_addr()) {
        return Verdict::Drop(DropReason::Blacklisted);
    }
    if !ip.is_tcp() {
        return Verdict::Deliver;
    }
    let tcp = match ip.tcp() {
        Ok(tcp) => tcp,
        Err(err) => return Verdict::Drop(err.into()),
    };
    let key = FlowKey {
        local_port: tcp.dst_port(),
        remote_port: tcp.src_port(),
        remote_addr: ip.src_addr(),
    };
    if connections.contains(&key) {
        Verdict::Deliver
    } else {
        blacklist.ban(ip.src_addr());
        Verdict::Drop(DropReason::Unsolicited)
    }
}
