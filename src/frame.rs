//! Accessor views over a raw Ethernet frame. The views borrow the receive
//! buffer; every step into a nested header re-checks the received length,
//! so a truncated frame fails to parse instead of reading stale bytes.

use std::fmt;
use std::net::Ipv6Addr;

use thiserror::Error;

pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const IPV6_HEADER_LEN: usize = 40;
pub const TCP_MIN_HEADER: usize = 20;
pub const IPPROTO_TCP: u8 = 6;

/// Largest frame a single datagram carries: 14-byte header + 1500 payload.
pub const MAX_FRAME: usize = 1514;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("bad IP version nibble {0}, expected 6")]
    BadVersion(u8),
}

fn need(bytes: &[u8], len: usize) -> Result<(), FrameError> {
    if bytes.len() < len {
        return Err(FrameError::Truncated {
            need: len,
            have: bytes.len(),
        });
    }
    Ok(())
}

/// A MAC address as it appears on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    pub const BROADCAST: Mac = Mac([0xff; 6]);

    /// The `33:33` prefix Ethernet uses for IPv6 multicast groups.
    pub fn is_ipv6_multicast(&self) -> bool {
        self.0[0] == 0x33 && self.0[1] == 0x33
    }

    /// Whether this address may key the learning table: anything with a
    /// leading `0xff` octet or the IPv6-multicast prefix is excluded.
    pub fn learnable(&self) -> bool {
        self.0[0] != 0xff && !self.is_ipv6_multicast()
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EtherView<'a> {
    bytes: &'a [u8],
}

impl<'a> EtherView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        need(bytes, ETH_HEADER_LEN)?;
        Ok(Self { bytes })
    }

    pub fn dst(&self) -> Mac {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.bytes[0..6]);
        Mac(mac)
    }

    pub fn src(&self) -> Mac {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.bytes[6..12]);
        Mac(mac)
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.bytes[12], self.bytes[13]])
    }

    pub fn is_ipv6(&self) -> bool {
        self.ethertype() == ETH_P_IPV6
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[ETH_HEADER_LEN..]
    }

    pub fn ipv6(&self) -> Result<Ipv6View<'a>, FrameError> {
        Ipv6View::parse(self.payload())
    }
}

#[derive(Debug)]
pub struct Ipv6View<'a> {
    bytes: &'a [u8],
}

impl<'a> Ipv6View<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        need(bytes, IPV6_HEADER_LEN)?;
        let version = bytes[0] >> 4;
        if version != 6 {
            return Err(FrameError::BadVersion(version));
        }
        Ok(Self { bytes })
    }

    /// The immediate next-header byte. Extension headers are not walked.
    pub fn next_header(&self) -> u8 {
        self.bytes[6]
    }

    pub fn is_tcp(&self) -> bool {
        self.next_header() == IPPROTO_TCP
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        let mut addr = [0u8; 16];
        addr.copy_from_slice(&self.bytes[8..24]);
        Ipv6Addr::from(addr)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        let mut addr = [0u8; 16];
        addr.copy_from_slice(&self.bytes[24..40]);
        Ipv6Addr::from(addr)
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[IPV6_HEADER_LEN..]
    }

    pub fn tcp(&self) -> Result<TcpView<'a>, FrameError> {
        TcpView::parse(self.payload())
    }
}

pub struct TcpView<'a> {
    bytes: &'a [u8],
}

impl<'a> TcpView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FrameError> {
        need(bytes, TCP_MIN_HEADER)?;
        Ok(Self { bytes })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn syn(&self) -> bool {
        self.bytes[13] & 0x02 != 0
    }
}
