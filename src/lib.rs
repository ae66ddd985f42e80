//! wfw bridges a local TAP interface onto a UDP broadcast group, so that a
//! set of hosts sharing one broadcast domain behave as a single Ethernet
//! segment. Frames read from the TAP go out over UDP (unicast to a learned
//! peer, broadcast otherwise); frames received over UDP are screened by a
//! connection-oriented IPv6/TCP filter and injected into the TAP.

pub mod bridge;
pub mod config;
pub mod daemon;
pub mod flow;
pub mod frame;
pub mod table;
pub mod tap;
