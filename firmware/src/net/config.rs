//! Network configuration constants.

use smoltcp::wire::Ipv4Address;

/// Adapter hardware address
pub const HW_ADDR: [u8; 6] = [0x20, 0x89, 0x84, 0x6A, 0x96, 0x00];

/// Device address on the point-to-point USB link
pub const IP_ADDR: Ipv4Address = Ipv4Address::new(192, 168, 7, 1);
pub const PREFIX_LEN: u8 = 24;

/// Two-character interface name reported at bring-up
pub const IFACE_NAME: [u8; 2] = *b"EX";

/// IP-side configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    pub hw_addr: [u8; 6],
    pub ip_addr: Ipv4Address,
    pub prefix_len: u8,
    /// The host is the only peer, so there is no gateway by default
    pub gateway: Option<Ipv4Address>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            hw_addr: HW_ADDR,
            ip_addr: IP_ADDR,
            prefix_len: PREFIX_LEN,
            gateway: None,
        }
    }
}
