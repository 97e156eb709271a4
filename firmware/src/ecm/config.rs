//! CDC-ECM glue constants and bridge configuration.

use core::num::NonZeroU32;

/// Largest Ethernet frame carried in one USB transfer (header + payload, no FCS)
pub const ECM_MAX_SEGMENT_SIZE: usize = 1514;
/// IP payload size advertised to the IP stack
pub const ECM_MTU: usize = 1500;

/// Communication (notification) interface number
pub const NOTIFY_INTERFACE: u16 = 0;
/// Data interface number
pub const DATA_INTERFACE: u16 = 1;

/// Interrupt IN endpoint carrying class notifications
pub const NOTIFY_EP: u8 = 0x81;
/// Bulk IN endpoint, device to host frames
pub const DATA_IN_EP: u8 = 0x82;
/// Bulk OUT endpoint, host to device frames
pub const DATA_OUT_EP: u8 = 0x02;

/// Host end of the link, reported as iMACAddress (the device's own
/// address lives in `net::config`)
pub const HOST_MAC_ADDR: [u8; 6] = [0x20, 0x89, 0x84, 0x6A, 0x96, 0x01];

/// Link rate reported to the host in bits per second (full-speed USB payload rate)
pub const LINK_DOWNLINK_BPS: u32 = 9_728_000;
pub const LINK_UPLINK_BPS: u32 = 9_728_000;

/// Class request: SetEthernetPacketFilter
pub const REQ_SET_ETHERNET_PACKET_FILTER: u8 = 0x43;

/// USB poll iterations `raw_transmit` waits for the data endpoint
pub const DEFAULT_TX_POLL_BUDGET: u32 = 100_000;

/// Bridge configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcmConfig {
    pub notify_interface: u16,
    pub data_interface: u16,
    pub notify_ep: u8,
    pub data_in_ep: u8,
    pub data_out_ep: u8,
    pub downlink_bps: u32,
    pub uplink_bps: u32,
    /// Upper bound on the transmit busy-wait; `None` waits forever
    pub tx_poll_budget: Option<NonZeroU32>,
}

impl Default for EcmConfig {
    fn default() -> Self {
        Self {
            notify_interface: NOTIFY_INTERFACE,
            data_interface: DATA_INTERFACE,
            notify_ep: NOTIFY_EP,
            data_in_ep: DATA_IN_EP,
            data_out_ep: DATA_OUT_EP,
            downlink_bps: LINK_DOWNLINK_BPS,
            uplink_bps: LINK_UPLINK_BPS,
            tx_poll_budget: NonZeroU32::new(DEFAULT_TX_POLL_BUDGET),
        }
    }
}
