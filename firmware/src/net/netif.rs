//! Network-interface adapter.
//!
//! The IP stack's view of the bridge: the interface descriptor filled in at
//! bring-up, and the transmit entry points that feed the data endpoint.

use bitflags::bitflags;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, ETHERNET_HEADER_LEN,
};

use crate::ecm::{EcmBridge, Frame, UsbPort, ECM_MAX_SEGMENT_SIZE, ECM_MTU};
use crate::error::EcmError;

use super::config::IFACE_NAME;

bitflags! {
    /// Interface capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceFlags: u8 {
        const UP = 1 << 0;
        const BROADCAST = 1 << 1;
        const LINK_UP = 1 << 2;
        /// Uses ARP for address resolution
        const ETHARP = 1 << 3;
    }
}

/// What the IP stack needs to know about the link. Filled once by
/// [`bring_up`], read-only afterwards; the live link bit comes from
/// [`EcmNetif::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub hw_addr: [u8; 6],
    pub mtu: usize,
    pub flags: InterfaceFlags,
    pub name: [u8; 2],
}

impl InterfaceDescriptor {
    pub const fn new(hw_addr: [u8; 6]) -> Self {
        Self {
            hw_addr,
            mtu: 0,
            flags: InterfaceFlags::empty(),
            name: [0; 2],
        }
    }
}

/// Interface bring-up callback.
///
/// Always succeeds: nothing here touches hardware. Board setup that can
/// fail (clock recovery, USB attach) is not checked.
pub fn bring_up(descriptor: &mut InterfaceDescriptor) -> Result<(), EcmError> {
    descriptor.mtu = ECM_MTU;
    descriptor.flags = InterfaceFlags::BROADCAST
        | InterfaceFlags::ETHARP
        | InterfaceFlags::LINK_UP
        | InterfaceFlags::UP;
    descriptor.name = IFACE_NAME;
    Ok(())
}

/// The bridge as a network interface
pub struct EcmNetif<'a, U: UsbPort> {
    bridge: &'a EcmBridge<U>,
    descriptor: InterfaceDescriptor,
}

impl<'a, U: UsbPort> EcmNetif<'a, U> {
    /// Create the interface and run bring-up
    pub fn new(bridge: &'a EcmBridge<U>, hw_addr: [u8; 6]) -> Result<Self, EcmError> {
        let mut descriptor = InterfaceDescriptor::new(hw_addr);
        bring_up(&mut descriptor)?;
        Ok(Self { bridge, descriptor })
    }

    pub fn bridge(&self) -> &'a EcmBridge<U> {
        self.bridge
    }

    pub fn descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    /// Descriptor flags with `LINK_UP` tracking the bridge: set only while
    /// the host has seen the connection notification
    pub fn flags(&self) -> InterfaceFlags {
        let mut flags = self.descriptor.flags;
        flags.set(InterfaceFlags::LINK_UP, self.bridge.link_up());
        flags
    }

    pub fn hardware_address(&self) -> EthernetAddress {
        EthernetAddress(self.descriptor.hw_addr)
    }

    /// Send one complete Ethernet frame.
    ///
    /// Blocks until the data endpoint is free, running the USB task in the
    /// meantime so its completion can arrive. Returns once the frame is
    /// handed to USB, not once the host has read it. The wait is bounded
    /// by `EcmConfig::tx_poll_budget`.
    pub fn raw_transmit(&self, frame: &[u8]) -> Result<(), EcmError> {
        if frame.len() > ECM_MAX_SEGMENT_SIZE {
            log::warn!(target: "netif", "tx frame of {} bytes exceeds {}", frame.len(), ECM_MAX_SEGMENT_SIZE);
            return Err(EcmError::FrameTooLarge);
        }

        let budget = self.bridge.config().tx_poll_budget;
        let mut polls: u32 = 0;
        loop {
            if self.bridge.can_send() && self.bridge.begin_send(frame) {
                return Ok(());
            }
            if let Some(limit) = budget {
                if polls >= limit.get() {
                    self.bridge.note_tx_busy();
                    log::warn!(target: "netif", "data endpoint busy after {} polls, frame dropped", polls);
                    return Err(if self.bridge.is_configured() {
                        EcmError::LinkBusy
                    } else {
                        EcmError::NotReady
                    });
                }
            }
            self.bridge.poll_usb();
            polls = polls.saturating_add(1);
        }
    }

    /// Send a frame given as a chain of segments (gathered into one buffer)
    pub fn raw_transmit_chain(&self, segments: &[&[u8]]) -> Result<(), EcmError> {
        let mut frame = Frame::new();
        for segment in segments {
            if !frame.push_segment(segment) {
                return Err(EcmError::FrameTooLarge);
            }
        }
        self.raw_transmit(&frame)
    }

    /// Frame a network-layer packet for an already resolved next hop and
    /// send it
    pub fn address_resolution_transmit(
        &self,
        packet: &[u8],
        ethertype: EthernetProtocol,
        destination: EthernetAddress,
    ) -> Result<(), EcmError> {
        let repr = EthernetRepr {
            src_addr: self.hardware_address(),
            dst_addr: destination,
            ethertype,
        };
        let mut header = [0u8; ETHERNET_HEADER_LEN];
        repr.emit(&mut EthernetFrame::new_unchecked(&mut header[..]));
        self.raw_transmit_chain(&[&header, packet])
    }
}
