//! smoltcp device implementation for the USB bridge.
//!
//! `receive` runs the frame delivery step: the waiting frame moves out of
//! the receive slot into the RX token and USB reception is re-armed.
//! TX tokens transmit through the blocking `raw_transmit` path.

use alloc::vec;

use smoltcp::phy::{ChecksumCapabilities, Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;
use smoltcp::wire::ETHERNET_HEADER_LEN;

use crate::ecm::{Frame, UsbPort, ECM_MAX_SEGMENT_SIZE};

use super::netif::EcmNetif;

impl<'b, U: UsbPort> Device for EcmNetif<'b, U> {
    type RxToken<'a>
        = EcmRxToken
    where
        Self: 'a;
    type TxToken<'a>
        = EcmTxToken<'a, 'b, U>
    where
        Self: 'a;

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        // smoltcp counts the Ethernet header in the MTU
        caps.max_transmission_unit = self.descriptor().mtu + ETHERNET_HEADER_LEN;
        caps.max_burst_size = Some(1);
        // No checksum offload on a USB link
        caps.checksum = ChecksumCapabilities::default();
        caps
    }

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        if !self.bridge().is_configured() {
            return None;
        }
        let frame = self.bridge().deliver(|frame| frame)?;
        Some((EcmRxToken { frame }, EcmTxToken { netif: self }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        // Before SET_CONFIGURATION there is no endpoint to wait for
        if !self.bridge().is_configured() {
            return None;
        }
        Some(EcmTxToken { netif: self })
    }
}

/// RX token owning one delivered frame
pub struct EcmRxToken {
    frame: Frame,
}

impl RxToken for EcmRxToken {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        f(&self.frame)
    }
}

/// TX token for transmitting packets
pub struct EcmTxToken<'a, 'b, U: UsbPort> {
    netif: &'a EcmNetif<'b, U>,
}

impl<U: UsbPort> TxToken for EcmTxToken<'_, '_, U> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        if len > ECM_MAX_SEGMENT_SIZE {
            // Let the stack build it, but never put a cut-down frame on the wire
            let mut scratch = vec![0u8; len];
            let result = f(&mut scratch);
            log::warn!(target: "netif", "tx frame of {} bytes exceeds {}, dropped", len, ECM_MAX_SEGMENT_SIZE);
            return result;
        }

        let mut buffer = [0u8; ECM_MAX_SEGMENT_SIZE];
        let result = f(&mut buffer[..len]);

        // Dropped frames are recovered by the upper layers
        if let Err(err) = self.netif.raw_transmit(&buffer[..len]) {
            log::warn!(target: "netif", "tx dropped: {}", err);
        }

        result
    }
}
