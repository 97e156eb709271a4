//! embassy-net driver for the USB bridge.
//!
//! The async counterpart of [`EcmNetif::raw_transmit`]: instead of spinning
//! on the USB task until the data endpoint frees up, `transmit` returns
//! `None` and the runner sleeps until the IN completion wakes it. Receive
//! and link state wake the runner the same way.

use core::task::Context;

use alloc::vec;

use embassy_net_driver::{Capabilities, Driver, HardwareAddress, LinkState, RxToken, TxToken};
use smoltcp::wire::ETHERNET_HEADER_LEN;

use crate::ecm::{EcmBridge, Frame, UsbPort, ECM_MAX_SEGMENT_SIZE};

use super::netif::{EcmNetif, InterfaceFlags};

pub struct EcmDriver<'b, U: UsbPort> {
    netif: EcmNetif<'b, U>,
}

impl<'b, U: UsbPort> EcmDriver<'b, U> {
    pub fn new(netif: EcmNetif<'b, U>) -> Self {
        Self { netif }
    }
}

impl<'b, U: UsbPort> Driver for EcmDriver<'b, U> {
    type RxToken<'a>
        = DriverRxToken
    where
        Self: 'a;
    type TxToken<'a>
        = DriverTxToken<'b, U>
    where
        Self: 'a;

    fn receive(&mut self, cx: &mut Context) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let bridge = self.netif.bridge();
        bridge.register_rx_waker(cx.waker());
        bridge.register_tx_waker(cx.waker());
        // The paired TX token must be able to send without waiting
        if !bridge.can_send() {
            return None;
        }
        let frame = bridge.deliver(|frame| frame)?;
        Some((DriverRxToken { frame }, DriverTxToken { bridge }))
    }

    fn transmit(&mut self, cx: &mut Context) -> Option<Self::TxToken<'_>> {
        let bridge = self.netif.bridge();
        bridge.register_tx_waker(cx.waker());
        if bridge.can_send() {
            Some(DriverTxToken { bridge })
        } else {
            None
        }
    }

    fn link_state(&mut self, cx: &mut Context) -> LinkState {
        let bridge = self.netif.bridge();
        bridge.register_link_waker(cx.waker());
        if self.netif.flags().contains(InterfaceFlags::LINK_UP) {
            LinkState::Up
        } else {
            LinkState::Down
        }
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::default();
        caps.max_transmission_unit = self.netif.descriptor().mtu + ETHERNET_HEADER_LEN;
        caps.max_burst_size = Some(1);
        caps
    }

    fn hardware_address(&self) -> HardwareAddress {
        HardwareAddress::Ethernet(self.netif.descriptor().hw_addr)
    }
}

pub struct DriverRxToken {
    frame: Frame,
}

impl RxToken for DriverRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.frame)
    }
}

pub struct DriverTxToken<'b, U: UsbPort> {
    bridge: &'b EcmBridge<U>,
}

impl<U: UsbPort> TxToken for DriverTxToken<'_, U> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        if len > ECM_MAX_SEGMENT_SIZE {
            let mut scratch = vec![0u8; len];
            let result = f(&mut scratch);
            log::warn!(target: "netif", "tx frame of {} bytes exceeds {}, dropped", len, ECM_MAX_SEGMENT_SIZE);
            return result;
        }

        let mut buffer = [0u8; ECM_MAX_SEGMENT_SIZE];
        let result = f(&mut buffer[..len]);
        // Tokens are only handed out with the gate open
        if !self.bridge.begin_send(&buffer[..len]) {
            log::warn!(target: "netif", "data endpoint taken under the driver, frame dropped");
        }
        result
    }
}
