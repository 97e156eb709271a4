//! IP stack state on top of the bridge.
//!
//! Owns the smoltcp interface and socket set. [`NetState::poll`] is the
//! firmware main loop body: run the USB task, then let smoltcp pull the
//! waiting frame (if any) and flush its output.

use alloc::vec::Vec;

use smoltcp::iface::{Config, Interface, SocketSet};
use smoltcp::time::{Duration, Instant};
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr};

use crate::ecm::{EcmBridge, UsbPort};
use crate::error::EcmError;

use super::config::NetConfig;
use super::netif::EcmNetif;

pub struct NetState<'a, U: UsbPort> {
    netif: EcmNetif<'a, U>,
    iface: Interface,
    sockets: SocketSet<'static>,
}

impl<'a, U: UsbPort> NetState<'a, U> {
    /// Bring up the interface on `bridge` with the configured addresses
    pub fn new(bridge: &'a EcmBridge<U>, config: &NetConfig, now: Instant) -> Result<Self, EcmError> {
        let mut netif = EcmNetif::new(bridge, config.hw_addr)?;

        let mut iface_config = Config::new(HardwareAddress::Ethernet(EthernetAddress(config.hw_addr)));
        iface_config.random_seed = random_seed(config, now);

        let mut iface = Interface::new(iface_config, &mut netif, now);
        iface.update_ip_addrs(|addrs| {
            addrs
                .push(IpCidr::new(IpAddress::Ipv4(config.ip_addr), config.prefix_len))
                .ok();
        });
        if let Some(gateway) = config.gateway {
            iface.routes_mut().add_default_ipv4_route(gateway).ok();
        }

        log::info!(
            target: "net",
            "interface {} up: {}/{}",
            EthernetAddress(config.hw_addr),
            config.ip_addr,
            config.prefix_len
        );

        Ok(Self {
            netif,
            iface,
            sockets: SocketSet::new(Vec::new()),
        })
    }

    /// One main loop iteration
    pub fn poll(&mut self, now: Instant) {
        self.netif.bridge().poll_usb();
        self.iface.poll(now, &mut self.netif, &mut self.sockets);
    }

    /// How long the main loop may sleep before smoltcp needs polling again
    pub fn poll_delay(&mut self, now: Instant) -> Option<Duration> {
        self.iface.poll_delay(now, &self.sockets)
    }

    pub fn iface(&self) -> &Interface {
        &self.iface
    }

    pub fn iface_mut(&mut self) -> &mut Interface {
        &mut self.iface
    }

    /// Application sockets (DHCP/DNS/HTTP servers register here)
    pub fn sockets_mut(&mut self) -> &mut SocketSet<'static> {
        &mut self.sockets
    }

    pub fn netif(&self) -> &EcmNetif<'a, U> {
        &self.netif
    }
}

/// Seed for smoltcp's ephemeral ports and sequence numbers
fn random_seed(config: &NetConfig, now: Instant) -> u64 {
    let mac = config.hw_addr;
    let mac_part = (mac[0] as u64) << 40
        | (mac[1] as u64) << 32
        | (mac[2] as u64) << 24
        | (mac[3] as u64) << 16
        | (mac[4] as u64) << 8
        | (mac[5] as u64);
    let ip_part = u32::from_be_bytes(config.ip_addr.octets()) as u64;
    mac_part ^ (ip_part << 16) ^ now.total_millis() as u64
}
