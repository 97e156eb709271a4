//! `usb-device` port for the bridge.
//!
//! [`UsbdPort`] owns the CDC-ECM interfaces and endpoints allocated from the
//! peripheral's `UsbBusAllocator`, plus the `UsbDevice` once attached. Each
//! [`UsbPort::poll`] runs `UsbDevice::poll` with a short-lived `EcmClass`
//! that maps the `UsbClass` callbacks onto the bridge's [`UsbHandler`].
//!
//! Endpoints move one packet at a time: frames are split into
//! max-packet-size chunks on the way in and gathered on the way out. A bulk
//! transfer ends with a short packet, or a zero-length one when the frame
//! fills its last packet exactly.
//!
//! ```ignore
//! let port = UsbdPort::new(&usb_alloc, HOST_MAC_ADDR, 64);
//! let config = port.ecm_config();
//! port.attach(
//!     UsbDeviceBuilder::new(&usb_alloc, UsbVidPid(0x1209, 0x0001))
//!         .device_class(USB_CLASS_CDC)
//!         .build(),
//! );
//! let bridge = EcmBridge::new(port, config);
//! ```

use core::cell::{Cell, RefCell};

use usb_device::class_prelude::*;
use usb_device::device::{UsbDevice, UsbDeviceState};
use usb_device::Result;

use super::config::{EcmConfig, ECM_MAX_SEGMENT_SIZE};
use super::slot::Frame;
use super::usb::{UsbHandler, UsbPort};

/// `device_class` for the `UsbDeviceBuilder`
pub const USB_CLASS_CDC: u8 = 0x02;
const USB_CLASS_CDC_DATA: u8 = 0x0A;
const CDC_SUBCLASS_ECM: u8 = 0x06;
const CDC_PROTOCOL_NONE: u8 = 0x00;

const CS_INTERFACE: u8 = 0x24;
const CDC_TYPE_HEADER: u8 = 0x00;
const CDC_TYPE_UNION: u8 = 0x06;
const CDC_TYPE_ETHERNET: u8 = 0x0F;

/// The largest notification fits one interrupt packet
const NOTIFY_PACKET_SIZE: u16 = 16;
const NOTIFY_INTERVAL_MS: u8 = 32;
/// Read buffer for one OUT packet (high-speed bulk maximum)
const MAX_PACKET_SIZE: usize = 512;

/// An IN transfer fed to its endpoint packet by packet
struct InTransfer {
    frame: Frame,
    written: usize,
    zlp_pending: bool,
    in_flight: bool,
    active: bool,
}

impl InTransfer {
    const fn new() -> Self {
        Self {
            frame: Frame::new(),
            written: 0,
            zlp_pending: false,
            in_flight: false,
            active: false,
        }
    }

    /// Returns `false` if `data` does not fit a segment. The transfer still
    /// completes (with nothing written) so the sender's gate reopens.
    fn start(&mut self, data: &[u8], packet_size: usize, zlp: bool) -> bool {
        let (frame, fits) = match Frame::copy_from(data) {
            Some(frame) => (frame, true),
            None => (Frame::new(), false),
        };
        self.zlp_pending = fits && zlp && frame.len() % packet_size == 0;
        self.frame = frame;
        self.written = 0;
        self.in_flight = false;
        self.active = true;
        fits
    }

    fn next_packet(&self, packet_size: usize) -> Option<&[u8]> {
        if self.written < self.frame.len() {
            let end = (self.written + packet_size).min(self.frame.len());
            Some(&self.frame[self.written..end])
        } else if self.zlp_pending {
            Some(&[][..])
        } else {
            None
        }
    }

    fn packet_written(&mut self, len: usize) {
        if len == 0 {
            self.zlp_pending = false;
        }
        self.written += len;
        self.in_flight = true;
    }

    /// Transfer length once the last packet was acknowledged
    fn take_finished(&mut self, packet_size: usize) -> Option<usize> {
        if self.active && !self.in_flight && self.next_packet(packet_size).is_none() {
            self.active = false;
            Some(self.frame.len())
        } else {
            None
        }
    }
}

/// Write the next packet of `xfer` if the endpoint is free
fn pump<B: UsbBus>(ep: &EndpointIn<'_, B>, xfer: &mut InTransfer) {
    if !xfer.active || xfer.in_flight {
        return;
    }
    let packet_size = usize::from(ep.max_packet_size());
    let Some(packet) = xfer.next_packet(packet_size) else {
        return;
    };
    match ep.write(packet) {
        Ok(len) => xfer.packet_written(len),
        // Retried from the next poll
        Err(UsbError::WouldBlock) => {}
        Err(err) => {
            log::warn!(target: "usbd", "write on {:#04x} failed: {:?}", u8::from(ep.address()), err);
            xfer.written = xfer.frame.len();
            xfer.zlp_pending = false;
        }
    }
}

/// The data OUT transfer being gathered
struct OutTransfer {
    frame: Frame,
    armed: bool,
    overflow: bool,
}

impl OutTransfer {
    const fn new() -> Self {
        Self {
            frame: Frame::new(),
            armed: false,
            overflow: false,
        }
    }
}

/// CDC-ECM function on a `usb-device` peripheral.
///
/// Polled from the main loop only; the cells are not interrupt safe.
pub struct UsbdPort<'a, B: UsbBus> {
    comm_if: InterfaceNumber,
    notify_ep: EndpointIn<'a, B>,
    data_if: InterfaceNumber,
    data_in: EndpointIn<'a, B>,
    data_out: EndpointOut<'a, B>,
    mac_string_idx: StringIndex,
    mac_string: [u8; 12],
    device: RefCell<Option<UsbDevice<'a, B>>>,
    notify_tx: RefCell<InTransfer>,
    data_tx: RefCell<InTransfer>,
    data_rx: RefCell<OutTransfer>,
    alt_setting: Cell<u8>,
    configured: Cell<bool>,
    status_requested: Cell<bool>,
}

impl<'a, B: UsbBus> UsbdPort<'a, B> {
    /// Allocate the interfaces and endpoints. Must run before the
    /// `UsbDevice` is built from the same allocator.
    pub fn new(alloc: &'a UsbBusAllocator<B>, host_mac: [u8; 6], max_packet_size: u16) -> Self {
        Self {
            comm_if: alloc.interface(),
            notify_ep: alloc.interrupt(NOTIFY_PACKET_SIZE, NOTIFY_INTERVAL_MS),
            data_if: alloc.interface(),
            data_in: alloc.bulk(max_packet_size),
            data_out: alloc.bulk(max_packet_size),
            mac_string_idx: alloc.string(),
            mac_string: mac_to_hex(host_mac),
            device: RefCell::new(None),
            notify_tx: RefCell::new(InTransfer::new()),
            data_tx: RefCell::new(InTransfer::new()),
            data_rx: RefCell::new(OutTransfer::new()),
            alt_setting: Cell::new(0),
            configured: Cell::new(false),
            status_requested: Cell::new(false),
        }
    }

    /// Hand over the device built after [`new`](Self::new)
    pub fn attach(&self, device: UsbDevice<'a, B>) {
        match self.device.try_borrow_mut() {
            Ok(mut slot) => *slot = Some(device),
            Err(_) => log::warn!(target: "usbd", "attach during poll ignored"),
        }
    }

    /// Bridge configuration matching the allocated interfaces and endpoints
    pub fn ecm_config(&self) -> EcmConfig {
        EcmConfig {
            notify_interface: u16::from(u8::from(self.comm_if)),
            data_interface: u16::from(u8::from(self.data_if)),
            notify_ep: self.notify_ep.address().into(),
            data_in_ep: self.data_in.address().into(),
            data_out_ep: self.data_out.address().into(),
            ..EcmConfig::default()
        }
    }

    fn write_descriptors(&self, writer: &mut DescriptorWriter) -> Result<()> {
        let mss = (ECM_MAX_SEGMENT_SIZE as u16).to_le_bytes();

        writer.iad(self.comm_if, 2, USB_CLASS_CDC, CDC_SUBCLASS_ECM, CDC_PROTOCOL_NONE, None)?;

        writer.interface(self.comm_if, USB_CLASS_CDC, CDC_SUBCLASS_ECM, CDC_PROTOCOL_NONE)?;
        // bcdCDC 1.10
        writer.write(CS_INTERFACE, &[CDC_TYPE_HEADER, 0x10, 0x01])?;
        writer.write(CS_INTERFACE, &[CDC_TYPE_UNION, self.comm_if.into(), self.data_if.into()])?;
        writer.write(
            CS_INTERFACE,
            &[
                CDC_TYPE_ETHERNET,
                self.mac_string_idx.into(),
                0, 0, 0, 0, // bmEthernetStatistics
                mss[0], mss[1],
                0, 0, // wNumberMCFilters
                0,    // bNumberPowerFilters
            ],
        )?;
        writer.endpoint(&self.notify_ep)?;

        // Alternate setting 0 has no endpoints: the host selects 1 to start traffic
        writer.interface_alt(self.data_if, 0, USB_CLASS_CDC_DATA, 0x00, 0x00, None)?;
        writer.interface_alt(self.data_if, 1, USB_CLASS_CDC_DATA, 0x00, 0x00, None)?;
        writer.endpoint(&self.data_in)?;
        writer.endpoint(&self.data_out)?;
        Ok(())
    }

    fn in_endpoint(&self, ep: u8) -> Option<(&EndpointIn<'a, B>, &RefCell<InTransfer>, bool)> {
        if ep == u8::from(self.notify_ep.address()) {
            Some((&self.notify_ep, &self.notify_tx, false))
        } else if ep == u8::from(self.data_in.address()) {
            Some((&self.data_in, &self.data_tx, true))
        } else {
            None
        }
    }

    /// IN endpoint acknowledged a packet: write the next one or report
    /// the whole transfer
    fn in_complete(&self, addr: EndpointAddress, handler: &dyn UsbHandler) {
        let Some((ep, xfer, _)) = self.in_endpoint(addr.into()) else {
            return;
        };
        let finished = xfer.try_borrow_mut().ok().and_then(|mut xfer| {
            xfer.in_flight = false;
            pump(ep, &mut xfer);
            xfer.take_finished(usize::from(ep.max_packet_size()))
        });
        if let Some(len) = finished {
            handler.transfer_in_complete(addr.into(), len);
        }
    }

    /// Read one packet from the data OUT endpoint if reception is armed
    fn receive_packet(&self, handler: &dyn UsbHandler) {
        let mut packet = [0u8; MAX_PACKET_SIZE];
        let frame = {
            let Ok(mut rx) = self.data_rx.try_borrow_mut() else {
                return;
            };
            if !rx.armed {
                // Left in the endpoint (NAKed) until re-armed
                return;
            }
            let len = match self.data_out.read(&mut packet) {
                Ok(len) => len,
                Err(UsbError::WouldBlock) => return,
                Err(err) => {
                    log::warn!(target: "usbd", "data OUT read failed: {:?}", err);
                    return;
                }
            };
            if !rx.overflow && !rx.frame.push_segment(&packet[..len]) {
                rx.overflow = true;
            }
            if len == usize::from(self.data_out.max_packet_size()) {
                return;
            }
            let frame = core::mem::take(&mut rx.frame);
            if core::mem::replace(&mut rx.overflow, false) {
                log::warn!(target: "usbd", "OUT transfer exceeds {} bytes, dropped", ECM_MAX_SEGMENT_SIZE);
                return;
            }
            rx.armed = false;
            frame
        };
        handler.transfer_out_complete(self.data_out.address().into(), &frame);
    }

    /// Retry stalled writes, report finished transfers, drain armed OUT data
    fn service(&self, handler: &dyn UsbHandler) {
        for (ep, xfer) in [(&self.notify_ep, &self.notify_tx), (&self.data_in, &self.data_tx)] {
            let finished = xfer.try_borrow_mut().ok().and_then(|mut xfer| {
                pump(ep, &mut xfer);
                xfer.take_finished(usize::from(ep.max_packet_size()))
            });
            if let Some(len) = finished {
                handler.transfer_in_complete(ep.address().into(), len);
            }
        }
        self.receive_packet(handler);
    }

    fn track_state(&self, state: UsbDeviceState, handler: &dyn UsbHandler) {
        match state {
            UsbDeviceState::Configured => {
                if !self.configured.replace(true) {
                    handler.configured(1);
                }
            }
            // Configuration survives suspend/resume
            UsbDeviceState::Suspend => {}
            _ => self.configured.set(false),
        }
    }

    fn reset_transfers(&self) {
        if let Ok(mut xfer) = self.notify_tx.try_borrow_mut() {
            *xfer = InTransfer::new();
        }
        if let Ok(mut xfer) = self.data_tx.try_borrow_mut() {
            *xfer = InTransfer::new();
        }
        if let Ok(mut rx) = self.data_rx.try_borrow_mut() {
            *rx = OutTransfer::new();
        }
        self.alt_setting.set(0);
        self.status_requested.set(false);
    }
}

impl<B: UsbBus> UsbPort for UsbdPort<'_, B> {
    fn send(&self, ep: u8, data: &[u8]) {
        let Some((endpoint, xfer, zlp)) = self.in_endpoint(ep) else {
            log::warn!(target: "usbd", "send on unknown endpoint {:#04x}", ep);
            return;
        };
        let Ok(mut xfer) = xfer.try_borrow_mut() else {
            return;
        };
        if !xfer.start(data, usize::from(endpoint.max_packet_size()), zlp) {
            log::warn!(target: "usbd", "{} bytes do not fit one transfer, dropped", data.len());
            return;
        }
        pump(endpoint, &mut xfer);
    }

    fn arm_receive(&self, ep: u8, _capacity: usize) {
        if ep != u8::from(self.data_out.address()) {
            return;
        }
        if let Ok(mut rx) = self.data_rx.try_borrow_mut() {
            rx.armed = true;
        }
    }

    /// The status stage goes out when the request is accepted
    fn send_control_zlp(&self) {
        self.status_requested.set(true);
    }

    fn poll(&self, handler: &dyn UsbHandler) {
        if let Ok(mut device) = self.device.try_borrow_mut() {
            if let Some(device) = device.as_mut() {
                let mut class = EcmClass { port: self, handler };
                device.poll(&mut [&mut class]);
                self.track_state(device.state(), handler);
            }
        }
        self.service(handler);
    }
}

/// `UsbClass` view of the port for one `UsbDevice::poll`
struct EcmClass<'p, 'a, B: UsbBus> {
    port: &'p UsbdPort<'a, B>,
    handler: &'p dyn UsbHandler,
}

impl<B: UsbBus> UsbClass<B> for EcmClass<'_, '_, B> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> Result<()> {
        self.port.write_descriptors(writer)
    }

    fn get_string(&self, index: StringIndex, _lang_id: LangID) -> Option<&str> {
        if index == self.port.mac_string_idx {
            core::str::from_utf8(&self.port.mac_string).ok()
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.port.reset_transfers();
        self.handler.bus_reset();
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let handled = {
            let request = xfer.request();
            request.recipient == control::Recipient::Interface
                && request.index == u16::from(u8::from(self.port.comm_if))
                && self.handler.control_request(request)
        };
        if handled && self.port.status_requested.replace(false) {
            xfer.accept().ok();
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr == self.port.data_out.address() {
            self.port.receive_packet(self.handler);
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        self.port.in_complete(addr, self.handler);
    }

    fn get_alt_setting(&mut self, interface: InterfaceNumber) -> Option<u8> {
        (interface == self.port.data_if).then(|| self.port.alt_setting.get())
    }

    fn set_alt_setting(&mut self, interface: InterfaceNumber, alternative: u8) -> bool {
        if interface != self.port.data_if || alternative > 1 {
            return false;
        }
        self.port.alt_setting.set(alternative);
        self.handler.interface_activated(alternative);
        true
    }
}

fn mac_to_hex(mac: [u8; 6]) -> [u8; 12] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = [0u8; 12];
    for (i, byte) in mac.iter().enumerate() {
        out[2 * i] = HEX[usize::from(byte >> 4)];
        out[2 * i + 1] = HEX[usize::from(byte & 0x0f)];
    }
    out
}
