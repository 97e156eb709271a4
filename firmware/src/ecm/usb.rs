//! Boundary to the USB device stack.
//!
//! The bridge only needs to push bytes into configured endpoints, arm the
//! OUT endpoint, acknowledge control requests, and have pending peripheral
//! events dispatched back to it. SETUP packets use the `usb-device`
//! request model; `usbd` provides the port for `usb-device` peripherals.

use usb_device::control::Request;

/// Endpoint operations provided by the USB device stack.
///
/// All transfers are asynchronous: completion is reported later through
/// [`UsbHandler`]. `send` must copy (or DMA-queue) the bytes before it
/// returns; the bridge reuses its staging buffers immediately.
pub trait UsbPort {
    /// Start an IN transfer on `ep`
    fn send(&self, ep: u8, data: &[u8]);

    /// Accept the next OUT transfer (up to `capacity` bytes) on `ep`
    fn arm_receive(&self, ep: u8, capacity: usize);

    /// Acknowledge the current control request with a zero-length packet
    fn send_control_zlp(&self);

    /// Process pending peripheral events, dispatching them to `handler`.
    /// This is the firmware main loop's "USB task" step.
    fn poll(&self, handler: &dyn UsbHandler);
}

/// Callbacks the USB device stack delivers to the class driver
pub trait UsbHandler {
    /// SET_CONFIGURATION completed
    fn configured(&self, config: u8);

    /// Bus reset: every endpoint and transfer is gone until the next
    /// configuration
    fn bus_reset(&self);

    /// SET_INTERFACE on the data interface selected `alt_setting`
    fn interface_activated(&self, alt_setting: u8);

    /// A request the standard handler did not consume.
    /// Returns `false` to let the device stack stall it.
    fn control_request(&self, request: &Request) -> bool;

    /// IN transfer on `ep` finished after `len` bytes
    fn transfer_in_complete(&self, ep: u8, len: usize);

    /// OUT transfer on `ep` delivered `data`
    fn transfer_out_complete(&self, ep: u8, data: &[u8]);
}
