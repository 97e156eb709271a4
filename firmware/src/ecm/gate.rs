//! Transmit Gate: readiness of one IN endpoint.
//!
//! The gate is the only state shared between the code starting a send and
//! the USB completion callback. One instance exists per endpoint so that
//! notification traffic never holds up data frames (and the reverse).

use portable_atomic::{AtomicBool, Ordering};

use super::usb::UsbPort;

pub struct TransmitGate {
    ep: u8,
    /// true = endpoint free, false = a transfer is in flight
    open: AtomicBool,
}

impl TransmitGate {
    /// A gate for `ep`. Starts closed; USB configuration opens it.
    pub const fn new(ep: u8) -> Self {
        Self {
            ep,
            open: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> u8 {
        self.ep
    }

    /// Non-blocking readiness check
    pub fn can_send(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Hand `frame` to the endpoint and close the gate.
    ///
    /// Returns `false` without touching the endpoint if a transfer is
    /// already in flight; the frame is dropped.
    pub fn begin_send<U: UsbPort + ?Sized>(&self, usb: &U, frame: &[u8]) -> bool {
        // Close before sending: the completion may fire before send() returns.
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        usb.send(self.ep, frame);
        true
    }

    /// Completion callback: the in-flight transfer finished
    pub fn on_send_complete(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Mark the endpoint free (USB configuration)
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Bus reset: the endpoint is gone until the next configuration
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}
