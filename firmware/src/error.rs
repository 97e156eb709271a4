//! Error types for the USB network bridge.

use core::fmt;

/// Bridge error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcmError {
    /// The data endpoint stayed busy for the whole transmit wait budget
    LinkBusy,
    /// Outgoing frame is larger than the maximum segment size
    FrameTooLarge,
    /// USB is not configured yet, so no endpoint can accept a frame
    NotReady,
}

impl fmt::Display for EcmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcmError::LinkBusy => f.write_str("link busy"),
            EcmError::FrameTooLarge => f.write_str("frame exceeds maximum segment size"),
            EcmError::NotReady => f.write_str("usb not configured"),
        }
    }
}
