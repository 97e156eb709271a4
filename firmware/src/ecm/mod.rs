//! USB CDC-ECM class driver: the USB half of the network bridge.
//!
//! ## Module Structure
//!
//! - `config` - Endpoint/interface numbers, segment sizes, link rates
//! - `usb` - Traits for the USB device stack
//! - `usbd` - `UsbPort` for `usb-device` peripherals
//! - `gate` - Per-endpoint transmit readiness
//! - `slot` - Single-frame receive buffer
//! - `notify` - Class notification encoding and ordering
//! - `bridge` - `EcmBridge`, tying the pieces to the USB callbacks
//!
//! ```text
//!  USB OUT complete ──> ReceiveSlot ──> deliver() ──> IP stack input
//!  IP stack output ──> TransmitGate ──> USB IN ──> IN complete ──> gate reopens
//! ```

pub mod config;
pub mod usb;
pub mod usbd;
mod gate;
mod slot;
pub mod notify;
mod bridge;

pub use bridge::{EcmBridge, StatsSnapshot};
pub use config::{EcmConfig, ECM_MAX_SEGMENT_SIZE, ECM_MTU, HOST_MAC_ADDR};
pub use gate::TransmitGate;
pub use notify::{Notification, NotificationSequencer, NotifyState};
pub use slot::{Frame, ReceiveSlot};
pub use usb::{UsbHandler, UsbPort};
pub use usbd::{UsbdPort, USB_CLASS_CDC};
