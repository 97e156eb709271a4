//! USB CDC-ECM network adapter firmware.
//!
//! The device enumerates as a CDC Ethernet adapter, and frames crossing
//! the USB data interface are fed to a smoltcp interface that lives on the
//! device itself. The host sees a point-to-point Ethernet link to
//! 192.168.7.1.
//!
//! ## Crate Structure
//!
//! - `ecm` - USB class driver: transmit gates, receive slot, notifications
//! - `net` - smoltcp/embassy-net adapters and the main loop state
//! - `error` - `EcmError`
//! - `logger` - `log` backend writing to a board sink
//! - `time` - millisecond tick for the IP stack
//!
//! ## Main loop
//!
//! ```ignore
//! init_logger(uart_write, log::LevelFilter::Info);
//! let bridge = EcmBridge::new(board_usb, EcmConfig::default());
//! let mut net = NetState::new(&bridge, &NetConfig::default(), time::instant())?;
//! loop {
//!     net.poll(time::instant());
//! }
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ecm;
pub mod error;
pub mod logger;
pub mod net;
pub mod time;

#[cfg(test)]
mod testing;

pub use ecm::{EcmBridge, EcmConfig, UsbHandler, UsbPort, UsbdPort};
pub use error::EcmError;
pub use logger::init_logger;
pub use net::{EcmDriver, EcmNetif, NetConfig, NetState};
