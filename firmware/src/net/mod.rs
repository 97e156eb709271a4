//! Network side of the bridge using smoltcp.
//!
//! ## Module Structure
//!
//! - `config` - Adapter MAC/IP defaults and `NetConfig`
//! - `netif` - Interface descriptor, bring-up and the raw transmit paths
//! - `device` - smoltcp `Device` impl and tokens
//! - `driver` - embassy-net `Driver` impl for async stacks
//! - `state` - `NetState`: interface + sockets, the main loop poll

mod config;
mod netif;
mod device;
mod driver;
mod state;

pub use config::{NetConfig, HW_ADDR, IFACE_NAME, IP_ADDR, PREFIX_LEN};
pub use device::{EcmRxToken, EcmTxToken};
pub use driver::{DriverRxToken, DriverTxToken, EcmDriver};
pub use netif::{bring_up, EcmNetif, InterfaceDescriptor, InterfaceFlags};
pub use state::NetState;
