//! VARA-style modem gateway.
//!
//! The modem exposes a text control port and a raw data port. A
//! [`ControlChannel`] drives the control protocol and bridges every radio
//! connection on the data port to a freshly opened program or gateway.

mod builder;
pub mod config;
mod control;
pub mod protocol;

pub use builder::ModemBuilder;
pub use config::ModemConfig;
pub use control::ControlChannel;
pub use protocol::ModemEvent;
