//! # gaxgate
//!
//! Packet radio gateway toolkit.
//!
//! gaxgate relays bytes between pairs of asynchronous channels: radio links,
//! TCP connections, the console and spawned programs. It provides the
//! pieces needed to put a program or an internet gateway behind a radio
//! port.
//!
//! ## Features
//!
//! - Flow-controlled, order-preserving relays between two channels
//! - Listener running one relay session per accepted connection
//! - Credential prompts feeding a target template (`%0`, `%1`, ...)
//! - Automatic Winlink RMS gateway login
//! - VARA-style modem control with graceful disconnect
//! - A tokio based transport for TCP, the console and child processes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gaxgate::listener::ListenerBuilder;
//! use gaxgate::transport::TokioReactor;
//!
//! fn main() -> Result<(), gaxgate::Error> {
//!     let mut reactor = TokioReactor::new()?;
//!     let accepter = reactor.listen("tcp,8772")?;
//!
//!     let mut listener = ListenerBuilder::new()
//!         .spawn("stdio,/usr/games/fortune")
//!         .banner("Welcome to the fortune teller")
//!         .build(Box::new(accepter))?;
//!
//!     listener.startup()?;
//!     listener.run(&mut reactor);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod listener;
pub mod modem;
pub mod relay;
pub mod target;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use channel::{Channel, ChannelId};
pub use error::Error;
pub use listener::{Listener, ListenerBuilder};
pub use modem::{ControlChannel, ModemBuilder};
pub use relay::{Relay, Session, Slot};
pub use transport::{Event, Reactor, TokioReactor};
