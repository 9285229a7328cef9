//! Dispense delivery engine for the vending kiosk.
//!
//! Turns a confirmed-paid cart into a sequence of motor-control frames and
//! drives them across one of two hardware channels. The pieces, leaf first:
//!
//! - [`slot`] maps logical product numbers to physical motor slots, by the
//!   default arithmetic rule or a per-machine profile;
//! - [`sequence`] expands a cart into the ordered, fully materialized frame
//!   list for one session;
//! - [`transport`] is the uniform send/receive/close contract with USB-serial
//!   and built-in-UART-bridge implementations;
//! - [`registry`] shares one built-in UART handle across screens;
//! - [`session`] orchestrates acquire → send-with-settle-delay → report.
//!
//! The engine reports "all frames transmitted", never "all items physically
//! dispensed"; retry policy for an uncertain outcome belongs to the caller.

pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod sequence;
pub mod session;
pub mod slot;
pub mod transport;

pub use config::{ChannelConfig, EngineConfig, RetryPolicy};
pub use error::{EngineError, MappingError, TransportError};
pub use model::{CartLine, ChannelStatus, DispenseRequest, DispenseResult, MachineProfile};
pub use registry::ChannelRegistry;
pub use sequence::CommandSequence;
pub use session::{AbortHandle, DispenseSession, SessionState};
pub use transport::bridge::{BridgeFactory, BridgeUartTransport};
pub use transport::usb::UsbSerialTransport;
pub use transport::Transport;
