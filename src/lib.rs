//! Tecan OEM protocol transport for daisy-chained Cavro syringe pumps.
//!
//! Several pumps share one RS-232/RS-485 line, each answering to its own bus
//! address. A [`PortRegistry`] owns the physical ports, a [`DeviceSession`]
//! talks to one address through it, and [`discovery`] scans the host for
//! pumps.

pub mod discovery;
pub mod error;
pub mod frame;
pub mod port;
pub mod registry;
pub mod retry;
pub mod session;

pub use error::{Error, Result};
pub use frame::{Address, FrameCodec, OemCodec, Response};
pub use port::{NativeDriver, PortDriver, PortSettings};
pub use registry::PortRegistry;
pub use session::{DeviceSession, Transport};
