//! Byte-stream transport layer.
//!
//! Provides the transport traits the gauge driver is written against, the
//! tokio-serial implementation for real hardware, and a scripted mock for
//! tests and dry runs.

pub mod async_port;
pub mod error;
pub mod mock;
pub mod traits;

pub use async_port::{list_ports, SystemPortOpener, TokioSerialPort};
pub use error::PortError;
pub use mock::{MockPortOpener, MockSerialPort, Responder, LINE_NOISE};
pub use traits::*;
