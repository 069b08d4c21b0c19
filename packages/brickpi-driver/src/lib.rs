//! Host-side driver for the BrickPi expansion boards.
//!
//! The two microcontrollers share one half-duplex serial line; every
//! exchange is a single addressed frame followed by a single reply. The
//! [`link`] module owns that request/response discipline (timeouts and
//! bounded retries included) and [`session`] sequences the multi-round
//! sensor-configuration handshake plus the periodic values exchange on top
//! of it.

pub mod link;
pub mod session;

pub use link::{BoardLink, LinkError};
pub use session::{BrickPi, SessionError, SetupState};
