//! Message layer for the BrickPi expansion board family.
//!
//! Everything in this crate is pure byte/bit manipulation: the bit-level
//! packer the firmware protocol is built on, the addressed and checksummed
//! frame codec, the opcode catalogue, and the encoders/decoders for the
//! sensor-setup and values exchanges. Actual serial I/O lives in
//! `brickpi-driver`.

pub mod frame;
pub mod opcodes;
pub mod pack;
pub mod sensor;
pub mod values;

pub use frame::{Frame, FrameError};
pub use pack::{BitReader, BitWriter, PackError};
