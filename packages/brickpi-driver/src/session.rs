//! Board session: the sensor-configuration handshake and the operations
//! that follow it.
//!
//! Setup is strictly sequential: board 0 must acknowledge its sensor
//! configuration before board 1 is touched, and a failure anywhere aborts
//! the whole session. There is no partially configured state to resume
//! from; the caller restarts from scratch.

use std::io::{Read, Write};
use std::time::Duration;

use snafu::{Snafu, ensure};
use tracing::{debug, info};

use brickpi_protocol::frame::Frame;
use brickpi_protocol::opcodes::MessageType;
use brickpi_protocol::pack::PackError;
use brickpi_protocol::sensor::{SensorConfig, encode_sensor_setup};
use brickpi_protocol::values::{
    MotorCommand, SensorReading, ValuesError, decode_values, encode_values,
};

use crate::link::{BoardLink, LinkError};

/// Factory-default addresses of the two boards on the shared line.
pub const DEFAULT_ADDRESSES: [u8; 2] = [1, 2];

/// Boards answer a configuration message well within this bound.
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Values replies are small and immediate.
const VALUES_TIMEOUT: Duration = Duration::from_millis(100);
/// Total tries per exchange: the first attempt plus one retry.
const ATTEMPTS: u32 = 2;

/// Motor and sensor channels come four per board pair.
pub const PORT_COUNT: usize = 4;

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(transparent)]
    Link { source: LinkError },

    #[snafu(transparent)]
    Encode { source: PackError },

    #[snafu(transparent)]
    Values { source: ValuesError },

    /// The reply was a valid frame but not the expected ack shape.
    #[snafu(display("board {board} answered with an unexpected reply"))]
    UnexpectedReply { board: u8 },
}

/// Observable progress of the configuration handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Idle,
    ConfiguringBoard(usize),
    AwaitingAck(usize),
    Success,
    Failed,
}

/// Latest readings across all four ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub encoders: [i32; PORT_COUNT],
    pub readings: [Option<SensorReading>; PORT_COUNT],
}

/// One session over one serial line, covering both boards.
pub struct BrickPi<C> {
    link: BoardLink<C>,
    addresses: [u8; 2],
    state: SetupState,
    pub sensors: [SensorConfig; PORT_COUNT],
    pub motors: [MotorCommand; PORT_COUNT],
    encoder_offsets: [Option<i32>; PORT_COUNT],
    snapshot: Snapshot,
    /// Reply deadline for configuration-style exchanges.
    pub setup_timeout: Duration,
    /// Reply deadline for the periodic values exchange.
    pub values_timeout: Duration,
}

impl<C: Read + Write> BrickPi<C> {
    pub fn new(link: BoardLink<C>) -> Self {
        Self {
            link,
            addresses: DEFAULT_ADDRESSES,
            state: SetupState::Idle,
            sensors: Default::default(),
            motors: Default::default(),
            encoder_offsets: Default::default(),
            snapshot: Snapshot::default(),
            setup_timeout: SETUP_TIMEOUT,
            values_timeout: VALUES_TIMEOUT,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn link(&self) -> &BoardLink<C> {
        &self.link
    }

    /// Queues a one-shot encoder rebase for the next values exchange.
    pub fn set_encoder_offset(&mut self, port: usize, offset: i32) {
        self.encoder_offsets[port] = Some(offset);
    }

    /// The single-byte echo every non-values message is acknowledged with.
    fn expect_echo_ack(&self, board: u8, reply: &Frame, opcode: MessageType) -> Result<(), SessionError> {
        ensure!(
            reply.payload.len() == 1 && reply.payload[0] == opcode as u8,
            UnexpectedReplySnafu { board }
        );
        Ok(())
    }

    /// Runs the two-round configuration handshake, board 0 then board 1.
    pub fn setup(&mut self) -> Result<(), SessionError> {
        self.state = SetupState::Idle;
        for pair in 0..self.addresses.len() {
            if let Err(e) = self.configure_board(pair) {
                self.state = SetupState::Failed;
                return Err(e);
            }
        }
        self.state = SetupState::Success;
        info!("both boards configured");
        Ok(())
    }

    fn configure_board(&mut self, pair: usize) -> Result<(), SessionError> {
        self.state = SetupState::ConfiguringBoard(pair);
        let board = self.addresses[pair];
        let payload = encode_sensor_setup([&self.sensors[pair * 2], &self.sensors[pair * 2 + 1]])?;
        let frame = Frame::new(board, payload);

        self.state = SetupState::AwaitingAck(pair);
        let reply = self.link.handshake(&frame, self.setup_timeout, ATTEMPTS)?;
        self.expect_echo_ack(board, &reply, MessageType::SensorType)?;
        debug!(board, "sensor configuration acknowledged");
        Ok(())
    }

    /// One values round trip per board: motor commands and pending encoder
    /// rebases out, encoder counts and sensor readings back.
    pub fn update_values(&mut self) -> Result<Snapshot, SessionError> {
        for pair in 0..self.addresses.len() {
            let board = self.addresses[pair];
            let lo = pair * 2;

            let payload = encode_values(
                [self.motors[lo], self.motors[lo + 1]],
                [self.encoder_offsets[lo], self.encoder_offsets[lo + 1]],
            )?;
            let reply = self
                .link
                .handshake(&Frame::new(board, payload), self.values_timeout, ATTEMPTS)?;

            let (head, tail) = self.sensors.split_at_mut(lo + 1);
            let decoded = decode_values(&reply.payload, [&mut head[lo], &mut tail[0]])?;

            for i in 0..2 {
                self.snapshot.encoders[lo + i] = decoded.encoders[i];
                self.snapshot.readings[lo + i] = Some(decoded.readings[i]);
                // A rebase is applied exactly once.
                self.encoder_offsets[lo + i] = None;
            }
        }
        Ok(self.snapshot)
    }

    /// Floats all motors on both boards immediately.
    pub fn emergency_stop(&mut self) -> Result<(), SessionError> {
        for pair in 0..self.addresses.len() {
            let board = self.addresses[pair];
            let frame = Frame::new(board, vec![MessageType::EmergencyStop as u8]);
            let reply = self.link.handshake(&frame, self.setup_timeout, ATTEMPTS)?;
            self.expect_echo_ack(board, &reply, MessageType::EmergencyStop)?;
        }
        info!("motors floated");
        Ok(())
    }

    /// Sets the firmware communication timeout, in milliseconds, on both
    /// boards.
    pub fn set_timeout(&mut self, millis: u32) -> Result<(), SessionError> {
        for pair in 0..self.addresses.len() {
            let board = self.addresses[pair];
            let mut payload = vec![MessageType::TimeoutSettings as u8];
            payload.extend_from_slice(&millis.to_le_bytes());
            let reply = self
                .link
                .handshake(&Frame::new(board, payload), self.setup_timeout, ATTEMPTS)?;
            self.expect_echo_ack(board, &reply, MessageType::TimeoutSettings)?;
        }
        Ok(())
    }

    /// Reassigns the UART address of one board and tracks the new address
    /// for the rest of the session.
    pub fn change_address(&mut self, pair: usize, new_address: u8) -> Result<(), SessionError> {
        let board = self.addresses[pair];
        let frame = Frame::new(board, vec![MessageType::ChangeAddress as u8, new_address]);
        let reply = self.link.handshake(&frame, self.setup_timeout, ATTEMPTS)?;
        self.expect_echo_ack(board, &reply, MessageType::ChangeAddress)?;
        self.addresses[pair] = new_address;
        info!(board, new_address, "board address changed");
        Ok(())
    }
}
