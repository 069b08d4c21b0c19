//! Encoder/decoder for the periodic values exchange.
//!
//! After setup the host continuously sends one values message per board
//! (motor speeds out, optional encoder rebase) and decodes the reply
//! (encoder counts and one reading per sensor port, shaped by the
//! configured sensor type).

use snafu::{Snafu, ensure};

use crate::opcodes::{MessageType, SensorType, US_I2C_IDX};
use crate::pack::{BitReader, BitWriter, PackError};
use crate::sensor::{MAX_I2C_TRANSFER, SensorConfig, ultrasonic_i2c_device};

/// Speed and direction for one motor port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorCommand {
    /// Signed speed, clamped to `-255..=255` on the wire.
    pub speed: i16,
    /// A disabled motor floats regardless of speed.
    pub enabled: bool,
}

/// One decoded sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    /// Raw, light and single-channel color modes: a 10-bit analog value.
    Analog(u16),
    Touch(bool),
    /// Distance in centimeters, from either ultrasonic mode.
    Ultrasonic(u8),
    ColorFull { color: u8, channels: [u16; 4] },
    /// Per-device success bitmap; the bytes land in each device's
    /// `in_bytes`.
    I2c { success: u8 },
    Ev3(u32),
    Ev3Touch(u16),
    FirmwareVersion(u8),
}

/// Decoded reply for one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuesReply {
    pub encoders: [i32; 2],
    pub readings: [SensorReading; 2],
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ValuesError {
    #[snafu(transparent)]
    Pack { source: PackError },

    #[snafu(display("reply opcode {found:#04x} is not a values message"))]
    NotValues { found: u8 },

    #[snafu(display("values reply is empty"))]
    Empty,
}

/// Largest rebase magnitude the variable-width field can carry: the sign
/// bit leaves 31 bits of a 32-bit field for the value.
const MAX_OFFSET_MAGNITUDE: u32 = (1 << 31) - 1;

fn bits_needed(mut value: u32) -> u32 {
    let mut bits = 0;
    while value > 0 {
        value >>= 1;
        bits += 1;
    }
    bits
}

/// Builds the values payload for one board: encoder-rebase flags and
/// deltas, then one 10-bit field per motor.
pub fn encode_values(
    motors: [MotorCommand; 2],
    encoder_offsets: [Option<i32>; 2],
) -> Result<Vec<u8>, PackError> {
    let mut writer = BitWriter::new();
    writer.add_byte(MessageType::Values as u8)?;

    for offset in encoder_offsets {
        writer.add_bits(1, u32::from(offset.is_some()))?;
    }
    for offset in encoder_offsets.into_iter().flatten() {
        let magnitude = offset.unsigned_abs().min(MAX_OFFSET_MAGNITUDE);
        let width = bits_needed(magnitude) + 1; // sign bit rides in bit 0
        writer.add_bits(5, width)?;
        writer.add_bits(width, magnitude << 1 | u32::from(offset < 0))?;
    }

    for motor in motors {
        let magnitude = u32::from(motor.speed.unsigned_abs().min(255));
        let field = magnitude << 2 | u32::from(motor.speed < 0) << 1 | u32::from(motor.enabled);
        writer.add_bits(10, field)?;
    }

    Ok(writer.into_payload())
}

fn decode_sensor(
    reader: &mut BitReader<'_>,
    config: &mut SensorConfig,
) -> Result<SensorReading, ValuesError> {
    let kind = config.kind;

    if kind == SensorType::ULTRASONIC_CONT {
        // Decodes through the same passthrough shape setup synthesized:
        // one device, one byte back.
        let mut device = ultrasonic_i2c_device();
        let success = reader.read_bits(1)? as u8;
        if success & 1 != 0 {
            device.in_bytes[0] = reader.read_byte()?;
        }
        return Ok(SensorReading::Ultrasonic(device.in_bytes[US_I2C_IDX]));
    }

    if kind.is_i2c_family() {
        let count = config.clamped_device_count();
        let success = reader.read_bits(count as u32)? as u8;
        for slot in 0..count {
            if success >> slot & 1 == 0 {
                continue;
            }
            let Some(device) = config.devices.get_mut(slot) else {
                continue;
            };
            let read_count = usize::from(device.read_count).min(MAX_I2C_TRANSFER);
            for byte in 0..read_count {
                device.in_bytes[byte] = reader.read_byte()?;
            }
        }
        return Ok(SensorReading::I2c { success });
    }

    Ok(match kind {
        SensorType::TOUCH => SensorReading::Touch(reader.read_bits(1)? != 0),
        SensorType::ULTRASONIC_SS => SensorReading::Ultrasonic(reader.read_byte()?),
        SensorType::COLOR_FULL => {
            let color = reader.read_bits(3)? as u8;
            let mut channels = [0u16; 4];
            for channel in &mut channels {
                *channel = reader.read_bits(10)? as u16;
            }
            SensorReading::ColorFull { color, channels }
        }
        SensorType::FW_VERSION => SensorReading::FirmwareVersion(reader.read_byte()?),
        kind if kind.is_ev3_compound() => SensorReading::Ev3(reader.read_bits(32)?),
        kind if kind.is_ev3_touch() => SensorReading::Ev3Touch(reader.read_bits(16)? as u16),
        _ => SensorReading::Analog(reader.read_bits(10)? as u16),
    })
}

/// Decodes a values reply for one board, writing I2C read-back bytes into
/// the matching devices' `in_bytes` (the only mutation this layer performs
/// on caller configuration).
pub fn decode_values(
    payload: &[u8],
    ports: [&mut SensorConfig; 2],
) -> Result<ValuesReply, ValuesError> {
    let (&opcode, rest) = payload.split_first().ok_or(ValuesError::Empty)?;
    ensure!(
        opcode == MessageType::Values as u8,
        NotValuesSnafu { found: opcode }
    );

    let mut reader = BitReader::new(rest);
    let mut widths = [0u32; 2];
    for width in &mut widths {
        *width = reader.read_bits(5)?;
    }
    let mut encoders = [0i32; 2];
    for (encoder, width) in encoders.iter_mut().zip(widths) {
        if width == 0 {
            continue;
        }
        let raw = reader.read_bits(width)?;
        let magnitude = (raw >> 1) as i32;
        *encoder = if raw & 1 != 0 { -magnitude } else { magnitude };
    }

    let [port_a, port_b] = ports;
    let readings = [
        decode_sensor(&mut reader, port_a)?,
        decode_sensor(&mut reader, port_b)?,
    ];

    Ok(ValuesReply { encoders, readings })
}
