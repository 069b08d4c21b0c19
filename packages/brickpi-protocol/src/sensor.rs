//! Per-port sensor configuration and the setup-message encoder.
//!
//! One setup message configures both sensor ports of a board. The encoding
//! order is a wire contract: ports low to high, devices in table order,
//! fields in the fixed sequence the firmware expects.

use tracing::trace;

use crate::opcodes::{
    I2cSettings, LEGO_US_I2C_ADDR, LEGO_US_I2C_DATA_REG, MessageType, SensorType, US_I2C_SPEED,
};
use crate::pack::{BitWriter, PackError};

/// Most I2C devices one port can relay for.
pub const MAX_I2C_DEVICES: usize = 8;
/// Longest single I2C transfer in either direction.
pub const MAX_I2C_TRANSFER: usize = 16;

/// One attached I2C device, as relayed by the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cDevice {
    /// Full 8-bit bus address; the R/W flag in bit 0 is dropped on the wire.
    pub address: u8,
    pub settings: I2cSettings,
    /// Bytes written per transfer, at most [`MAX_I2C_TRANSFER`].
    pub write_count: u8,
    /// Bytes read back per transfer, at most [`MAX_I2C_TRANSFER`].
    pub read_count: u8,
    pub out_bytes: [u8; MAX_I2C_TRANSFER],
    /// Last bytes read back; overwritten on every successful values cycle.
    pub in_bytes: [u8; MAX_I2C_TRANSFER],
}

impl Default for I2cDevice {
    fn default() -> Self {
        Self {
            address: 0,
            settings: I2cSettings::empty(),
            write_count: 0,
            read_count: 0,
            out_bytes: [0; MAX_I2C_TRANSFER],
            in_bytes: [0; MAX_I2C_TRANSFER],
        }
    }
}

/// Configuration of a single sensor port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorConfig {
    pub kind: SensorType,
    /// I2C bus speed; only meaningful for the I2C family.
    pub speed: u8,
    pub devices: Vec<I2cDevice>,
}

impl SensorConfig {
    pub fn new(kind: SensorType) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Device count as transmitted: clamped into `1..=8`. An out-of-range
    /// table is corrected, not rejected.
    pub fn clamped_device_count(&self) -> usize {
        self.devices.len().clamp(1, MAX_I2C_DEVICES)
    }
}

/// The descriptor substituted for an ultrasonic-continuous port: a single
/// generic I2C read of the distance register.
pub fn ultrasonic_i2c_device() -> I2cDevice {
    let mut out_bytes = [0; MAX_I2C_TRANSFER];
    out_bytes[0] = LEGO_US_I2C_DATA_REG;
    I2cDevice {
        address: LEGO_US_I2C_ADDR,
        settings: I2cSettings::MID_CLOCK_PULSE | I2cSettings::SAME_TRANSFER,
        write_count: 1,
        read_count: 1,
        out_bytes,
        in_bytes: [0; MAX_I2C_TRANSFER],
    }
}

/// The opcode actually put on the wire for a configured type. Continuous
/// ultrasonic is the one sensor rewritten into a generic I2C request; the
/// caller's configuration is left untouched.
pub fn transmitted_kind(kind: SensorType) -> SensorType {
    if kind == SensorType::ULTRASONIC_CONT {
        SensorType::I2C
    } else {
        kind
    }
}

fn encode_device(writer: &mut BitWriter, device: &I2cDevice) -> Result<(), PackError> {
    writer.add_bits(7, u32::from(device.address >> 1))?;
    writer.add_bits(2, u32::from(device.settings.bits()))?;
    if device.settings.contains(I2cSettings::SAME_TRANSFER) {
        let write_count = usize::from(device.write_count).min(MAX_I2C_TRANSFER);
        writer.add_bits(4, write_count as u32)?;
        writer.add_bits(4, u32::from(device.read_count.min(MAX_I2C_TRANSFER as u8)))?;
        for &byte in &device.out_bytes[..write_count] {
            writer.add_byte(byte)?;
        }
    }
    Ok(())
}

fn encode_port(writer: &mut BitWriter, config: &SensorConfig) -> Result<(), PackError> {
    if config.kind == SensorType::ULTRASONIC_CONT {
        let device = ultrasonic_i2c_device();
        writer.add_byte(US_I2C_SPEED)?;
        writer.add_bits(3, 0)?; // single synthesized device
        return encode_device(writer, &device);
    }

    if transmitted_kind(config.kind).is_i2c_family() {
        writer.add_byte(config.speed)?;
        let count = config.clamped_device_count();
        writer.add_bits(3, count as u32 - 1)?;
        // The clamp can demand more devices than the table holds; missing
        // entries go out as all-zero descriptors.
        let default = I2cDevice::default();
        for slot in 0..count {
            encode_device(writer, config.devices.get(slot).unwrap_or(&default))?;
        }
    }
    Ok(())
}

/// Builds the setup payload for one board: the `SensorType` opcode, the two
/// ports' transmitted type opcodes, then the bit-packed I2C tables.
pub fn encode_sensor_setup(ports: [&SensorConfig; 2]) -> Result<Vec<u8>, PackError> {
    let mut writer = BitWriter::new();
    writer.add_byte(MessageType::SensorType as u8)?;
    for config in ports {
        writer.add_byte(transmitted_kind(config.kind).0)?;
    }
    for config in ports {
        encode_port(&mut writer, config)?;
    }

    trace!(
        kinds = ?[ports[0].kind, ports[1].kind],
        bits = writer.bit_len(),
        "encoded sensor setup"
    );
    Ok(writer.into_payload())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sensors_encode_to_the_three_fixed_bytes() {
        let touch = SensorConfig::new(SensorType::TOUCH);
        let raw = SensorConfig::new(SensorType::RAW);
        let payload = encode_sensor_setup([&touch, &raw]).unwrap();
        assert_eq!(payload, vec![2, 32, 0]);
    }

    #[test]
    fn device_count_is_clamped_into_range() {
        let mut config = SensorConfig::new(SensorType::I2C);
        config.speed = 0;
        // Empty table encodes as a single all-zero device.
        assert_eq!(config.clamped_device_count(), 1);

        config.devices = vec![I2cDevice::default(); 12];
        assert_eq!(config.clamped_device_count(), 8);

        let raw = SensorConfig::new(SensorType::RAW);
        let payload = encode_sensor_setup([&config, &raw]).unwrap();
        // speed byte, then 3-bit count-1 = 7, then 8 * 9 bits of empty
        // descriptors: 8 + 3 + 72 = 83 bits after the fixed prefix.
        assert_eq!(payload.len(), 3 + 83usize.div_ceil(8));
        let count_field = payload[4] & 0b111;
        assert_eq!(count_field, 7);
    }

    #[test]
    fn ultrasonic_continuous_is_rewritten_to_generic_i2c() {
        let us = SensorConfig::new(SensorType::ULTRASONIC_CONT);
        let raw = SensorConfig::new(SensorType::RAW);
        let payload = encode_sensor_setup([&us, &raw]).unwrap();

        // Transmitted opcode is I2C even though the port was configured as
        // ultrasonic-continuous.
        assert_eq!(payload[1], SensorType::I2C.0);
        assert_eq!(payload[2], SensorType::RAW.0);
        // Hand-packed synthesized descriptor: speed 10 (8b), count-1 = 0
        // (3b), address 0x02 >> 1 (7b), settings MID|SAME (2b), write 1
        // (4b), read 1 (4b), out byte 0x42 (8b).
        assert_eq!(&payload[3..], &[0x0A, 0x08, 0x1C, 0x21, 0x04]);
    }

    #[test]
    fn same_transfer_controls_count_and_data_fields() {
        let mut fixed = I2cDevice {
            address: 0x20,
            settings: I2cSettings::SAME_TRANSFER,
            write_count: 2,
            read_count: 3,
            ..I2cDevice::default()
        };
        fixed.out_bytes[0] = 0x11;
        fixed.out_bytes[1] = 0x22;
        let variable = I2cDevice {
            address: 0x20,
            settings: I2cSettings::empty(),
            write_count: 2,
            read_count: 3,
            ..I2cDevice::default()
        };

        let mut with_same = SensorConfig::new(SensorType::I2C);
        with_same.devices = vec![fixed];
        let mut without = SensorConfig::new(SensorType::I2C);
        without.devices = vec![variable];
        let raw = SensorConfig::new(SensorType::RAW);

        let long = encode_sensor_setup([&with_same, &raw]).unwrap();
        let short = encode_sensor_setup([&without, &raw]).unwrap();
        // 4 + 4 + 16 bits of counts and data only present with SAME_TRANSFER.
        assert_eq!(long.len() - short.len(), 3);
    }
}
