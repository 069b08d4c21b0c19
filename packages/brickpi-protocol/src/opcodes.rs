//! Opcode catalogue for the board firmware.
//!
//! The message-type byte routes a frame; the sensor-type byte selects a
//! decode path in the firmware and in [`crate::values`]. The sensor table is
//! consumed as an enumerated catalogue, it carries no behaviour of its own
//! beyond the I2C-family predicate.

use snafu::Snafu;

/// First payload byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Change the UART address of a board.
    ChangeAddress = 1,
    /// Set the sensor type for both ports of a board.
    SensorType = 2,
    /// Motor speed/direction out, sensor and encoder readings back.
    Values = 3,
    /// Float the motors immediately.
    EmergencyStop = 4,
    /// Set the communication timeout.
    TimeoutSettings = 5,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("unknown message type opcode {value:#04x}"))]
pub struct UnknownMessageType {
    pub value: u8,
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::ChangeAddress),
            2 => Ok(MessageType::SensorType),
            3 => Ok(MessageType::Values),
            4 => Ok(MessageType::EmergencyStop),
            5 => Ok(MessageType::TimeoutSettings),
            _ => Err(UnknownMessageType { value }),
        }
    }
}

/// One entry of the sensor-type catalogue.
///
/// The raw range 0..=31 doubles as the analog bias mask for legacy sensors,
/// so this stays a transparent newtype rather than a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorType(pub u8);

impl SensorType {
    pub const RAW: Self = Self(0);
    pub const LIGHT_OFF: Self = Self(0);
    pub const LIGHT_ON: Self = Self(mask::D0_M | mask::D0_S);
    pub const TOUCH: Self = Self(32);
    pub const ULTRASONIC_CONT: Self = Self(33);
    pub const ULTRASONIC_SS: Self = Self(34);
    pub const RCX_LIGHT: Self = Self(35);
    pub const COLOR_FULL: Self = Self(36);
    pub const COLOR_RED: Self = Self(37);
    pub const COLOR_GREEN: Self = Self(38);
    pub const COLOR_BLUE: Self = Self(39);
    pub const COLOR_NONE: Self = Self(40);
    pub const I2C: Self = Self(41);
    pub const I2C_9V: Self = Self(42);

    pub const EV3_US_M0: Self = Self(43);
    pub const EV3_US_M6: Self = Self(49);
    pub const EV3_COLOR_M0: Self = Self(50);
    pub const EV3_COLOR_M5: Self = Self(55);
    pub const EV3_GYRO_M0: Self = Self(56);
    pub const EV3_GYRO_M4: Self = Self(60);
    pub const EV3_INFRARED_M0: Self = Self(61);
    pub const EV3_INFRARED_M5: Self = Self(66);
    pub const EV3_TOUCH: Self = Self(67);
    pub const EV3_TOUCH_DEBOUNCE: Self = Self(68);
    pub const TOUCH_DEBOUNCE: Self = Self(69);

    /// Returns the firmware version in the next values reply.
    pub const FW_VERSION: Self = Self(70);

    /// Types whose setup payload carries an I2C device table.
    pub fn is_i2c_family(self) -> bool {
        self == Self::I2C || self == Self::I2C_9V
    }

    /// EV3 compound modes report 32-bit readings.
    pub fn is_ev3_compound(self) -> bool {
        (Self::EV3_US_M0.0..=Self::EV3_INFRARED_M5.0).contains(&self.0)
    }

    /// Debounced touch variants report 16-bit readings.
    pub fn is_ev3_touch(self) -> bool {
        (Self::EV3_TOUCH.0..=Self::TOUCH_DEBOUNCE.0).contains(&self.0)
    }
}

/// Digital-line masks mixed into the raw sensor-type range.
pub mod mask {
    pub const D0_M: u8 = 0x01;
    pub const D1_M: u8 = 0x02;
    pub const NINE_V: u8 = 0x04;
    pub const D0_S: u8 = 0x08;
    pub const D1_S: u8 = 0x10;
}

bitflags::bitflags! {
    /// Per-device I2C transfer settings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct I2cSettings: u8 {
        /// Extra clock pulse between the write and the read.
        const MID_CLOCK_PULSE = 0x01;
        /// Transfer shape never changes, so counts and out-bytes ride
        /// along in the setup message instead of every values message.
        const SAME_TRANSFER = 0x02;
    }
}

/// Bus speed used for the LEGO ultrasonic passthrough.
pub const US_I2C_SPEED: u8 = 10;
/// I2C address of the LEGO ultrasonic sensor, R/W flag included.
pub const LEGO_US_I2C_ADDR: u8 = 0x02;
/// Distance register of the LEGO ultrasonic sensor.
pub const LEGO_US_I2C_DATA_REG: u8 = 0x42;
/// Device-table slot the synthesized ultrasonic descriptor occupies.
pub const US_I2C_IDX: usize = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_raw_bytes() {
        for mt in [
            MessageType::ChangeAddress,
            MessageType::SensorType,
            MessageType::Values,
            MessageType::EmergencyStop,
            MessageType::TimeoutSettings,
        ] {
            assert_eq!(MessageType::try_from(mt as u8), Ok(mt));
        }
        assert_eq!(
            MessageType::try_from(0),
            Err(UnknownMessageType { value: 0 })
        );
    }

    #[test]
    fn catalogue_families() {
        assert!(SensorType::I2C.is_i2c_family());
        assert!(SensorType::I2C_9V.is_i2c_family());
        assert!(!SensorType::ULTRASONIC_CONT.is_i2c_family());
        assert!(SensorType::EV3_GYRO_M0.is_ev3_compound());
        assert!(!SensorType::FW_VERSION.is_ev3_compound());
        assert!(SensorType::TOUCH_DEBOUNCE.is_ev3_touch());
    }
}
