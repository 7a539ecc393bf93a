//! Named devices of the bench rig and where they live in the register map.

use crate::registers::{BitIndex, RegisterIndex};

/// Input devices wired to the PLC, one bit each in `REG_SIM_INPUTS` and
/// `REG_INPUT_STATUS`.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    strum::VariantArray,
    strum::IntoStaticStr,
    strum::EnumString,
    num_derive::ToPrimitive,
)]
#[repr(u8)]
#[strum(serialize_all = "kebab-case")]
pub enum InputDevice {
    BtnCirc = 0,
    BtnLighter = 1,
    PFireplace = 2,
    SigThermostat = 3,
}

/// Output devices driven by the PLC, one bit each in `REG_MODE`, `REG_CMD`
/// and `REG_DEVICE_STATUS`.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    strum::VariantArray,
    strum::IntoStaticStr,
    strum::EnumString,
    num_derive::ToPrimitive,
)]
#[repr(u8)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputDevice {
    Belimo1 = 0,
    Belimo2 = 1,
    CircPump = 2,
    Lighter = 3,
}

impl From<InputDevice> for BitIndex {
    fn from(device: InputDevice) -> Self {
        BitIndex::from_known_position(device as u8)
    }
}

impl From<OutputDevice> for BitIndex {
    fn from(device: OutputDevice) -> Self {
        BitIndex::from_known_position(device as u8)
    }
}

/// Temperature sensors of the rig. `Ts3d` is the duct probe behind the
/// three-way valve.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    strum::VariantArray,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum TempSensor {
    Ts1,
    Ts2,
    Ts3,
    Ts3d,
}

impl TempSensor {
    /// The HMI-writable simulation override cell for this sensor.
    pub fn sim_register(&self) -> RegisterIndex {
        let name = match self {
            Self::Ts1 => "REG_SIM_TS_1",
            Self::Ts2 => "REG_SIM_TS_2",
            Self::Ts3 => "REG_SIM_TS_3",
            Self::Ts3d => "REG_SIM_TS_3D",
        };
        RegisterIndex::from_name(name).expect("sensor register missing from the map")
    }

    /// The cell holding the value the PLC program actually sees.
    pub fn live_register(&self) -> RegisterIndex {
        let name = match self {
            Self::Ts1 => "REG_TS_1",
            Self::Ts2 => "REG_TS_2",
            Self::Ts3 => "REG_TS_3",
            Self::Ts3d => "REG_TS_3D",
        };
        RegisterIndex::from_name(name).expect("sensor register missing from the map")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::VariantArray as _;

    #[test]
    fn device_bits_are_distinct_and_in_range() {
        let input_masks: Vec<u16> =
            InputDevice::VARIANTS.iter().map(|d| BitIndex::from(*d).mask()).collect();
        let output_masks: Vec<u16> =
            OutputDevice::VARIANTS.iter().map(|d| BitIndex::from(*d).mask()).collect();
        for masks in [input_masks, output_masks] {
            let combined = masks.iter().fold(0u16, |acc, m| acc | m);
            assert_eq!(combined.count_ones() as usize, masks.len());
        }
    }

    #[test]
    fn device_names_round_trip_through_strum() {
        use std::str::FromStr as _;
        assert_eq!(
            InputDevice::from_str("btn-lighter").unwrap(),
            InputDevice::BtnLighter
        );
        let name: &'static str = OutputDevice::CircPump.into();
        assert_eq!(name, "circ-pump");
    }

    #[test]
    fn every_sensor_has_both_register_cells() {
        for sensor in TempSensor::VARIANTS {
            let sim = sensor.sim_register();
            let live = sensor.live_register();
            assert_ne!(sim.address(), live.address());
            assert!(sim.mode().is_writable());
            assert!(!live.mode().is_writable());
        }
    }
}
