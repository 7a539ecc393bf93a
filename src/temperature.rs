//! Fixed-point temperature representation used by the sensor registers.
//!
//! The PLC stores temperatures as the decimal value multiplied by 10, so one
//! fractional digit survives the trip through a 16-bit register. `Temp` keeps
//! the scaled integer and only divides at the output boundary, which keeps
//! values with a single fractional digit exact.

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("scaled temperature {0} does not fit a signed 16-bit register")]
    RawOutOfRange(i32),
    #[error("temperature {0}°C is outside of the representable -3276.8..=3276.7 span")]
    CelsiusOutOfRange(f64),
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Temp(i16);

impl Temp {
    /// Construct from the register-level scaled integer (tenths of a degree).
    pub fn from_raw(raw: i32) -> Result<Self, Error> {
        i16::try_from(raw).map(Self).map_err(|_| Error::RawOutOfRange(raw))
    }

    /// Construct from decimal degrees, rounding to the nearest tenth.
    ///
    /// Exact half-tenths round away from zero (`f64::round` semantics).
    pub fn from_celsius(degrees: f64) -> Result<Self, Error> {
        let scaled = (degrees * 10.0).round();
        if !scaled.is_finite() || scaled < f64::from(i16::MIN) || scaled > f64::from(i16::MAX) {
            return Err(Error::CelsiusOutOfRange(degrees));
        }
        Ok(Self(scaled as i16))
    }

    pub fn as_raw(&self) -> i16 {
        self.0
    }

    pub fn as_celsius(&self) -> f32 {
        f32::from(self.0) / 10.0
    }

    /// The two's-complement word as it travels over the wire.
    pub fn to_register_word(&self) -> u16 {
        self.0 as u16
    }

    pub fn from_register_word(word: u16) -> Self {
        Self(word as i16)
    }
}

impl std::fmt::Display for Temp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.as_celsius()))
    }
}

impl std::fmt::Debug for Temp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Temp({})", self.as_celsius()))
    }
}

impl serde::Serialize for Temp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f32(self.as_celsius())
    }
}
