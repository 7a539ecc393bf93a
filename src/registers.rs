#[derive(Clone, Copy, serde::Serialize, PartialEq, Eq)]
pub struct DataType {
    pub(crate) scale: u8,
    pub(crate) signed: bool,
}

impl DataType {
    // Convenience aliases for the tabulated `for_each_register` definition below.
    pub const U16: Self = Self {
        scale: 1,
        signed: false,
    };
    pub const CEL: Self = Self {
        scale: 10,
        signed: true,
    };

    pub fn from_word(self, word: u16) -> Value {
        match self {
            Self::U16 => Value::U16(word),
            Self::CEL => Value::Celsius(word as i16),
            _ => panic!("malformed DataType"),
        }
    }

    pub const fn is_signed(&self) -> bool {
        self.signed
    }
    pub const fn scale(&self) -> u8 {
        self.scale
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.signed { "S/" } else { "U/" })?;
        f.write_fmt(format_args!("{}", self.scale))?;
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub enum Value {
    U16(u16),
    /// This data type contains a value multiplied by 10.
    Celsius(i16),
}

impl Value {
    #[allow(non_snake_case)]
    const fn CEL(val: i16) -> Self {
        Self::Celsius(val)
    }

    /// The raw word as stored in the register cell.
    pub fn to_word(self) -> u16 {
        match self {
            Value::U16(n) => n,
            Value::Celsius(n) => n as u16,
        }
    }

    /// Signed interpretation used for range comparisons.
    pub fn to_i32(self) -> i32 {
        match self {
            Value::U16(n) => i32::from(n),
            Value::Celsius(n) => i32::from(n),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::U16(n) => f.write_fmt(format_args!("{}", n)),
            Value::Celsius(n) => f.write_fmt(format_args!("{}", n as f32 / 10.0)),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::U16(n) => serializer.serialize_u16(n),
            Value::Celsius(n) => serializer.serialize_f32(n as f32 / 10.0),
        }
    }
}

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Mode(u8);

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0 & Self::R.0 == 0 { "-" } else { "R" })?;
        f.write_str(if self.0 & Self::W.0 == 0 { "-" } else { "W" })?;
        Ok(())
    }
}

impl Mode {
    pub const R: Self = Self(1 << 0);
    pub const W: Self = Self(1 << 1);
    pub const RW: Self = Self(Self::R.0 | Self::W.0);
    const R_: Self = Self::R;

    pub const fn is_writable(&self) -> bool {
        self.0 & Self::W.0 != 0
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LookupError {
    #[error("no register is known by the name `{0}`")]
    UnknownName(String),
    #[error("address {0} is not part of the register map")]
    UnknownAddress(u16),
    #[error("bit index {0} is out of range for a 16-bit register")]
    BitIndex(u16),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegisterIndex(pub(crate) usize);

impl RegisterIndex {
    pub fn from_address(address: u16) -> Option<RegisterIndex> {
        let index = ADDRESSES.partition_point(|v| *v < address);
        (ADDRESSES.get(index) == Some(&address)).then_some(Self(index))
    }

    pub fn from_name(name: &str) -> Option<RegisterIndex> {
        let index = NAMES.iter().position(|v| *v == name);
        index.map(Self)
    }

    /// `from_name`, but unknown names become a propagatable error.
    pub fn resolve(name: &str) -> Result<RegisterIndex, LookupError> {
        Self::from_name(name).ok_or_else(|| LookupError::UnknownName(name.to_string()))
    }

    pub fn resolve_address(address: u16) -> Result<RegisterIndex, LookupError> {
        Self::from_address(address).ok_or(LookupError::UnknownAddress(address))
    }

    pub fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn data_type(&self) -> DataType {
        DATA_TYPES[self.0]
    }

    pub fn mode(&self) -> Mode {
        MODES[self.0]
    }

    pub fn minimum(&self) -> Option<Value> {
        MINIMUM_VALUES[self.0]
    }

    pub fn maximum(&self) -> Option<Value> {
        MAXIMUM_VALUES[self.0]
    }

    /// Whether `word` falls within the declared min/max bounds of this register.
    pub fn accepts(&self, word: u16) -> bool {
        let value = self.data_type().from_word(word).to_i32();
        if let Some(min) = self.minimum() {
            if value < min.to_i32() {
                return false;
            }
        }
        if let Some(max) = self.maximum() {
            if value > max.to_i32() {
                return false;
            }
        }
        true
    }
}

/// A validated bit position within a 16-bit register.
///
/// Raw integers must pass through [`BitIndex::new`]; device enumerations
/// convert infallibly because their positions are known at compile time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BitIndex(u8);

impl BitIndex {
    pub fn new(index: u16) -> Result<Self, LookupError> {
        if index > 15 {
            return Err(LookupError::BitIndex(index));
        }
        Ok(Self(index as u8))
    }

    pub(crate) const fn from_known_position(index: u8) -> Self {
        assert!(index < 16);
        Self(index)
    }

    pub fn position(&self) -> u8 {
        self.0
    }

    pub fn mask(&self) -> u16 {
        1 << self.0
    }
}

impl std::fmt::Display for BitIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

// The register map of the bench rig PLC program. HMI-facing control cells
// live in the 2xx block, PLC-driven status cells in the 3xx block, simulated
// sensor overrides in 4xx and the live sensor values in 5xx.
macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            101: U16, RW, "REG_TEST";
            201: U16, RW, "REG_MODE";
            202: U16, RW, "REG_CMD";
            203: U16, RW, "REG_SIM_ENABLE", min = 0, max = 1;
            204: U16, RW, "REG_SIM_INPUTS";
            301: U16, R_, "REG_DEVICE_STATUS";
            302: U16, R_, "REG_INPUT_STATUS";
            401: CEL, RW, "REG_SIM_TS_1", min = -400, max = 800;
            402: CEL, RW, "REG_SIM_TS_2", min = -400, max = 800;
            403: CEL, RW, "REG_SIM_TS_3", min = -400, max = 800;
            404: CEL, RW, "REG_SIM_TS_3D", min = -400, max = 800;
            501: CEL, R_, "REG_TS_1", min = -400, max = 800;
            502: CEL, R_, "REG_TS_2", min = -400, max = 800;
            503: CEL, R_, "REG_TS_3", min = -400, max = 800;
            504: CEL, R_, "REG_TS_3D", min = -400, max = 800;
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($regnum: literal: $dt: ident, $mode: ident, $name: literal $(, min = $min: literal)? $(, max = $max: literal)?;)+) => {
        pub static ADDRESSES: &[u16] = &[$($regnum),*];
        pub static NAMES: &[&str] = &[$($name),*];
        pub static MODES: &[Mode] = &[$(Mode::$mode),*];
        pub static DATA_TYPES: &[DataType] = &[$(DataType::$dt),*];
        pub static MINIMUM_VALUES: &[Option<Value>] = &[$(optional!($(Value::$dt($min))?)),*];
        pub static MAXIMUM_VALUES: &[Option<Value>] = &[$(optional!($(Value::$dt($max))?)),*];
    };
}

for_each_register!(make_lists);

pub static DESCRIPTIONS: &[&str] = &const {
    let mut result = [""; ADDRESSES.len()];
    let mut index = 0;
    let mut previous_address = 0;
    while index < result.len() {
        let address = ADDRESSES[index];
        if address <= previous_address {
            panic!("ADDRESSES is not sorted (or has duplicate values)!");
        }
        previous_address = address;
        result[index] = match address {
            101 => "Scratch register for harness self-tests. Never touched by the PLC program.",
            201 => {
                "HMI override mask. A set bit hands control of the matching output device to \
                 REG_CMD instead of the PLC program."
            }
            202 => "Commanded output states. Only bits enabled in REG_MODE take effect.",
            203 => "Test mode flag. 0=field inputs are live, 1=inputs come from REG_SIM_INPUTS",
            204 => "Simulated input states, one bit per input device. Applied while test mode is on.",
            301 => "Actual output device states as driven onto the field wiring.",
            302 => "Input device states as seen by the PLC program after simulation muxing.",
            401 | 402 | 403 | 404 => {
                "Simulated temperature sensor value. Copied into the matching REG_TS cell while \
                 test mode is on."
            }
            501 | 502 | 503 | 504 => "Temperature sensor value as seen by the PLC program.",
            _ => panic!("register without a description!"),
        };
        index += 1;
    }
    result
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_address_agree() {
        for (i, &name) in NAMES.iter().enumerate() {
            let by_name = RegisterIndex::from_name(name).unwrap();
            let by_address = RegisterIndex::from_address(ADDRESSES[i]).unwrap();
            assert_eq!(by_name, by_address);
            assert_eq!(by_name.name(), name);
            assert_eq!(by_name.address(), ADDRESSES[i]);
        }
    }

    #[test]
    fn unknown_registers_do_not_resolve() {
        assert_eq!(RegisterIndex::from_address(9999), None);
        assert_eq!(RegisterIndex::from_name("REG_BOGUS"), None);
        assert_eq!(
            RegisterIndex::resolve("REG_BOGUS"),
            Err(LookupError::UnknownName("REG_BOGUS".to_string()))
        );
        assert_eq!(
            RegisterIndex::resolve_address(700),
            Err(LookupError::UnknownAddress(700))
        );
    }

    #[test]
    fn bit_index_is_validated_at_the_boundary() {
        assert_eq!(BitIndex::new(0).unwrap().mask(), 0x0001);
        assert_eq!(BitIndex::new(15).unwrap().mask(), 0x8000);
        assert_eq!(BitIndex::new(16), Err(LookupError::BitIndex(16)));
    }

    #[test]
    fn range_bounds_apply_to_the_signed_interpretation() {
        let sim_ts = RegisterIndex::from_name("REG_SIM_TS_1").unwrap();
        assert!(sim_ts.accepts(250));
        assert!(sim_ts.accepts((-400i16) as u16));
        assert!(!sim_ts.accepts((-401i16) as u16));
        assert!(!sim_ts.accepts(801));
        let test = RegisterIndex::from_name("REG_TEST").unwrap();
        assert!(test.accepts(0xFFFF));
    }
}
