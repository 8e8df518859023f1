use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

/// How the raw words of a register are laid out on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    U16,
    I16,
    U32,
    I32,
    Bitfield16,
    Bitfield32,
    /// ASCII text spread over the given number of words.
    String(u16),
}

impl WireType {
    pub fn word_count(self) -> u16 {
        match self {
            WireType::U16 | WireType::I16 | WireType::Bitfield16 => 1,
            WireType::U32 | WireType::I32 | WireType::Bitfield32 => 2,
            WireType::String(words) => words,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, WireType::I16 | WireType::I32)
    }
}

/// Fixed-point convention of a register.
///
/// Most registers divide the raw integer (`divide(10)` turns 2305 into
/// 230.5); a few report in coarser units and multiply instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Scale {
    Divide(u32),
    Multiply(u32),
}

impl Scale {
    pub const ONE: Scale = Scale::Divide(1);

    pub fn divide(by: u32) -> Self {
        Scale::Divide(by.max(1))
    }

    pub fn multiply(by: u32) -> Self {
        Scale::Multiply(by.max(1))
    }

    pub fn is_one(self) -> bool {
        matches!(self, Scale::Divide(1) | Scale::Multiply(1))
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::ONE
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub address: u16,
    pub wire_type: WireType,
    pub scale: Scale,
    pub unit: Option<&'static str>,
    pub writable: bool,
    /// Exposes a single bit of a bitfield register as a boolean.
    pub bit: Option<u8>,
    /// Reads the boolean alias inverted.
    pub invert: bool,
    /// Closed set of raw values a write may use.
    pub options: Option<&'static [u16]>,
}

impl RegisterDescriptor {
    pub fn new(name: &'static str, address: u16, wire_type: WireType) -> Self {
        Self {
            name,
            address,
            wire_type,
            scale: Scale::ONE,
            unit: None,
            writable: false,
            bit: None,
            invert: false,
            options: None,
        }
    }

    pub fn u16(name: &'static str, address: u16) -> Self {
        Self::new(name, address, WireType::U16)
    }

    pub fn i16(name: &'static str, address: u16) -> Self {
        Self::new(name, address, WireType::I16)
    }

    pub fn u32(name: &'static str, address: u16) -> Self {
        Self::new(name, address, WireType::U32)
    }

    pub fn i32(name: &'static str, address: u16) -> Self {
        Self::new(name, address, WireType::I32)
    }

    pub fn string(name: &'static str, address: u16, words: u16) -> Self {
        Self::new(name, address, WireType::String(words))
    }

    pub fn flag(name: &'static str, address: u16, wire_type: WireType, bit: u8) -> Self {
        Self {
            bit: Some(bit),
            ..Self::new(name, address, wire_type)
        }
    }

    pub fn div(mut self, by: u32) -> Self {
        self.scale = Scale::divide(by);
        self
    }

    pub fn mul(mut self, by: u32) -> Self {
        self.scale = Scale::multiply(by);
        self
    }

    pub fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn rw(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn options(mut self, options: &'static [u16]) -> Self {
        self.options = Some(options);
        self
    }

    pub fn word_count(&self) -> u16 {
        self.wire_type.word_count()
    }

    /// Last address covered by this register, inclusive.
    pub fn end_address(&self) -> u16 {
        self.address.saturating_add(self.word_count() - 1)
    }
}

/// Immutable name -> descriptor table, sorted by address.
#[derive(Clone, Debug)]
pub struct Catalog {
    registers: Vec<RegisterDescriptor>,
    by_name: HashMap<&'static str, usize>,
}

impl Catalog {
    pub fn new(mut registers: Vec<RegisterDescriptor>) -> Result<Self> {
        registers.sort_by_key(|r| (r.address, r.name));

        let mut by_name = HashMap::with_capacity(registers.len());
        for (index, register) in registers.iter().enumerate() {
            if register.word_count() == 0 {
                return Err(Error::validation(format!(
                    "register {} has no words",
                    register.name
                )));
            }
            if u32::from(register.address) + u32::from(register.word_count()) > 0x1_0000 {
                return Err(Error::validation(format!(
                    "register {} runs past the end of the address space",
                    register.name
                )));
            }
            if by_name.insert(register.name, index).is_some() {
                return Err(Error::validation(format!(
                    "register {} defined twice",
                    register.name
                )));
            }
        }

        Ok(Self { registers, by_name })
    }

    /// The Solakon ONE register map.
    pub fn solakon() -> &'static Catalog {
        &SOLAKON
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisterDescriptor> {
        self.by_name
            .get(name)
            .map(|&i| &self.registers[i])
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn all_registers(&self) -> &[RegisterDescriptor] {
        &self.registers
    }

    /// Every descriptor starting at `address`, aliases included.
    pub fn by_address(&self, address: u16) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter().filter(move |r| r.address == address)
    }

    /// The writable descriptor that owns `address`, if any.
    pub fn writable_at(&self, address: u16) -> Option<&RegisterDescriptor> {
        self.by_address(address).find(|r| r.writable && r.bit.is_none())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

pub const REMOTE_CONTROL: &str = "remote_control";
pub const REMOTE_TIMEOUT_SET: &str = "remote_timeout_set";
pub const REMOTE_ACTIVE_POWER: &str = "remote_active_power";
pub const REMOTE_REACTIVE_POWER: &str = "remote_reactive_power";

static EPS_OUTPUT_OPTIONS: [u16; 3] = [0, 2, 3];

static SOLAKON: Lazy<Catalog> = Lazy::new(|| {
    // the table is static data; a failure here is a programming error caught by tests
    match Catalog::new(solakon_registers()) {
        Ok(catalog) => catalog,
        Err(err) => panic!("invalid built-in register map: {}", err),
    }
});

#[rustfmt::skip]
fn solakon_registers() -> Vec<RegisterDescriptor> {
    use RegisterDescriptor as R;
    use WireType::*;

    vec![
        // model information
        R::string("model_name", 30000, 16),
        R::string("serial_number", 30016, 16),
        R::string("mfg_id", 30032, 16),

        // versions
        R::u16("master_version", 36001),
        R::u16("slave_version", 36002),
        R::u16("manager_version", 36003),

        // battery management
        R::i16("bms1_design_energy", 37635).mul(10).unit("Wh"),
        R::u16("bms1_soh", 37624).unit("%"),
        R::u16("bms2_soh", 38322).unit("%"),
        R::i16("bms1_soc", 37612).unit("%"),
        R::i16("bms2_soc", 38310).unit("%"),

        // protocol & ratings
        R::u32("protocol_version", 39000),
        R::i32("rated_power", 39053).unit("W"),
        R::i32("max_active_power", 39055).unit("W"),

        // status
        R::new("status_1", 39063, Bitfield16),
        R::new("status_3", 39065, Bitfield32),
        R::flag("grid_status", 39065, Bitfield32, 0),
        R::flag("grid_connected", 39065, Bitfield32, 0).inverted(),
        R::new("alarm_1", 39067, Bitfield16),
        R::new("alarm_2", 39068, Bitfield16),
        R::new("alarm_3", 39069, Bitfield16),
        R::u16("grid_standard_code", 49079),

        // pv input
        R::i16("pv1_voltage", 39070).div(10).unit("V"),
        R::i16("pv1_current", 39071).div(100).unit("A"),
        R::i32("pv1_power", 39279).unit("W"),
        R::i16("pv2_voltage", 39072).div(10).unit("V"),
        R::i16("pv2_current", 39073).div(100).unit("A"),
        R::i32("pv2_power", 39281).unit("W"),
        R::i16("pv3_voltage", 39074).div(10).unit("V"),
        R::i16("pv3_current", 39075).div(100).unit("A"),
        R::i32("pv3_power", 39283).unit("W"),
        R::i16("pv4_voltage", 39076).div(10).unit("V"),
        R::i16("pv4_current", 39077).div(100).unit("A"),
        R::i32("pv4_power", 39285).unit("W"),
        R::i32("total_pv_power", 39118).unit("W"),
        R::u32("pv_total_energy", 39601).div(100).unit("kWh"),

        // eps
        R::i16("eps_voltage", 39201).div(10).unit("V"),
        R::i16("eps_current", 39204).div(10).unit("A"),
        R::i32("eps_power", 39216).unit("W"),

        // grid
        R::i16("grid_r_voltage", 39123).div(10).unit("V"),
        R::i16("grid_s_voltage", 39124).div(10).unit("V"),
        R::i16("grid_t_voltage", 39125).div(10).unit("V"),
        R::i16("grid_frequency", 39139).div(100).unit("Hz"),
        R::i32("active_power", 39134).unit("W"),
        R::i32("reactive_power", 39136).div(1000).unit("kvar"),
        R::i16("power_factor", 39138).div(1000),
        R::u32("grid_total_export_energy", 39621).div(100).unit("kWh"),
        R::u32("grid_total_import_energy", 39625).div(100).unit("kWh"),

        // inverter phases
        R::i32("inverter_r_current", 39126).div(1000).unit("A"),
        R::i32("inverter_s_current", 39128).div(1000).unit("A"),
        R::i32("inverter_t_current", 39130).div(1000).unit("A"),
        R::i16("inverter_r_frequency", 39272).div(100).unit("Hz"),
        R::i16("inverter_s_frequency", 39273).div(100).unit("Hz"),
        R::i16("inverter_t_frequency", 39274).div(100).unit("Hz"),

        // temperatures
        R::i16("internal_temp", 39141).div(10).unit("°C"),
        R::i16("bms1_ambient_temp", 37611).div(10).unit("°C"),
        R::i16("bms1_max_temp", 37617).div(10).unit("°C"),
        R::i16("bms1_min_temp", 37618).div(10).unit("°C"),
        R::i16("bms2_ambient_temp", 38309).div(10).unit("°C"),
        R::i16("bms2_max_temp", 38315).div(10).unit("°C"),
        R::i16("bms2_min_temp", 38316).div(10).unit("°C"),

        // energy statistics
        R::u32("cumulative_generation", 39149).div(100).unit("kWh"),
        R::u32("daily_generation", 39151).div(100).unit("kWh"),

        // battery
        R::i16("battery1_voltage", 39227).div(10).unit("V"),
        R::i32("battery1_current", 39228).div(1000).unit("A"),
        R::i32("battery1_power", 39230).unit("W"),
        R::i32("battery_combined_power", 39237).unit("W"),
        R::i32("battery_power", 39230).unit("W"),
        R::i16("battery_soc", 39424).unit("%"),
        R::i16("battery_max_charge_current", 46607).div(10).unit("A").rw(),
        R::i16("battery_max_discharge_current", 46608).div(10).unit("A").rw(),
        R::u32("battery_total_charge_energy", 39605).div(100).unit("kWh"),
        R::u32("battery_total_discharge_energy", 39609).div(100).unit("kWh"),

        // remote control block
        R::new(REMOTE_CONTROL, 46001, Bitfield16).rw(),
        R::u16(REMOTE_TIMEOUT_SET, 46002).unit("s").rw(),
        R::i32(REMOTE_ACTIVE_POWER, 46003).unit("W").rw(),
        R::i32(REMOTE_REACTIVE_POWER, 46005).unit("var").rw(),
        R::u16("remote_timeout_countdown", 46007).unit("s"),

        // control registers
        R::u16("eps_output", 46613).rw().options(&EPS_OUTPUT_OPTIONS),
        R::u16("minimum_soc", 46609).unit("%").rw(),
        R::u16("maximum_soc", 46610).unit("%").rw(),
        R::u16("minimum_soc_ongrid", 46611).unit("%").rw(),
        R::u16("operating_mode", 49203).rw(),
        R::u16("network_status", 49240),
    ]
}
