//! Device profiles
//!
//! Static opcode, sensor and preset layout tables for each supported
//! controller variant. A profile is built once, never mutated, and shared by
//! reference with every protocol component.

/// Supported controller variants.
///
/// Closed set: adding a board revision means adding a variant here and a
/// constructor on [`DeviceProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Flight computer, revision 2 boards.
    FlightComputerRev2,
}

/// Wire encoding of a raw sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SensorKind {
    U8,
    U16,
    U32,
    I16,
    I32,
    F32,
}

impl SensorKind {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        match self {
            SensorKind::U8 => 1,
            SensorKind::U16 | SensorKind::I16 => 2,
            SensorKind::U32 | SensorKind::I32 | SensorKind::F32 => 4,
        }
    }
}

/// Conversion from a raw wire value to a display value.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRule {
    /// Raw wire encoding.
    pub kind: SensorKind,
    /// Multiplier applied to the raw value.
    pub scale: f64,
    /// Offset added after scaling.
    pub translate: f64,
}

impl DecodeRule {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        self.kind.width()
    }

    /// Apply scale and translate to a raw value.
    pub fn raw_to_display(&self, raw: f64) -> f64 {
        raw * self.scale + self.translate
    }

    /// Invert scale and translate, recovering the raw value.
    pub fn display_to_raw(&self, display: f64) -> f64 {
        (display - self.translate) / self.scale
    }
}

/// One sensor in a profile's telemetry set.
#[derive(Debug, Clone)]
pub struct Sensor {
    /// Sensor name, unique within the profile.
    pub name: &'static str,
    /// Display unit.
    pub unit: &'static str,
    /// How to decode the wire bytes.
    pub rule: DecodeRule,
}

/// Wire encoding of a preset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    I16,
    F32,
}

impl FieldKind {
    /// Encoded width in bytes.
    pub fn width(&self) -> usize {
        match self {
            FieldKind::U8 => 1,
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U32 | FieldKind::F32 => 4,
        }
    }

    /// Whether this kind carries a floating point value.
    pub fn is_float(&self) -> bool {
        matches!(self, FieldKind::F32)
    }
}

/// One configurable field in the preset schema.
///
/// The field's position in [`DeviceProfile::preset_fields`] is its wire id.
#[derive(Debug, Clone)]
pub struct PresetField {
    /// Field name, unique within the profile.
    pub name: &'static str,
    /// Wire encoding.
    pub kind: FieldKind,
    /// Smallest accepted value, inclusive. Enforced by the firmware.
    pub min: f64,
    /// Largest accepted value, inclusive. Enforced by the firmware.
    pub max: f64,
}

/// Static description of one controller variant: its command opcodes, sensor
/// set and preset schema.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    kind: DeviceKind,
    /// Schema tag stored in persisted preset files.
    pub signature: &'static str,
    /// Fixed link speed for this variant.
    pub baud: u32,
    opcodes: &'static [(&'static str, u8)],
    /// Telemetry set. Declaration order is dump order.
    pub sensors: Vec<Sensor>,
    /// Preset schema. Declaration order defines wire ids and byte offsets.
    pub preset_fields: Vec<PresetField>,
    /// Record payload marking the end of the preset section in flash.
    pub flash_boundary: &'static [u8],
    /// Upper bound on a flash record payload length.
    pub max_flash_record: usize,
}

const REV2_OPCODES: &[(&str, u8)] = &[
    ("ping", 0x01),
    ("sensor_read", 0x20),
    ("preset_read", 0x30),
    ("preset_write", 0x31),
    ("flash_read", 0x40),
];

const REV2_FLASH_BOUNDARY: &[u8] = &[0x5A, 0xA5, 0x5A, 0xA5];

impl DeviceProfile {
    /// Build the profile for a controller variant.
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::FlightComputerRev2 => Self::flight_computer_rev2(),
        }
    }

    /// Profile for revision 2 flight computer boards.
    pub fn flight_computer_rev2() -> Self {
        let accel = DecodeRule {
            kind: SensorKind::I16,
            scale: 0.0098,
            translate: 0.0,
        };
        let gyro = DecodeRule {
            kind: SensorKind::I16,
            scale: 0.07,
            translate: 0.0,
        };

        Self {
            kind: DeviceKind::FlightComputerRev2,
            signature: "flight-computer-rev2",
            baud: 921_600,
            opcodes: REV2_OPCODES,
            sensors: vec![
                Sensor { name: "accel_x", unit: "m/s^2", rule: accel },
                Sensor { name: "accel_y", unit: "m/s^2", rule: accel },
                Sensor { name: "accel_z", unit: "m/s^2", rule: accel },
                Sensor { name: "gyro_x", unit: "deg/s", rule: gyro },
                Sensor { name: "gyro_y", unit: "deg/s", rule: gyro },
                Sensor { name: "gyro_z", unit: "deg/s", rule: gyro },
                Sensor {
                    name: "baro_pressure",
                    unit: "kPa",
                    rule: DecodeRule {
                        kind: SensorKind::U32,
                        scale: 0.001,
                        translate: 0.0,
                    },
                },
                Sensor {
                    name: "baro_temp",
                    unit: "degC",
                    rule: DecodeRule {
                        kind: SensorKind::I16,
                        scale: 0.01,
                        translate: 0.0,
                    },
                },
                Sensor {
                    name: "batt_voltage",
                    unit: "V",
                    rule: DecodeRule {
                        kind: SensorKind::U16,
                        scale: 0.001,
                        translate: 0.0,
                    },
                },
            ],
            preset_fields: vec![
                PresetField {
                    name: "main_deploy_alt",
                    kind: FieldKind::U16,
                    min: 100.0,
                    max: 2000.0,
                },
                PresetField {
                    name: "drogue_delay_ms",
                    kind: FieldKind::U16,
                    min: 0.0,
                    max: 5000.0,
                },
                PresetField {
                    name: "launch_detect_accel",
                    kind: FieldKind::F32,
                    min: 20.0,
                    max: 150.0,
                },
                PresetField {
                    name: "arming_altitude",
                    kind: FieldKind::U16,
                    min: 10.0,
                    max: 500.0,
                },
                PresetField {
                    name: "telemetry_rate_hz",
                    kind: FieldKind::U8,
                    min: 1.0,
                    max: 50.0,
                },
                PresetField {
                    name: "log_rate_hz",
                    kind: FieldKind::U8,
                    min: 1.0,
                    max: 100.0,
                },
                PresetField {
                    name: "flight_number",
                    kind: FieldKind::U32,
                    min: 0.0,
                    max: 4_294_967_295.0,
                },
            ],
            flash_boundary: REV2_FLASH_BOUNDARY,
            max_flash_record: crate::protocol::MAX_RECORD_PAYLOAD,
        }
    }

    /// Which variant this profile describes.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Numeric opcode for a named command, if the variant supports it.
    pub fn opcode(&self, name: &str) -> Option<u8> {
        self.opcodes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, op)| *op)
    }

    /// Look up a preset field by name, returning its wire id and definition.
    pub fn field(&self, name: &str) -> Option<(usize, &PresetField)> {
        self.preset_fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }

    /// Byte offset of a preset field within the packed preset image, or
    /// `None` when no field has that wire id.
    pub fn field_offset(&self, index: usize) -> Option<usize> {
        if index >= self.preset_fields.len() {
            return None;
        }
        Some(
            self.preset_fields[..index]
                .iter()
                .map(|f| f.kind.width())
                .sum(),
        )
    }

    /// Total packed size of the preset image in bytes.
    pub fn preset_len(&self) -> usize {
        self.preset_fields.iter().map(|f| f.kind.width()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev2_opcode_table() {
        let profile = DeviceProfile::flight_computer_rev2();
        assert_eq!(profile.opcode("sensor_read"), Some(0x20));
        assert_eq!(profile.opcode("flash_read"), Some(0x40));
        assert_eq!(profile.opcode("self_destruct"), None);
    }

    #[test]
    fn rev2_field_offsets_are_packed() {
        let profile = DeviceProfile::flight_computer_rev2();
        assert_eq!(profile.field_offset(0), Some(0));
        // U16 + U16 + F32 = 8 bytes before field 3
        assert_eq!(profile.field_offset(3), Some(8));
        let last = profile.preset_fields.len() - 1;
        assert_eq!(
            profile.preset_len(),
            profile.field_offset(last).unwrap() + profile.preset_fields[last].kind.width()
        );
    }

    #[test]
    fn field_offset_out_of_range_is_none() {
        let profile = DeviceProfile::flight_computer_rev2();
        assert_eq!(profile.field_offset(profile.preset_fields.len()), None);
        assert_eq!(profile.field_offset(usize::MAX), None);
    }

    #[test]
    fn decode_rule_roundtrip() {
        let rule = DecodeRule {
            kind: SensorKind::I16,
            scale: 0.01,
            translate: -40.0,
        };
        let raw = 1250.0;
        let display = rule.raw_to_display(raw);
        assert!((rule.display_to_raw(display) - raw).abs() < 1e-9);
    }

    #[test]
    fn sensor_names_are_unique() {
        let profile = DeviceProfile::flight_computer_rev2();
        let mut names: Vec<_> = profile.sensors.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), profile.sensors.len());
    }
}
