//! Command encode / response decode
//!
//! Turns named commands with typed arguments into [`CommandFrame`]s and
//! device responses into typed values, using the active device profile's
//! opcode and byte-layout tables. Decoding is pure: the codec never touches
//! the channel.

use byteorder::{ByteOrder, LittleEndian};

use super::frame::{CommandFrame, Outcome, ResponseFrame, ResponseLen};
use super::CodecError;
use crate::profile::{DeviceProfile, FieldKind, PresetField, Sensor, SensorKind};
use crate::transfer::PresetValue;

/// Typed arguments for a named command.
#[derive(Debug, Clone)]
pub enum CommandArgs<'a> {
    /// No arguments (e.g. ping).
    None,
    /// Read one sensor by wire id.
    Sensor(usize),
    /// Read one preset field by wire id.
    PresetRead(usize),
    /// Write one preset field by wire id.
    PresetWrite(usize, &'a PresetValue),
    /// Read one flash record by index.
    FlashRead(u32),
}

/// Encoder/decoder for one device profile.
#[derive(Debug, Clone)]
pub struct CommandCodec<'p> {
    profile: &'p DeviceProfile,
}

impl<'p> CommandCodec<'p> {
    /// Codec over a profile's tables.
    pub fn new(profile: &'p DeviceProfile) -> Self {
        Self { profile }
    }

    fn opcode(&self, name: &str) -> Result<u8, CodecError> {
        self.profile
            .opcode(name)
            .ok_or_else(|| CodecError::UnknownCommand(name.to_string()))
    }

    fn sensor(&self, index: usize) -> Result<&'p Sensor, CodecError> {
        self.profile
            .sensors
            .get(index)
            .ok_or_else(|| CodecError::InvalidArgument(format!("no sensor with id {index}")))
    }

    fn preset_field(&self, index: usize) -> Result<&'p PresetField, CodecError> {
        self.profile
            .preset_fields
            .get(index)
            .ok_or_else(|| CodecError::InvalidArgument(format!("no preset field with id {index}")))
    }

    /// Encode a named command plus typed arguments into a frame.
    pub fn encode(&self, name: &str, args: CommandArgs<'_>) -> Result<CommandFrame, CodecError> {
        let opcode = self.opcode(name)?;
        match args {
            CommandArgs::None => Ok(CommandFrame::new(opcode, ResponseLen::Fixed(1))),
            CommandArgs::Sensor(index) => {
                let sensor = self.sensor(index)?;
                Ok(CommandFrame::new(opcode, ResponseLen::Fixed(sensor.rule.width()))
                    .push_u8(index as u8))
            }
            CommandArgs::PresetRead(index) => {
                let field = self.preset_field(index)?;
                Ok(CommandFrame::new(opcode, ResponseLen::Fixed(field.kind.width()))
                    .push_u8(index as u8))
            }
            CommandArgs::PresetWrite(index, value) => {
                let field = self.preset_field(index)?;
                let bytes = encode_field_value(field, value)?;
                Ok(CommandFrame::new(opcode, ResponseLen::Fixed(1))
                    .push_u8(index as u8)
                    .push_bytes(&bytes))
            }
            CommandArgs::FlashRead(index) => {
                Ok(CommandFrame::new(opcode, ResponseLen::Prefixed).push_u32_le(index))
            }
        }
    }

    /// Decode a sensor response into its display value.
    pub fn decode_sensor(
        &self,
        sensor: &Sensor,
        resp: &ResponseFrame,
    ) -> Result<f64, CodecError> {
        let expected = sensor.rule.width();
        let payload = complete_payload(resp, expected)?;

        let raw = match sensor.rule.kind {
            SensorKind::U8 => payload[0] as f64,
            SensorKind::U16 => LittleEndian::read_u16(payload) as f64,
            SensorKind::U32 => LittleEndian::read_u32(payload) as f64,
            SensorKind::I16 => LittleEndian::read_i16(payload) as f64,
            SensorKind::I32 => LittleEndian::read_i32(payload) as f64,
            SensorKind::F32 => LittleEndian::read_f32(payload) as f64,
        };

        Ok(sensor.rule.raw_to_display(raw))
    }

    /// Decode a preset field read response.
    pub fn decode_preset_field(
        &self,
        field: &PresetField,
        resp: &ResponseFrame,
    ) -> Result<PresetValue, CodecError> {
        let payload = complete_payload(resp, field.kind.width())?;
        decode_field_bytes(field, payload)
    }

    /// Decode a preset write acknowledgement: one status byte, zero on
    /// success, a field-specific rejection code otherwise.
    pub fn decode_write_ack(&self, resp: &ResponseFrame) -> Result<(), CodecError> {
        let payload = complete_payload(resp, 1)?;
        match payload[0] {
            0 => Ok(()),
            code => Err(CodecError::Rejected(code)),
        }
    }

    /// Decode a flash record response. `Ok(None)` is the end-of-data
    /// sentinel; otherwise the payload is returned after CRC verification.
    pub fn decode_flash_record(
        &self,
        resp: &ResponseFrame,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        let bytes = match &resp.outcome {
            Outcome::Ok(b) => b,
            Outcome::Incomplete(b) => {
                return Err(CodecError::Malformed {
                    expected: b.len() + 1,
                    actual: b.len(),
                })
            }
            Outcome::Timeout => return Err(CodecError::Timeout),
            Outcome::Malformed => {
                return Err(CodecError::Malformed {
                    expected: self.profile.max_flash_record,
                    actual: 0,
                })
            }
        };

        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes.len() < 5 {
            return Err(CodecError::Malformed {
                expected: 5,
                actual: bytes.len(),
            });
        }

        let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
        if payload.len() > self.profile.max_flash_record {
            return Err(CodecError::Malformed {
                expected: self.profile.max_flash_record,
                actual: payload.len(),
            });
        }

        let actual = LittleEndian::read_u32(crc_bytes);
        let expected = super::frame::record_crc(payload);
        if actual != expected {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }

        Ok(Some(payload.to_vec()))
    }
}

/// Extract a complete payload of the expected width, mapping every other
/// outcome to the matching codec error.
fn complete_payload(resp: &ResponseFrame, expected: usize) -> Result<&[u8], CodecError> {
    match &resp.outcome {
        Outcome::Ok(p) if p.len() == expected => Ok(p),
        Outcome::Ok(p) => Err(CodecError::Malformed {
            expected,
            actual: p.len(),
        }),
        Outcome::Incomplete(p) => Err(CodecError::Malformed {
            expected,
            actual: p.len(),
        }),
        Outcome::Timeout => Err(CodecError::Timeout),
        Outcome::Malformed => Err(CodecError::Malformed {
            expected,
            actual: 0,
        }),
    }
}

/// Encode a preset value into its field's wire bytes.
pub fn encode_field_value(
    field: &PresetField,
    value: &PresetValue,
) -> Result<Vec<u8>, CodecError> {
    let mut bytes = vec![0u8; field.kind.width()];
    match (field.kind, value) {
        (FieldKind::U8, PresetValue::Int(v)) => {
            let v = u8::try_from(*v).map_err(|_| out_of_width(field, value))?;
            bytes[0] = v;
        }
        (FieldKind::U16, PresetValue::Int(v)) => {
            let v = u16::try_from(*v).map_err(|_| out_of_width(field, value))?;
            LittleEndian::write_u16(&mut bytes, v);
        }
        (FieldKind::U32, PresetValue::Int(v)) => {
            let v = u32::try_from(*v).map_err(|_| out_of_width(field, value))?;
            LittleEndian::write_u32(&mut bytes, v);
        }
        (FieldKind::I16, PresetValue::Int(v)) => {
            let v = i16::try_from(*v).map_err(|_| out_of_width(field, value))?;
            LittleEndian::write_i16(&mut bytes, v);
        }
        (FieldKind::F32, PresetValue::Float(v)) => {
            LittleEndian::write_f32(&mut bytes, *v);
        }
        _ => return Err(out_of_width(field, value)),
    }
    Ok(bytes)
}

/// Decode a field's wire bytes into a preset value.
pub fn decode_field_bytes(field: &PresetField, bytes: &[u8]) -> Result<PresetValue, CodecError> {
    if bytes.len() != field.kind.width() {
        return Err(CodecError::Malformed {
            expected: field.kind.width(),
            actual: bytes.len(),
        });
    }
    Ok(match field.kind {
        FieldKind::U8 => PresetValue::Int(bytes[0] as i64),
        FieldKind::U16 => PresetValue::Int(LittleEndian::read_u16(bytes) as i64),
        FieldKind::U32 => PresetValue::Int(LittleEndian::read_u32(bytes) as i64),
        FieldKind::I16 => PresetValue::Int(LittleEndian::read_i16(bytes) as i64),
        FieldKind::F32 => PresetValue::Float(LittleEndian::read_f32(bytes)),
    })
}

fn out_of_width(field: &PresetField, value: &PresetValue) -> CodecError {
    CodecError::InvalidArgument(format!(
        "value {:?} does not fit field '{}' ({:?})",
        value, field.name, field.kind
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::DeviceProfile;
    use pretty_assertions::assert_eq;

    fn profile() -> DeviceProfile {
        DeviceProfile::flight_computer_rev2()
    }

    #[test]
    fn unknown_command_is_surfaced() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);
        assert!(matches!(
            codec.encode("warp_drive", CommandArgs::None),
            Err(CodecError::UnknownCommand(_))
        ));
    }

    #[test]
    fn sensor_frame_carries_id_and_width() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);
        let frame = codec.encode("sensor_read", CommandArgs::Sensor(2)).unwrap();
        assert_eq!(frame.payload, vec![2]);
        assert_eq!(
            frame.expect,
            ResponseLen::Fixed(profile.sensors[2].rule.width())
        );
    }

    #[test]
    fn field_value_roundtrips_every_kind() {
        let profile = profile();
        for (i, field) in profile.preset_fields.iter().enumerate() {
            let value = if field.kind.is_float() {
                PresetValue::Float(42.5)
            } else {
                PresetValue::Int(field.min as i64 + 1)
            };
            let bytes = encode_field_value(field, &value)
                .unwrap_or_else(|e| panic!("encode field {i}: {e}"));
            let back = decode_field_bytes(field, &bytes)
                .unwrap_or_else(|e| panic!("decode field {i}: {e}"));
            assert_eq!(back, value, "field {}", field.name);
        }
    }

    #[test]
    fn sensor_decode_applies_scale() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);
        // batt_voltage: U16, scale 0.001
        let (i, sensor) = profile
            .sensors
            .iter()
            .enumerate()
            .find(|(_, s)| s.name == "batt_voltage")
            .unwrap();
        let frame = codec.encode("sensor_read", CommandArgs::Sensor(i)).unwrap();
        assert_eq!(frame.expect, ResponseLen::Fixed(2));

        let resp = ResponseFrame::ok(vec![0x10, 0x0E]); // 3600 raw
        let v = codec.decode_sensor(sensor, &resp).unwrap();
        assert!((v - 3.6).abs() < 1e-9);
    }

    #[test]
    fn sensor_decode_width_mismatch_is_malformed() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);
        let sensor = &profile.sensors[0];
        let resp = ResponseFrame::ok(vec![0x01]); // I16 sensor, one byte
        assert!(matches!(
            codec.decode_sensor(sensor, &resp),
            Err(CodecError::Malformed { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn write_ack_status_codes() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);
        assert!(codec.decode_write_ack(&ResponseFrame::ok(vec![0])).is_ok());
        assert!(matches!(
            codec.decode_write_ack(&ResponseFrame::ok(vec![2])),
            Err(CodecError::Rejected(2))
        ));
        assert!(matches!(
            codec.decode_write_ack(&ResponseFrame::timeout()),
            Err(CodecError::Timeout)
        ));
    }

    #[test]
    fn flash_record_crc_verification() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);

        let payload = vec![9, 8, 7, 6];
        let mut wire = crate::protocol::frame::encode_record(&payload);
        // send() strips the length byte before handing bytes to the codec
        wire.remove(0);

        let resp = ResponseFrame::ok(wire.clone());
        assert_eq!(codec.decode_flash_record(&resp).unwrap(), Some(payload));

        let mut corrupted = wire;
        corrupted[1] ^= 0xFF;
        let resp = ResponseFrame::ok(corrupted);
        assert!(matches!(
            codec.decode_flash_record(&resp),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn flash_sentinel_decodes_to_none() {
        let profile = profile();
        let codec = CommandCodec::new(&profile);
        assert_eq!(
            codec.decode_flash_record(&ResponseFrame::ok(vec![])).unwrap(),
            None
        );
    }
}
