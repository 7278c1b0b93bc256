//! Preset handling
//!
//! A preset is the named set of configurable parameters stored on the flight
//! computer. This module holds the in-memory form, the JSON file form and
//! the transfer workflow (upload, download, verify) against a device.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{PersistError, TransferError};
use crate::profile::{DeviceProfile, FieldKind};
use crate::protocol::codec::{self, CommandCodec};
use crate::protocol::{CodecError, CommandArgs, SerialSession};

/// Preset file format version.
pub const PRESET_FILE_VERSION: &str = "1.0";

/// One decoded preset field value.
///
/// Configuration values are discrete: equality is exact, with floats
/// compared by bit pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetValue {
    /// Any integer-kind field.
    Int(i64),
    /// An F32 field.
    Float(f32),
}

impl PartialEq for PresetValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PresetValue::Int(a), PresetValue::Int(b)) => a == b,
            (PresetValue::Float(a), PresetValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for PresetValue {}

impl std::fmt::Display for PresetValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresetValue::Int(v) => write!(f, "{v}"),
            PresetValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl PresetValue {
    /// The value as f64, for range checks.
    pub fn as_f64(&self) -> f64 {
        match self {
            PresetValue::Int(v) => *v as f64,
            PresetValue::Float(v) => *v as f64,
        }
    }

    fn matches_kind(&self, kind: FieldKind) -> bool {
        match self {
            PresetValue::Int(_) => !kind.is_float(),
            PresetValue::Float(_) => kind.is_float(),
        }
    }
}

/// A full set of preset field values, tagged with the profile signature it
/// was decoded against. Presets from different profiles are not comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    signature: String,
    values: BTreeMap<String, PresetValue>,
}

/// On-disk JSON form of a preset.
#[derive(Debug, Serialize, Deserialize)]
struct PresetFile {
    version: String,
    signature: String,
    saved_at: String,
    fields: BTreeMap<String, PresetValue>,
}

impl Preset {
    /// Empty preset targeting a profile's schema.
    pub fn new(profile: &DeviceProfile) -> Self {
        Self {
            signature: profile.signature.to_string(),
            values: BTreeMap::new(),
        }
    }

    /// The profile signature this preset targets.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Whether this preset was built against the given profile.
    pub fn matches_profile(&self, profile: &DeviceProfile) -> bool {
        self.signature == profile.signature
    }

    /// One field value by name.
    pub fn get(&self, name: &str) -> Option<&PresetValue> {
        self.values.get(name)
    }

    /// Set one field value.
    pub fn set(&mut self, name: impl Into<String>, value: PresetValue) {
        self.values.insert(name.into(), value);
    }

    /// Iterate field values in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PresetValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of populated fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no fields are populated.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write the preset to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let file = PresetFile {
            version: PRESET_FILE_VERSION.to_string(),
            signature: self.signature.clone(),
            saved_at: Utc::now().to_rfc3339(),
            fields: self.values.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a preset from a JSON file, validating it against a profile.
    ///
    /// The file must target the same profile signature and carry exactly the
    /// profile's field set with compatible value kinds. Unknown fields are a
    /// schema mismatch, never silently dropped.
    pub fn load(
        path: impl AsRef<Path>,
        profile: &DeviceProfile,
    ) -> Result<Self, TransferError> {
        let json = fs::read_to_string(path).map_err(PersistError::from)?;
        let file: PresetFile = serde_json::from_str(&json).map_err(PersistError::from)?;

        if file.signature != profile.signature {
            return Err(TransferError::SchemaMismatch(format!(
                "file targets '{}', profile is '{}'",
                file.signature, profile.signature
            )));
        }

        for name in file.fields.keys() {
            if profile.field(name).is_none() {
                return Err(TransferError::SchemaMismatch(format!(
                    "unknown field '{name}'"
                )));
            }
        }
        for field in &profile.preset_fields {
            match file.fields.get(field.name) {
                None => {
                    return Err(TransferError::SchemaMismatch(format!(
                        "missing field '{}'",
                        field.name
                    )))
                }
                Some(v) if !v.matches_kind(field.kind) => {
                    return Err(TransferError::SchemaMismatch(format!(
                        "field '{}' has the wrong value kind",
                        field.name
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            signature: file.signature,
            values: file.fields,
        })
    }
}

/// Uploads, downloads and verifies presets through a session.
///
/// The device has no atomic multi-field transaction: fields commit one at a
/// time, and a failed upload reports exactly how many made it.
#[derive(Debug, Clone)]
pub struct PresetTransfer<'p> {
    profile: &'p DeviceProfile,
    codec: CommandCodec<'p>,
}

impl<'p> PresetTransfer<'p> {
    /// Transfer workflow over a profile's preset schema.
    pub fn new(profile: &'p DeviceProfile) -> Self {
        Self {
            profile,
            codec: CommandCodec::new(profile),
        }
    }

    /// Upload every field of `preset` to the device, in profile order.
    pub fn upload(
        &self,
        session: &mut SerialSession,
        preset: &Preset,
    ) -> Result<(), TransferError> {
        if !preset.matches_profile(self.profile) {
            return Err(TransferError::SchemaMismatch(format!(
                "preset targets '{}', profile is '{}'",
                preset.signature(),
                self.profile.signature
            )));
        }

        let total = self.profile.preset_fields.len();
        for (id, field) in self.profile.preset_fields.iter().enumerate() {
            let value = preset.get(field.name).ok_or_else(|| {
                TransferError::SchemaMismatch(format!("preset is missing field '{}'", field.name))
            })?;

            let frame = self
                .codec
                .encode("preset_write", CommandArgs::PresetWrite(id, value))?;
            let resp = session.send(&frame)?;

            match self.codec.decode_write_ack(&resp) {
                Ok(()) => {
                    tracing::trace!(field = field.name, %value, "field committed");
                }
                Err(CodecError::Rejected(code)) if id == 0 => {
                    return Err(TransferError::RejectedField {
                        field: field.name.to_string(),
                        code,
                    });
                }
                Err(e) => {
                    tracing::warn!(field = field.name, "upload stopped: {}", e);
                    return Err(TransferError::PartialUpload {
                        committed: id,
                        total,
                        field: field.name.to_string(),
                    });
                }
            }
        }

        tracing::debug!(fields = total, "preset uploaded");
        Ok(())
    }

    /// Download the device's current preset, one field per command.
    ///
    /// Any field that times out or fails to decode is reported in
    /// [`TransferError::IncompleteDownload`]; a partial preset is never
    /// silently returned.
    pub fn download(&self, session: &mut SerialSession) -> Result<Preset, TransferError> {
        let mut preset = Preset::new(self.profile);
        let mut missing = Vec::new();

        for (id, field) in self.profile.preset_fields.iter().enumerate() {
            let frame = self
                .codec
                .encode("preset_read", CommandArgs::PresetRead(id))?;
            let resp = session.send(&frame)?;
            match self.codec.decode_preset_field(field, &resp) {
                Ok(value) => preset.set(field.name, value),
                Err(e) => {
                    tracing::debug!(field = field.name, "field dropped: {}", e);
                    missing.push(field.name.to_string());
                }
            }
        }

        if missing.is_empty() {
            Ok(preset)
        } else {
            Err(TransferError::IncompleteDownload { missing })
        }
    }

    /// Download the device's preset and compare it field-by-field against a
    /// reference. Exact comparison, no tolerance: these are discrete
    /// configuration values.
    pub fn verify(
        &self,
        reference: &Preset,
        session: &mut SerialSession,
    ) -> Result<bool, TransferError> {
        if !reference.matches_profile(self.profile) {
            return Err(TransferError::SchemaMismatch(format!(
                "reference targets '{}', profile is '{}'",
                reference.signature(),
                self.profile.signature
            )));
        }

        let current = self.download(session)?;
        Ok(self
            .profile
            .preset_fields
            .iter()
            .all(|f| current.get(f.name) == reference.get(f.name)))
    }
}

/// Decode a packed preset image (e.g. the preset section of a flash dump)
/// into a [`Preset`], using the profile's field offsets.
pub(crate) fn decode_packed(
    profile: &DeviceProfile,
    bytes: &[u8],
) -> Result<Preset, CodecError> {
    let mut preset = Preset::new(profile);
    for (id, field) in profile.preset_fields.iter().enumerate() {
        let offset = profile
            .field_offset(id)
            .ok_or_else(|| CodecError::InvalidArgument(format!("no preset field with id {id}")))?;
        let width = field.kind.width();
        let slice = bytes
            .get(offset..offset + width)
            .ok_or(CodecError::Malformed {
                expected: profile.preset_len(),
                actual: bytes.len(),
            })?;
        preset.set(field.name, codec::decode_field_bytes(field, slice)?);
    }
    Ok(preset)
}

/// Encode a preset into its packed image, profile order. The inverse of
/// [`decode_packed`]; the test suites use it to program simulated flash.
#[cfg(test)]
pub(crate) fn encode_packed(
    profile: &DeviceProfile,
    preset: &Preset,
) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::with_capacity(profile.preset_len());
    for field in &profile.preset_fields {
        let value = preset.get(field.name).ok_or_else(|| {
            CodecError::InvalidArgument(format!("preset is missing field '{}'", field.name))
        })?;
        bytes.extend_from_slice(&codec::encode_field_value(field, value)?);
    }
    Ok(bytes)
}
