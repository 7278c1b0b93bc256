//! Flash extraction
//!
//! Streams logged records out of the flight computer's flash memory and
//! reconstructs the preset section and the flight-data section. Flash is
//! append-only and order-dependent: one corrupt record invalidates
//! everything after it, so extraction is all-or-nothing.

use std::fs;
use std::path::Path;

use super::preset::{self, Preset};
use super::{PersistError, TransferError};
use crate::profile::DeviceProfile;
use crate::protocol::{CommandArgs, CommandCodec, SerialSession};

/// The reconstructed contents of the device's flash memory.
#[derive(Debug, Clone)]
pub struct FlashImage {
    /// Raw record payloads, in device order, boundary marker included.
    pub records: Vec<Vec<u8>>,
    /// Preset decoded from the preset section, when the device had
    /// committed one (the firmware writes the boundary marker at
    /// preset-commit, so a never-configured device yields `None`).
    pub preset: Option<Preset>,
    /// Concatenated flight-data section bytes.
    pub data: Vec<u8>,
}

impl FlashImage {
    /// Persist the reconstructed preset to a JSON file.
    ///
    /// Returns `Ok(false)` when the image has no preset section. Disk
    /// failures are [`PersistError`]s; they never invalidate the extraction
    /// this image came from.
    pub fn store_preset(&self, path: impl AsRef<Path>) -> Result<bool, PersistError> {
        match &self.preset {
            Some(preset) => {
                preset.save(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Persist the raw data section bytes, verbatim.
    pub fn store_data(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        fs::write(path, &self.data)?;
        Ok(())
    }
}

/// Streams flash records out of a device.
#[derive(Debug, Clone)]
pub struct FlashExtractor<'p> {
    profile: &'p DeviceProfile,
    codec: CommandCodec<'p>,
}

impl<'p> FlashExtractor<'p> {
    /// Extractor over a profile's flash layout.
    pub fn new(profile: &'p DeviceProfile) -> Self {
        Self {
            profile,
            codec: CommandCodec::new(profile),
        }
    }

    /// Read every flash record until the device's end-of-data sentinel, then
    /// reconstruct the preset and data sections.
    ///
    /// A single malformed record aborts the whole extraction with
    /// [`TransferError::CorruptFlashData`] naming its index; no partial
    /// image is ever returned.
    pub fn extract(&self, session: &mut SerialSession) -> Result<FlashImage, TransferError> {
        let mut records = Vec::new();

        for index in 0u32.. {
            let frame = self
                .codec
                .encode("flash_read", CommandArgs::FlashRead(index))?;
            let resp = session.send(&frame)?;
            match self.codec.decode_flash_record(&resp) {
                Ok(None) => break,
                Ok(Some(payload)) => records.push(payload),
                Err(e) => {
                    tracing::warn!(record = index, "extraction aborted: {}", e);
                    return Err(TransferError::CorruptFlashData {
                        index: index as usize,
                    });
                }
            }
        }

        tracing::debug!(records = records.len(), "flash read complete");
        self.reconstruct(records)
    }

    /// Split accumulated records at the profile's boundary marker and decode
    /// the preset section.
    fn reconstruct(&self, records: Vec<Vec<u8>>) -> Result<FlashImage, TransferError> {
        let boundary = records
            .iter()
            .position(|r| r[..] == *self.profile.flash_boundary);

        let (preset, data) = match boundary {
            Some(marker) => {
                let preset_bytes: Vec<u8> =
                    records[..marker].iter().flatten().copied().collect();
                if preset_bytes.len() != self.profile.preset_len() {
                    // The section before the marker must span the full
                    // preset layout, or the log is unusable from there on.
                    return Err(TransferError::CorruptFlashData { index: marker });
                }
                let preset = preset::decode_packed(self.profile, &preset_bytes)
                    .map_err(|_| TransferError::CorruptFlashData { index: marker })?;
                let data = records[marker + 1..]
                    .iter()
                    .flatten()
                    .copied()
                    .collect();
                (Some(preset), data)
            }
            None => (None, records.iter().flatten().copied().collect()),
        };

        Ok(FlashImage {
            records,
            preset,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDevice;
    use crate::transfer::preset::encode_packed;
    use crate::transfer::{Preset, PresetTransfer, PresetValue};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn stored_preset(profile: &DeviceProfile) -> Preset {
        let mut preset = Preset::new(profile);
        for field in &profile.preset_fields {
            let value = if field.kind.is_float() {
                PresetValue::Float(field.min as f32 + 2.0)
            } else {
                PresetValue::Int(field.min as i64 + 2)
            };
            preset.set(field.name, value);
        }
        preset
    }

    fn bench(profile: &DeviceProfile) -> (SimDevice, SerialSession) {
        let sim = SimDevice::new(profile);
        let mut session = SerialSession::new();
        session
            .open_channel(Box::new(sim.clone()), Duration::from_millis(50))
            .expect("open_channel");
        (sim, session)
    }

    fn program(sim: &SimDevice, profile: &DeviceProfile, preset: &Preset, data: &[&[u8]]) {
        let mut records: Vec<Vec<u8>> = Vec::new();
        let packed = encode_packed(profile, preset).expect("pack");
        // Firmware writes the preset section in two records
        let split = packed.len() / 2;
        records.push(packed[..split].to_vec());
        records.push(packed[split..].to_vec());
        records.push(profile.flash_boundary.to_vec());
        records.extend(data.iter().map(|d| d.to_vec()));
        sim.load_flash(records);
    }

    #[test]
    fn extract_reconstructs_both_sections() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);
        let preset = stored_preset(&profile);
        program(&sim, &profile, &preset, &[b"alt:100", b"alt:250"]);

        let extractor = FlashExtractor::new(&profile);
        let image = extractor.extract(&mut session).expect("extract");

        assert_eq!(image.preset.as_ref(), Some(&preset));
        assert_eq!(image.data, b"alt:100alt:250".to_vec());
        assert_eq!(image.records.len(), 5);
    }

    #[test]
    fn image_without_boundary_has_no_preset() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);
        sim.load_flash(vec![b"raw0".to_vec(), b"raw1".to_vec()]);

        let extractor = FlashExtractor::new(&profile);
        let image = extractor.extract(&mut session).expect("extract");
        assert!(image.preset.is_none());
        assert_eq!(image.data, b"raw0raw1".to_vec());
    }

    #[test]
    fn truncated_record_names_its_index() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);
        let preset = stored_preset(&profile);
        program(&sim, &profile, &preset, &[b"alt:100", b"alt:250"]);
        sim.truncate_flash_record(3);

        let extractor = FlashExtractor::new(&profile);
        match extractor.extract(&mut session) {
            Err(TransferError::CorruptFlashData { index }) => assert_eq!(index, 3),
            other => panic!("expected CorruptFlashData, got {other:?}"),
        }
    }

    #[test]
    fn corrupted_crc_names_its_index() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);
        let preset = stored_preset(&profile);
        program(&sim, &profile, &preset, &[b"alt:100"]);
        sim.corrupt_flash_record(1);

        let extractor = FlashExtractor::new(&profile);
        match extractor.extract(&mut session) {
            Err(TransferError::CorruptFlashData { index }) => assert_eq!(index, 1),
            other => panic!("expected CorruptFlashData, got {other:?}"),
        }
    }

    #[test]
    fn short_preset_section_is_corrupt_at_marker() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);
        sim.load_flash(vec![
            vec![1, 2, 3], // too short for the preset layout
            profile.flash_boundary.to_vec(),
            b"data".to_vec(),
        ]);

        let extractor = FlashExtractor::new(&profile);
        match extractor.extract(&mut session) {
            Err(TransferError::CorruptFlashData { index }) => assert_eq!(index, 1),
            other => panic!("expected CorruptFlashData, got {other:?}"),
        }
    }

    #[test]
    fn flash_preset_matches_uploaded_preset() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);

        let transfer = PresetTransfer::new(&profile);
        let preset = stored_preset(&profile);
        transfer.upload(&mut session, &preset).expect("upload");
        sim.commit_preset_to_flash();

        let extractor = FlashExtractor::new(&profile);
        let image = extractor.extract(&mut session).expect("extract");
        let flash_preset = image.preset.expect("preset section");
        assert!(transfer
            .verify(&flash_preset, &mut session)
            .expect("verify"));
    }

    #[test]
    fn store_outputs_are_independent() {
        let profile = DeviceProfile::flight_computer_rev2();
        let (sim, mut session) = bench(&profile);
        let preset = stored_preset(&profile);
        program(&sim, &profile, &preset, &[b"flight-data"]);

        let extractor = FlashExtractor::new(&profile);
        let image = extractor.extract(&mut session).expect("extract");

        let dir = tempfile::tempdir().expect("tempdir");
        let preset_path = dir.path().join("preset.json");
        let data_path = dir.path().join("flight.bin");

        assert!(image.store_preset(&preset_path).expect("store_preset"));
        image.store_data(&data_path).expect("store_data");

        let loaded = Preset::load(&preset_path, &profile).expect("load");
        assert_eq!(loaded, preset);
        assert_eq!(std::fs::read(&data_path).unwrap(), b"flight-data".to_vec());
    }
}
