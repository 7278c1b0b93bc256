//! Bench device simulator
//!
//! A software stand-in for a flight computer on the bench: implements
//! [`Channel`] and models the firmware's command handling: sensor reads,
//! preset storage with range enforcement, and the flash record store. Used
//! by the test suite as the device stub and available as a demo-mode
//! collaborator for tooling built on this crate.
//!
//! The handle is cheap to clone; all clones share one device state, so a
//! test can keep a handle for fault injection after moving one into a
//! session.

use byteorder::{ByteOrder, LittleEndian};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::profile::{DeviceProfile, SensorKind};
use crate::protocol::frame::encode_record;
use crate::protocol::Channel;

/// Shared-handle simulator; see the module docs.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    profile: DeviceProfile,
    /// Raw wire value per sensor, profile order.
    sensors_raw: Vec<f64>,
    muted_sensors: HashSet<usize>,
    muted_fields: HashSet<usize>,
    /// Stored wire bytes per preset field, profile order.
    fields: Vec<Vec<u8>>,
    flash: Vec<Vec<u8>>,
    truncate_at: Option<usize>,
    corrupt_at: Option<usize>,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    round_trips: usize,
    latency: Duration,
    fail_after: Option<usize>,
    failed: bool,
}

impl SimDevice {
    /// Simulated device for a profile, with plausible idle sensor values
    /// and every preset field at its minimum.
    pub fn new(profile: &DeviceProfile) -> Self {
        let mut rng = StdRng::seed_from_u64(0x6C6B);
        let sensors_raw = profile
            .sensors
            .iter()
            .map(|s| {
                // Sit somewhere benign inside the representable range
                let nominal = match s.name {
                    "accel_z" => s.rule.display_to_raw(9.81),
                    "baro_pressure" => s.rule.display_to_raw(101.3),
                    "baro_temp" => s.rule.display_to_raw(21.0),
                    "batt_voltage" => s.rule.display_to_raw(8.2),
                    _ => 0.0,
                };
                nominal + rng.gen_range(-2.0..2.0)
            })
            .collect();

        let fields = profile
            .preset_fields
            .iter()
            .map(|f| {
                let mut bytes = vec![0u8; f.kind.width()];
                encode_raw_field(f.kind, f.min, &mut bytes);
                bytes
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(SimState {
                profile: profile.clone(),
                sensors_raw,
                muted_sensors: HashSet::new(),
                muted_fields: HashSet::new(),
                fields,
                flash: Vec::new(),
                truncate_at: None,
                corrupt_at: None,
                rx: Vec::new(),
                tx: VecDeque::new(),
                round_trips: 0,
                latency: Duration::ZERO,
                fail_after: None,
                failed: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }

    /// Pin a sensor to an exact display value.
    pub fn set_sensor(&self, index: usize, display: f64) {
        let mut state = self.lock();
        let raw = state.profile.sensors[index].rule.display_to_raw(display);
        state.sensors_raw[index] = raw;
    }

    /// Make a sensor stop answering reads.
    pub fn mute_sensor(&self, index: usize) {
        self.lock().muted_sensors.insert(index);
    }

    /// Make a preset field stop answering reads.
    pub fn mute_preset_field(&self, index: usize) {
        self.lock().muted_fields.insert(index);
    }

    /// Add a fixed delay before each command is serviced.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Fault the link permanently after this many commands.
    pub fn fail_after(&self, commands: usize) {
        self.lock().fail_after = Some(commands);
    }

    /// Number of commands serviced so far.
    pub fn round_trips(&self) -> usize {
        self.lock().round_trips
    }

    /// Replace the flash record store.
    pub fn load_flash(&self, records: Vec<Vec<u8>>) {
        self.lock().flash = records;
    }

    /// Serve this flash record truncated mid-frame.
    pub fn truncate_flash_record(&self, index: usize) {
        self.lock().truncate_at = Some(index);
    }

    /// Serve this flash record with a flipped payload byte.
    pub fn corrupt_flash_record(&self, index: usize) {
        self.lock().corrupt_at = Some(index);
    }

    /// Write the stored preset and boundary marker to flash, the way the
    /// firmware does at preset-commit.
    pub fn commit_preset_to_flash(&self) {
        let mut state = self.lock();
        let packed: Vec<u8> = state.fields.iter().flatten().copied().collect();
        let split = packed.len() / 2;
        let boundary = state.profile.flash_boundary.to_vec();
        state.flash = vec![packed[..split].to_vec(), packed[split..].to_vec(), boundary];
    }
}

impl Channel for SimDevice {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link faulted"));
        }
        if !state.latency.is_zero() {
            std::thread::sleep(state.latency);
        }
        state.rx.extend_from_slice(buf);
        state.service_commands();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link faulted"));
        }
        let mut n = 0;
        while n < buf.len() {
            match state.tx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.lock();
        if state.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link faulted"));
        }
        Ok(state.tx.len() as u32)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.rx.clear();
        state.tx.clear();
        Ok(())
    }
}

impl SimState {
    /// Parse and service every complete command sitting in `rx`.
    fn service_commands(&mut self) {
        loop {
            let Some(&opcode) = self.rx.first() else { break };
            let consumed = match opcode {
                0x01 => self.serve_ping(),
                0x20 => self.serve_sensor_read(),
                0x30 => self.serve_preset_read(),
                0x31 => self.serve_preset_write(),
                0x40 => self.serve_flash_read(),
                _ => {
                    // Unknown opcode: drop it and resync
                    Some(1)
                }
            };
            match consumed {
                Some(n) => {
                    self.rx.drain(..n);
                    self.round_trips += 1;
                    if let Some(limit) = self.fail_after {
                        if self.round_trips >= limit {
                            self.failed = true;
                            self.tx.clear();
                            break;
                        }
                    }
                }
                None => break, // incomplete command, wait for more bytes
            }
        }
    }

    fn serve_ping(&mut self) -> Option<usize> {
        self.tx.push_back(0);
        Some(1)
    }

    fn serve_sensor_read(&mut self) -> Option<usize> {
        if self.rx.len() < 2 {
            return None;
        }
        let index = self.rx[1] as usize;
        if let Some(sensor) = self.profile.sensors.get(index) {
            if !self.muted_sensors.contains(&index) {
                let raw = self.sensors_raw[index];
                let mut bytes = vec![0u8; sensor.rule.width()];
                encode_raw_sensor(sensor.rule.kind, raw, &mut bytes);
                self.tx.extend(bytes);
            }
        }
        Some(2)
    }

    fn serve_preset_read(&mut self) -> Option<usize> {
        if self.rx.len() < 2 {
            return None;
        }
        let index = self.rx[1] as usize;
        if index < self.fields.len() && !self.muted_fields.contains(&index) {
            let bytes = self.fields[index].clone();
            self.tx.extend(bytes);
        }
        Some(2)
    }

    fn serve_preset_write(&mut self) -> Option<usize> {
        if self.rx.len() < 2 {
            return None;
        }
        let index = self.rx[1] as usize;
        let Some(field) = self.profile.preset_fields.get(index) else {
            self.tx.push_back(1);
            return Some(2);
        };
        let width = field.kind.width();
        if self.rx.len() < 2 + width {
            return None;
        }
        let bytes = self.rx[2..2 + width].to_vec();
        let value = decode_raw_field(field.kind, &bytes);
        if value >= field.min && value <= field.max {
            self.fields[index] = bytes;
            self.tx.push_back(0);
        } else {
            self.tx.push_back(1);
        }
        Some(2 + width)
    }

    fn serve_flash_read(&mut self) -> Option<usize> {
        if self.rx.len() < 5 {
            return None;
        }
        let index = LittleEndian::read_u32(&self.rx[1..5]) as usize;
        match self.flash.get(index) {
            Some(payload) => {
                let mut wire = if self.corrupt_at == Some(index) {
                    let mut wire = encode_record(payload);
                    wire[1] ^= 0xFF; // flip a payload byte, CRC now stale
                    wire
                } else {
                    encode_record(payload)
                };
                if self.truncate_at == Some(index) {
                    wire.truncate(wire.len().saturating_sub(3));
                }
                self.tx.extend(wire);
            }
            None => self.tx.push_back(0), // end-of-data sentinel
        }
        Some(5)
    }
}

fn encode_raw_sensor(kind: SensorKind, raw: f64, bytes: &mut [u8]) {
    match kind {
        SensorKind::U8 => bytes[0] = raw.round().clamp(0.0, u8::MAX as f64) as u8,
        SensorKind::U16 => LittleEndian::write_u16(
            bytes,
            raw.round().clamp(0.0, u16::MAX as f64) as u16,
        ),
        SensorKind::U32 => LittleEndian::write_u32(
            bytes,
            raw.round().clamp(0.0, u32::MAX as f64) as u32,
        ),
        SensorKind::I16 => LittleEndian::write_i16(
            bytes,
            raw.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16,
        ),
        SensorKind::I32 => LittleEndian::write_i32(
            bytes,
            raw.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
        ),
        SensorKind::F32 => LittleEndian::write_f32(bytes, raw as f32),
    }
}

fn encode_raw_field(kind: crate::profile::FieldKind, value: f64, bytes: &mut [u8]) {
    use crate::profile::FieldKind;
    match kind {
        FieldKind::U8 => bytes[0] = value.round() as u8,
        FieldKind::U16 => LittleEndian::write_u16(bytes, value.round() as u16),
        FieldKind::U32 => LittleEndian::write_u32(bytes, value.round() as u32),
        FieldKind::I16 => LittleEndian::write_i16(bytes, value.round() as i16),
        FieldKind::F32 => LittleEndian::write_f32(bytes, value as f32),
    }
}

fn decode_raw_field(kind: crate::profile::FieldKind, bytes: &[u8]) -> f64 {
    use crate::profile::FieldKind;
    match kind {
        FieldKind::U8 => bytes[0] as f64,
        FieldKind::U16 => LittleEndian::read_u16(bytes) as f64,
        FieldKind::U32 => LittleEndian::read_u32(bytes) as f64,
        FieldKind::I16 => LittleEndian::read_i16(bytes) as f64,
        FieldKind::F32 => LittleEndian::read_f32(bytes) as f64,
    }
}
