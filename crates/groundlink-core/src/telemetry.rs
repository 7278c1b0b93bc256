//! Telemetry polling
//!
//! One `dump` is a synchronous snapshot of every sensor in the profile; a
//! `poll` is a lazy, bounded sequence of dumps. A failed sensor read leaves a
//! hole in the snapshot instead of blanking the whole frame: partial
//! telemetry is more useful than none.

use std::time::{Duration, Instant};

use crate::profile::{DeviceProfile, Sensor};
use crate::protocol::{CommandArgs, CommandCodec, SerialSession, SessionError};

/// One sensor's slot in a snapshot.
///
/// `value` is `None` when the read for this sensor failed to decode or timed
/// out. Absent is not zero: a sensor that legitimately reads 0.0 carries
/// `Some(0.0)`. Display layers may choose to render both the same way, but
/// the distinction is preserved here.
#[derive(Debug, Clone, Copy)]
pub struct Readout<'p> {
    /// The sensor this slot belongs to.
    pub sensor: &'p Sensor,
    /// Decoded display value, absent on a per-sensor failure.
    pub value: Option<f64>,
}

/// A snapshot of all sensors, in profile order.
#[derive(Debug, Clone)]
pub struct SensorDump<'p> {
    readouts: Vec<Readout<'p>>,
}

impl<'p> SensorDump<'p> {
    /// Iterate readouts in profile order.
    pub fn iter(&self) -> impl Iterator<Item = &Readout<'p>> {
        self.readouts.iter()
    }

    /// Look up one readout by sensor name.
    pub fn get(&self, name: &str) -> Option<&Readout<'p>> {
        self.readouts.iter().find(|r| r.sensor.name == name)
    }

    /// Number of sensors in the snapshot.
    pub fn len(&self) -> usize {
        self.readouts.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.readouts.is_empty()
    }
}

/// Stop condition for a poll sequence.
///
/// Exactly one bound applies to any poll; there is no unbounded variant.
#[derive(Debug, Clone, Copy)]
pub enum PollLimit {
    /// Yield exactly this many frames.
    Count(usize),
    /// Yield frames until this much time has passed since the first frame
    /// started.
    Deadline(Duration),
}

/// Issues repeated sensor reads through a session.
#[derive(Debug, Clone)]
pub struct TelemetryPoller<'p> {
    profile: &'p DeviceProfile,
    codec: CommandCodec<'p>,
}

impl<'p> TelemetryPoller<'p> {
    /// Poller over a profile's sensor set.
    pub fn new(profile: &'p DeviceProfile) -> Self {
        Self {
            profile,
            codec: CommandCodec::new(profile),
        }
    }

    /// Read every sensor once, in profile order.
    ///
    /// A decode failure or timeout for one sensor yields an absent-value
    /// [`Readout`] for that sensor and the dump continues; only a session
    /// fault aborts.
    pub fn dump(&self, session: &mut SerialSession) -> Result<SensorDump<'p>, SessionError> {
        let mut readouts = Vec::with_capacity(self.profile.sensors.len());

        for (id, sensor) in self.profile.sensors.iter().enumerate() {
            let value = match self.codec.encode("sensor_read", CommandArgs::Sensor(id)) {
                Ok(frame) => {
                    let resp = session.send(&frame)?;
                    match self.codec.decode_sensor(sensor, &resp) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            tracing::debug!(sensor = sensor.name, "readout dropped: {}", e);
                            None
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(sensor = sensor.name, "could not encode read: {}", e);
                    None
                }
            };
            readouts.push(Readout { sensor, value });
        }

        Ok(SensorDump { readouts })
    }

    /// Lazily produce a bounded sequence of dumps.
    ///
    /// Each `next()` performs exactly one dump; abandoning the iterator does
    /// no further I/O, and calling `poll` again starts a fresh sequence. The
    /// sequence ends early if the session leaves the open state; the fault,
    /// if any, is available from [`Poll::fault`] afterwards.
    pub fn poll<'s>(
        &'s self,
        session: &'s mut SerialSession,
        limit: PollLimit,
    ) -> Poll<'p, 's> {
        Poll {
            poller: self,
            session,
            limit,
            yielded: 0,
            first_frame_at: None,
            fault: None,
        }
    }
}

/// Lazy poll sequence; see [`TelemetryPoller::poll`].
pub struct Poll<'p, 's> {
    poller: &'s TelemetryPoller<'p>,
    session: &'s mut SerialSession,
    limit: PollLimit,
    yielded: usize,
    first_frame_at: Option<Instant>,
    fault: Option<SessionError>,
}

impl<'p, 's> Poll<'p, 's> {
    /// The session fault that cut the sequence short, if any.
    pub fn fault(&self) -> Option<&SessionError> {
        self.fault.as_ref()
    }
}

impl<'p, 's> Iterator for Poll<'p, 's> {
    type Item = SensorDump<'p>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.limit {
            PollLimit::Count(n) => {
                if self.yielded >= n {
                    return None;
                }
            }
            PollLimit::Deadline(deadline) => {
                if let Some(first) = self.first_frame_at {
                    if first.elapsed() >= deadline {
                        return None;
                    }
                }
            }
        }

        if !self.session.is_open() {
            return None;
        }

        if self.first_frame_at.is_none() {
            self.first_frame_at = Some(Instant::now());
        }

        match self.poller.dump(self.session) {
            Ok(dump) => {
                self.yielded += 1;
                Some(dump)
            }
            Err(e) => {
                tracing::warn!("poll aborted: {}", e);
                self.fault = Some(e);
                None
            }
        }
    }
}
