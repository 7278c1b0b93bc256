//! # GroundLink Core Library
//!
//! Ground support functionality for rocket flight computers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port enumeration and the connection state machine
//! - The flight computer's request/response serial protocol
//! - Bounded telemetry polling (sensor dumps and frame streams)
//! - Preset upload/download/verification and JSON persistence
//! - Flash extraction with CRC-verified records
//! - A bench simulator for development without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use groundlink_core::prelude::*;
//!
//! // Connect to a flight computer
//! let profile = DeviceProfile::flight_computer_rev2();
//! let mut session = SerialSession::new();
//! session.open("/dev/ttyACM0", profile.baud, 1)?;
//!
//! // Dump every sensor once
//! let poller = TelemetryPoller::new(&profile);
//! let dump = poller.dump(&mut session)?;
//! for readout in dump.iter() {
//!     println!("{}: {:?} {}", readout.sensor.name, readout.value, readout.sensor.unit);
//! }
//! ```

pub mod profile;
pub mod protocol;
pub mod sim;
pub mod telemetry;
pub mod transfer;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::profile::{DeviceKind, DeviceProfile, PresetField, Sensor};
    pub use crate::protocol::{
        CommandCodec, ConnectionError, PortInfo, SerialSession, SessionError, SessionStatus,
    };
    pub use crate::sim::SimDevice;
    pub use crate::telemetry::{PollLimit, SensorDump, TelemetryPoller};
    pub use crate::transfer::{
        FlashExtractor, FlashImage, Preset, PresetTransfer, PresetValue, TransferError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
