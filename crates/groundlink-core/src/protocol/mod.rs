//! Serial device protocol
//!
//! Implements the flight computer's request/response serial protocol:
//! port enumeration, the connection state machine, frame encode/decode and
//! the single send path every higher-level operation goes through.

pub mod channel;
pub mod codec;
mod error;
pub mod frame;
pub mod serial;
mod session;

pub use channel::{Channel, SerialChannel};
pub use codec::{CommandArgs, CommandCodec};
pub use error::{CodecError, ConnectionError, SessionError};
pub use frame::{CommandFrame, Outcome, ResponseFrame, ResponseLen};
pub use serial::{list_ports, open_port, PortInfo};
pub use session::{SerialSession, SessionStatus};

/// Default response timeout in whole seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1;

/// Largest flash record payload on the wire. Profiles take their
/// [`max_flash_record`](crate::profile::DeviceProfile::max_flash_record)
/// from this bound.
pub const MAX_RECORD_PAYLOAD: usize = 192;
