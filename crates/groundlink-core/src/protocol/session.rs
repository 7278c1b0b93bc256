//! Session management
//!
//! Owns the byte channel and the connection state machine. Every command any
//! component issues goes through [`SerialSession::send`]; taking `&mut self`
//! there enforces the one-command-in-flight rule without locks.

use std::io;
use std::time::{Duration, Instant};

use super::channel::{Channel, SerialChannel};
use super::frame::{CommandFrame, Outcome, ResponseFrame, ResponseLen};
use super::serial::{self, PortInfo};
use super::{ConnectionError, SessionError, MAX_RECORD_PAYLOAD};

/// Interval between non-blocking read polls.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Never opened, or explicitly closed.
    Closed,
    /// Connected and ready to send.
    Open,
    /// An unrecoverable I/O fault occurred; only a fresh open recovers.
    Error,
}

/// A serial session with one flight computer.
pub struct SerialSession {
    channel: Option<Box<dyn Channel>>,
    status: SessionStatus,
    port_name: Option<String>,
    timeout: Duration,
}

impl SerialSession {
    /// New session, not yet connected.
    pub fn new() -> Self {
        Self {
            channel: None,
            status: SessionStatus::Closed,
            port_name: None,
            timeout: Duration::from_secs(super::DEFAULT_TIMEOUT_SECS),
        }
    }

    /// List available serial ports. Always succeeds; may be empty.
    pub fn list_ports() -> Vec<PortInfo> {
        serial::list_ports()
    }

    /// Open a serial port and transition to [`SessionStatus::Open`].
    ///
    /// A zero timeout is rejected before any I/O. On failure the status is
    /// left exactly as it was (a failed open never produces `Error`).
    pub fn open(
        &mut self,
        name: &str,
        baud: u32,
        timeout_secs: u64,
    ) -> Result<(), ConnectionError> {
        if timeout_secs == 0 {
            return Err(ConnectionError::InvalidTimeout);
        }

        let port = serial::open_port(name, baud)?;
        let mut channel: Box<dyn Channel> = Box::new(SerialChannel::new(port));
        if let Err(e) = channel.clear_buffers() {
            tracing::debug!("failed to clear buffers on open: {}", e);
        }

        self.channel = Some(channel);
        self.port_name = Some(name.to_string());
        self.timeout = Duration::from_secs(timeout_secs);
        self.status = SessionStatus::Open;
        tracing::debug!(port = name, baud, "serial session opened");
        Ok(())
    }

    /// Attach an already-open channel (bench simulator, tests).
    pub fn open_channel(
        &mut self,
        channel: Box<dyn Channel>,
        timeout: Duration,
    ) -> Result<(), ConnectionError> {
        if timeout.is_zero() {
            return Err(ConnectionError::InvalidTimeout);
        }
        self.channel = Some(channel);
        self.port_name = None;
        self.timeout = timeout;
        self.status = SessionStatus::Open;
        Ok(())
    }

    /// Close the session. Idempotent: closing a closed session succeeds.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        if self.channel.take().is_some() {
            tracing::debug!(port = self.port_name.as_deref(), "serial session closed");
        }
        self.port_name = None;
        self.status = SessionStatus::Closed;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Whether commands may currently be sent.
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    /// The per-command response deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name of the open port, if this session wraps a real one.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Send one command and read its response.
    ///
    /// Writes the encoded frame, then reads until the expected bytes arrive
    /// or the configured timeout elapses. An empty-handed deadline is the
    /// soft [`Outcome::Timeout`], not an error; a hard I/O fault transitions
    /// the session to [`SessionStatus::Error`].
    pub fn send(&mut self, frame: &CommandFrame) -> Result<ResponseFrame, SessionError> {
        if self.status != SessionStatus::Open {
            return Err(SessionError::NotOpen);
        }
        let timeout = self.timeout;
        let channel = self.channel.as_mut().ok_or(SessionError::NotOpen)?;

        let result = transact(channel.as_mut(), frame, timeout);
        match result {
            Ok(outcome) => Ok(ResponseFrame { outcome }),
            Err(e) => {
                tracing::warn!("I/O fault, session unusable: {}", e);
                self.status = SessionStatus::Error;
                self.channel = None;
                Err(SessionError::Io(e.to_string()))
            }
        }
    }
}

impl Default for SerialSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn transact(
    channel: &mut dyn Channel,
    frame: &CommandFrame,
    timeout: Duration,
) -> io::Result<Outcome> {
    // Discard anything a previous command left behind, e.g. a response that
    // arrived after its deadline expired. Stale bytes must never be read as
    // this command's response.
    if channel.bytes_to_read()? > 0 {
        channel.clear_buffers()?;
    }
    channel.write_all(&frame.to_bytes())?;
    let deadline = Instant::now() + timeout;

    match frame.expect {
        ResponseLen::None => Ok(Outcome::Ok(Vec::new())),
        ResponseLen::Fixed(n) => {
            let mut buf = vec![0u8; n];
            let got = read_until(channel, &mut buf, deadline)?;
            if got == n {
                Ok(Outcome::Ok(buf))
            } else if got == 0 {
                Ok(Outcome::Timeout)
            } else {
                buf.truncate(got);
                Ok(Outcome::Incomplete(buf))
            }
        }
        ResponseLen::Prefixed => read_prefixed(channel, deadline),
    }
}

/// Read a length-prefixed record: length byte, payload, 4-byte CRC.
/// A zero length byte is the end-of-data sentinel and carries no CRC.
fn read_prefixed(channel: &mut dyn Channel, deadline: Instant) -> io::Result<Outcome> {
    let mut header = [0u8; 1];
    if read_until(channel, &mut header, deadline)? == 0 {
        return Ok(Outcome::Timeout);
    }

    let len = header[0] as usize;
    if len == 0 {
        return Ok(Outcome::Ok(Vec::new()));
    }
    if len > MAX_RECORD_PAYLOAD {
        return Ok(Outcome::Malformed);
    }

    let mut buf = vec![0u8; len + 4];
    let got = read_until(channel, &mut buf, deadline)?;
    if got < buf.len() {
        buf.truncate(got);
        Ok(Outcome::Incomplete(buf))
    } else {
        Ok(Outcome::Ok(buf))
    }
}

/// Fill `buf` from the channel until full or the deadline passes, polling
/// `bytes_to_read` so no read can block past the deadline. Returns how many
/// bytes arrived.
fn read_until(
    channel: &mut dyn Channel,
    buf: &mut [u8],
    deadline: Instant,
) -> io::Result<usize> {
    let mut offset = 0;

    while offset < buf.len() {
        if Instant::now() >= deadline {
            break;
        }

        let available = channel.bytes_to_read()? as usize;
        if available == 0 {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        let to_read = available.min(buf.len() - offset);
        match channel.read(&mut buf[offset..offset + to_read]) {
            Ok(0) => break,
            Ok(n) => offset += n,
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Canned-response channel for session-level tests.
    struct ScriptChannel {
        // One queued response per expected write, in order.
        responses: VecDeque<Vec<u8>>,
        pending: VecDeque<u8>,
        fail_reads: bool,
    }

    impl ScriptChannel {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                responses: responses.into(),
                pending: VecDeque::new(),
                fail_reads: false,
            }
        }
    }

    impl Channel for ScriptChannel {
        fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            if let Some(resp) = self.responses.pop_front() {
                self.pending.extend(resp);
            }
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            let mut n = 0;
            while n < buf.len() {
                match self.pending.pop_front() {
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
            Ok(self.pending.len() as u32)
        }

        fn clear_buffers(&mut self) -> io::Result<()> {
            self.pending.clear();
            Ok(())
        }
    }

    /// A [`ScriptChannel`] behind a clonable handle, so a test can reach the
    /// pending buffer while the session owns the channel.
    #[derive(Clone)]
    struct SharedChannel {
        inner: Arc<Mutex<ScriptChannel>>,
    }

    impl SharedChannel {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                inner: Arc::new(Mutex::new(ScriptChannel::new(responses))),
            }
        }

        /// Bytes arriving between commands, e.g. a response outliving its
        /// deadline.
        fn inject(&self, bytes: &[u8]) {
            self.inner
                .lock()
                .unwrap()
                .pending
                .extend(bytes.iter().copied());
        }
    }

    impl Channel for SharedChannel {
        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.inner.lock().unwrap().write_all(buf)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.lock().unwrap().read(buf)
        }

        fn bytes_to_read(&mut self) -> io::Result<u32> {
            self.inner.lock().unwrap().bytes_to_read()
        }

        fn clear_buffers(&mut self) -> io::Result<()> {
            self.inner.lock().unwrap().clear_buffers()
        }
    }

    fn open_scripted(responses: Vec<Vec<u8>>) -> SerialSession {
        let mut session = SerialSession::new();
        session
            .open_channel(
                Box::new(ScriptChannel::new(responses)),
                Duration::from_millis(50),
            )
            .expect("open_channel");
        session
    }

    #[test]
    fn open_nonexistent_port_leaves_status_closed() {
        let mut session = SerialSession::new();
        let err = session.open("/dev/definitely-not-a-port", 921_600, 1);
        assert!(matches!(err, Err(ConnectionError::PortUnavailable { .. })));
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[test]
    fn zero_timeout_rejected_before_io() {
        let mut session = SerialSession::new();
        let err = session.open("/dev/definitely-not-a-port", 921_600, 0);
        assert!(matches!(err, Err(ConnectionError::InvalidTimeout)));
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = SerialSession::new();
        assert!(session.close().is_ok());
        assert!(session.close().is_ok());
        assert_eq!(session.status(), SessionStatus::Closed);
    }

    #[test]
    fn send_requires_open_session() {
        let mut session = SerialSession::new();
        let frame = CommandFrame::new(0x01, ResponseLen::Fixed(1));
        assert!(matches!(session.send(&frame), Err(SessionError::NotOpen)));
    }

    #[test]
    fn fixed_read_complete() {
        let mut session = open_scripted(vec![vec![0xAA, 0xBB]]);
        let frame = CommandFrame::new(0x20, ResponseLen::Fixed(2)).push_u8(0);
        let resp = session.send(&frame).expect("send");
        assert_eq!(resp.outcome, Outcome::Ok(vec![0xAA, 0xBB]));
    }

    #[test]
    fn fixed_read_partial_is_incomplete() {
        let mut session = open_scripted(vec![vec![0xAA]]);
        let frame = CommandFrame::new(0x20, ResponseLen::Fixed(2)).push_u8(0);
        let resp = session.send(&frame).expect("send");
        assert_eq!(resp.outcome, Outcome::Incomplete(vec![0xAA]));
    }

    #[test]
    fn silent_device_is_soft_timeout() {
        let mut session = open_scripted(vec![vec![]]);
        let frame = CommandFrame::new(0x20, ResponseLen::Fixed(2)).push_u8(0);
        let resp = session.send(&frame).expect("send");
        assert_eq!(resp.outcome, Outcome::Timeout);
        // Timeout does not fault the session
        assert_eq!(session.status(), SessionStatus::Open);
    }

    #[test]
    fn prefixed_sentinel_is_empty_ok() {
        let mut session = open_scripted(vec![vec![0x00]]);
        let frame = CommandFrame::new(0x40, ResponseLen::Prefixed);
        let resp = session.send(&frame).expect("send");
        assert_eq!(resp.outcome, Outcome::Ok(vec![]));
    }

    #[test]
    fn prefixed_oversize_length_is_malformed() {
        let mut session = open_scripted(vec![vec![0xFF]]);
        let frame = CommandFrame::new(0x40, ResponseLen::Prefixed);
        let resp = session.send(&frame).expect("send");
        assert_eq!(resp.outcome, Outcome::Malformed);
    }

    #[test]
    fn late_response_is_not_the_next_commands_answer() {
        // Command 1 gets nothing before its deadline; its response turns up
        // between commands and must not be read as command 2's answer.
        let channel = SharedChannel::new(vec![vec![], vec![0x0B, 0x0F]]);
        let mut session = SerialSession::new();
        session
            .open_channel(Box::new(channel.clone()), Duration::from_millis(50))
            .expect("open_channel");

        let first = CommandFrame::new(0x20, ResponseLen::Fixed(2)).push_u8(0);
        assert_eq!(session.send(&first).expect("send").outcome, Outcome::Timeout);

        channel.inject(&[0x10, 0x0E]);

        let second = CommandFrame::new(0x20, ResponseLen::Fixed(2)).push_u8(1);
        let resp = session.send(&second).expect("send");
        assert_eq!(resp.outcome, Outcome::Ok(vec![0x0B, 0x0F]));
    }

    #[test]
    fn io_fault_transitions_to_error() {
        let mut channel = ScriptChannel::new(vec![vec![0xAA, 0xBB]]);
        channel.fail_reads = true;
        let mut session = SerialSession::new();
        session
            .open_channel(Box::new(channel), Duration::from_millis(50))
            .expect("open_channel");

        let frame = CommandFrame::new(0x20, ResponseLen::Fixed(2));
        assert!(matches!(session.send(&frame), Err(SessionError::Io(_))));
        assert_eq!(session.status(), SessionStatus::Error);

        // Only a fresh open recovers
        assert!(matches!(session.send(&frame), Err(SessionError::NotOpen)));
    }
}
