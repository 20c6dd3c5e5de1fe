//! RMI-over-PS/2 register transport.
//!
//! A PS/2 touchpad only understands single-byte mouse commands. Register
//! access is tunnelled through a "backdoor" that is opened by encoding a magic
//! value into a sequence of resolution and sample-rate commands:
//!
//! ```text
//! Backdoor:   F5 | [E6] E6 | E8 a3 E8 a2 E8 a1 E8 a0 | F3 14
//!                  ^ doubled on retries               ^ SetModeByte2
//!             where a3..a0 are the 2-bit groups of 0x7F, MSB first
//!
//! Write:      E7 | F3 addr | (F3 byte)*
//! Read:       E7 | F3 addr | E9 | <size bytes from the device>
//! ```
//!
//! Every byte sent is acknowledged by the device with `FA`; `FE` asks for a
//! retransmit and `FC` reports an error.

use crate::error::{Error, Result, ResultExt};
use crate::link::ByteLink;
use crate::protocol::{RegisterTransport, TransportKind, dump};
use crate::session::{PAGE_SELECT_REGISTER, SessionState};
use log::{debug, trace, warn};
use std::thread;
use std::time::Duration;

/// PS/2 auxiliary device commands.
pub mod cmd {
    /// Magic value that opens the register backdoor.
    pub const FULL_RMI_BACKDOOR: u8 = 0x7F;
    /// Set scaling 1:1.
    pub const SET_SCALING_1_TO_1: u8 = 0xE6;
    /// Set scaling 2:1, starts a register access.
    pub const SET_SCALING_2_TO_1: u8 = 0xE7;
    /// Set resolution, followed by a 2-bit argument.
    pub const SET_RESOLUTION: u8 = 0xE8;
    /// Status request, makes the device answer a register read.
    pub const STATUS_REQUEST: u8 = 0xE9;
    /// Set sample rate, followed by a one-byte argument.
    pub const SET_SAMPLE_RATE: u8 = 0xF3;
    /// Disable data reporting.
    pub const DISABLE: u8 = 0xF5;
    /// Reset.
    pub const RESET: u8 = 0xFF;
    /// Sample-rate argument that selects mode byte 2.
    pub const SET_MODE_BYTE_2: u8 = 0x14;
}

/// PS/2 device responses.
pub mod resp {
    /// Byte accepted.
    pub const ACK: u8 = 0xFA;
    /// Command failed.
    pub const ERROR: u8 = 0xFC;
    /// Retransmit the last byte.
    pub const RESEND: u8 = 0xFE;
    /// Self-test passed, first byte after reset.
    pub const BAT_OK: u8 = 0xAA;
    /// Device id, second byte after reset.
    pub const DEVICE_ID: u8 = 0x00;
}

/// Attempts per byte in [`Ps2Transport::write_byte`].
pub const WRITE_ATTEMPTS: usize = 3;

/// Attempts of the whole sample-rate sequence.
pub const SEQUENCE_ATTEMPTS: usize = 3;

/// Upper bound on bytes discarded while draining stale input on reset.
const DRAIN_LIMIT: usize = 0xFFFF;

/// Outcome of waiting for the acknowledge of a sent byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// `FA`.
    Ack,
    /// `FE`, retransmit after a long backoff.
    Resend,
    /// `FC`, retransmit after a short backoff.
    Error,
    /// Any other byte.
    Other(u8),
    /// Nothing arrived within the acknowledge budget.
    NoResponse,
}

impl AckOutcome {
    /// Classify a response byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            resp::ACK => Self::Ack,
            resp::RESEND => Self::Resend,
            resp::ERROR => Self::Error,
            other => Self::Other(other),
        }
    }
}

/// Delays used by the byte protocol.
#[derive(Debug, Clone)]
pub struct Ps2Timing {
    /// Timeout of each single acknowledge read.
    pub ack_read_timeout: Duration,
    /// Number of acknowledge reads before giving up on a byte.
    pub ack_reads: usize,
    /// Pause between timed-out acknowledge reads.
    pub ack_read_delay: Duration,
    /// Backoff after a resend request.
    pub resend_backoff: Duration,
    /// Backoff after an error or unexpected response.
    pub error_backoff: Duration,
    /// Pause after each completed register access.
    pub settle: Duration,
}

impl Default for Ps2Timing {
    fn default() -> Self {
        Self {
            ack_read_timeout: Duration::from_millis(60),
            ack_reads: 60,
            ack_read_delay: Duration::from_micros(30),
            resend_backoff: Duration::from_secs(1),
            error_backoff: Duration::from_millis(10),
            settle: Duration::from_millis(20),
        }
    }
}

impl Ps2Timing {
    /// No pauses at all, for simulated links.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            ack_read_timeout: Duration::ZERO,
            ack_reads: 60,
            ack_read_delay: Duration::ZERO,
            resend_backoff: Duration::ZERO,
            error_backoff: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

/// PS/2 transport configuration.
#[derive(Debug, Clone)]
pub struct Ps2Config {
    /// Protocol delays.
    pub timing: Ps2Timing,
    /// Write timeout for backdoor and stream-control bytes.
    pub command_timeout: Duration,
    /// Write timeout for register write bytes.
    pub register_timeout: Duration,
    /// Write timeout for page selection bytes.
    pub page_timeout: Duration,
    /// Timeout for each byte of a register read.
    pub byte_timeout: Duration,
    /// Write timeout for the reset command.
    pub reset_timeout: Duration,
    /// Timeout for each byte of the reset announcement.
    pub reset_reply_timeout: Duration,
    /// Timeout of each read while draining stale input.
    pub drain_timeout: Duration,
    /// Dump every register access at debug level.
    pub verbose: bool,
}

impl Default for Ps2Config {
    fn default() -> Self {
        Self {
            timing: Ps2Timing::default(),
            command_timeout: Duration::from_millis(50),
            register_timeout: Duration::from_millis(1000),
            page_timeout: Duration::from_millis(20),
            byte_timeout: Duration::from_millis(100),
            reset_timeout: Duration::from_millis(600),
            reset_reply_timeout: Duration::from_millis(500),
            drain_timeout: Duration::from_millis(20),
            verbose: false,
        }
    }
}

impl Ps2Config {
    /// Replace the protocol delays.
    #[must_use]
    pub fn with_timing(mut self, timing: Ps2Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set the per-byte read timeout.
    #[must_use]
    pub fn with_byte_timeout(mut self, timeout: Duration) -> Self {
        self.byte_timeout = timeout;
        self
    }

    /// Enable access dumps.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// RMI register transport over a PS/2 byte link.
pub struct Ps2Transport<L: ByteLink> {
    link: L,
    config: Ps2Config,
}

impl<L: ByteLink> Ps2Transport<L> {
    /// Create a transport on an opened link.
    pub fn new(link: L) -> Self {
        Self::with_config(link, Ps2Config::default())
    }

    /// Create a transport with custom configuration.
    pub fn with_config(link: L, config: Ps2Config) -> Self {
        Self { link, config }
    }

    /// Get a reference to the underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Get a mutable reference to the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Consume the transport and return the link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Wait for the acknowledge of the last byte sent.
    ///
    /// Timed-out reads are retried up to the configured count; any other link
    /// failure ends the wait at once.
    pub fn read_ack(&mut self) -> Result<AckOutcome> {
        for i in 0..self.config.timing.ack_reads {
            match self
                .link
                .read_byte(self.config.timing.ack_read_timeout)
            {
                Ok(byte) => return Ok(AckOutcome::from_byte(byte)),
                Err(e) if e.is_timeout() => {
                    trace!("Acknowledge read {i} timed out");
                    pause(self.config.timing.ack_read_delay);
                },
                Err(e) => return Err(e),
            }
        }
        Ok(AckOutcome::NoResponse)
    }

    /// Send one byte and wait for it to be acknowledged.
    ///
    /// The byte is sent on the first attempt and retransmitted only when the
    /// device asks for it. A failing link write is returned immediately.
    pub fn write_byte(&mut self, byte: u8, timeout: Duration) -> Result<()> {
        let mut send = true;

        for attempt in 1..=WRITE_ATTEMPTS {
            if send {
                self.link.write_bytes(&[byte], timeout)?;
            }
            send = false;
            trace!("Wrote 0x{byte:02x}, reading acknowledge (attempt {attempt})");

            let outcome = match self.read_ack() {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("Acknowledge read for 0x{byte:02x} failed: {e}");
                    continue;
                },
            };
            match outcome {
                AckOutcome::Ack => return Ok(()),
                AckOutcome::Resend => {
                    debug!("Resend requested for 0x{byte:02x}");
                    send = true;
                    pause(self.config.timing.resend_backoff);
                },
                AckOutcome::Error => {
                    debug!("Device reported error for 0x{byte:02x}");
                    send = true;
                    pause(self.config.timing.error_backoff);
                },
                AckOutcome::Other(res) => {
                    debug!("Unexpected response 0x{res:02x} for 0x{byte:02x}");
                    pause(self.config.timing.error_backoff);
                },
                AckOutcome::NoResponse => {
                    debug!("No acknowledge for 0x{byte:02x}");
                },
            }
        }

        Err(Error::TransportTimeout(format!(
            "byte 0x{byte:02x} not acknowledged after {WRITE_ATTEMPTS} attempts"
        )))
    }

    /// Read one byte from the device.
    pub fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        self.link.read_byte(timeout)
    }

    /// Encode `arg` as resolution commands, two bits at a time.
    pub fn resolution_sequence(&mut self, arg: u8, double_scaling: bool) -> Result<()> {
        trace!("Resolution sequence: arg = 0x{arg:02x}");
        let timeout = self.config.command_timeout;

        let scaling = if double_scaling { 2 } else { 1 };
        for _ in 0..scaling {
            self.write_byte(cmd::SET_SCALING_1_TO_1, timeout)?;
        }

        for shift in (0..4).rev() {
            let two_bits = (arg >> (shift * 2)) & 0x03;
            self.write_byte(cmd::SET_RESOLUTION, timeout)?;
            self.write_byte(two_bits, timeout)?;
        }
        Ok(())
    }

    /// Encode `arg` and finish with a sample-rate command carrying `param`.
    ///
    /// Retried as a whole; retries always double the leading scaling command.
    pub fn sample_rate_sequence(&mut self, param: u8, arg: u8, double_scaling: bool) -> Result<()> {
        let timeout = self.config.command_timeout;

        for attempt in 0..SEQUENCE_ATTEMPTS {
            let double_scaling = double_scaling || attempt > 0;
            let result = self
                .resolution_sequence(arg, double_scaling)
                .and_then(|()| self.write_byte(cmd::SET_SAMPLE_RATE, timeout))
                .and_then(|()| self.write_byte(param, timeout));
            match result {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Sample rate sequence failed, will retry: {e}"),
            }
        }

        Err(Error::TransportTimeout(format!(
            "sample rate sequence 0x{param:02x}/0x{arg:02x}: too many tries"
        )))
    }

    /// Stop streaming and open the register backdoor.
    pub fn enable_backdoor(&mut self, state: &mut SessionState) -> Result<()> {
        debug!("Enabling RMI backdoor");
        self.write_byte(cmd::DISABLE, self.config.command_timeout)
            .context("failed to disable stream mode")?;
        self.sample_rate_sequence(cmd::SET_MODE_BYTE_2, cmd::FULL_RMI_BACKDOOR, false)
            .context("failed to enter RMI mode")?;
        state.set_backdoor_enabled();
        Ok(())
    }

    fn ensure_backdoor(&mut self, state: &mut SessionState) -> Result<()> {
        if state.backdoor_enabled() {
            return Ok(());
        }
        self.enable_backdoor(state)
            .context("failed to enable RMI backdoor")
    }

    /// Reset the device and leave it quiet, ready for the backdoor.
    ///
    /// Forgets the selected page and backdoor state.
    pub fn reset_link(&mut self, state: &mut SessionState) -> Result<()> {
        let mut drained = 0usize;
        while drained < DRAIN_LIMIT
            && self
                .link
                .read_byte(self.config.drain_timeout)
                .is_ok()
        {
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {drained} stale bytes from {}", self.link.name());
        }

        self.write_byte(cmd::RESET, self.config.reset_timeout)
            .context("failed to reset")?;

        let timeout = self.config.reset_reply_timeout;
        let reply = self
            .link
            .read_byte(timeout)
            .and_then(|first| Ok([first, self.link.read_byte(timeout)?]))
            .context("failed to read 0xAA00")?;
        if reply != [resp::BAT_OK, resp::DEVICE_ID] {
            return Err(Error::ProtocolViolation(format!(
                "failed to read 0xAA00, got 0x{:02X}{:02X}",
                reply[0], reply[1]
            )));
        }

        self.write_byte(cmd::DISABLE, self.config.command_timeout)
            .context("failed to disable stream mode")?;
        state.reset();
        Ok(())
    }
}

impl<L: ByteLink> RegisterTransport for Ps2Transport<L> {
    fn read(&mut self, state: &mut SessionState, addr: u16, size: usize) -> Result<Vec<u8>> {
        self.ensure_backdoor(state)?;

        let [offset, _] = addr.to_le_bytes();
        let timeout = self.config.byte_timeout;
        for byte in [cmd::SET_SCALING_2_TO_1, cmd::SET_SAMPLE_RATE, offset, cmd::STATUS_REQUEST] {
            self.write_byte(byte, timeout)
                .context("failed to write read command")?;
        }

        let mut buf = Vec::with_capacity(size);
        for i in 0..size {
            let byte = self
                .link
                .read_byte(timeout)
                .context_with(|| format!("failed to read byte {i}"))?;
            buf.push(byte);
        }

        pause(self.config.timing.settle);
        dump(self.config.verbose, "Ps2Read", &buf);
        Ok(buf)
    }

    fn write(&mut self, state: &mut SessionState, addr: u16, data: &[u8]) -> Result<()> {
        if data.len() > 0xFF {
            return Err(Error::ProtocolViolation(format!(
                "data to write was too long: {} bytes",
                data.len()
            )));
        }
        self.ensure_backdoor(state)?;
        dump(self.config.verbose, "Ps2Write", data);

        let [offset, _] = addr.to_le_bytes();
        let timeout = if addr == PAGE_SELECT_REGISTER {
            self.config.page_timeout
        } else {
            self.config.register_timeout
        };

        self.write_byte(cmd::SET_SCALING_2_TO_1, timeout)
            .context("failed to set scaling 2:1")?;
        self.write_byte(cmd::SET_SAMPLE_RATE, timeout)
            .context("failed to set sample rate")?;
        self.write_byte(offset, timeout)
            .context("failed to write address")?;
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(cmd::SET_SAMPLE_RATE, timeout)
                .context_with(|| format!("failed to set byte {i}"))?;
            self.write_byte(byte, timeout)
                .context_with(|| format!("failed to write byte {i}"))?;
        }

        pause(self.config.timing.settle);
        Ok(())
    }

    fn wait_for_attention(&mut self, mask: u8, timeout: Duration) -> Result<()> {
        // No interrupt channel over PS/2; give the device the whole budget
        trace!("Sleeping {} ms for attention 0x{mask:02x}", timeout.as_millis());
        pause(timeout);
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ps2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RmiSession;
    use std::collections::VecDeque;

    type Responder = Box<dyn FnMut(u8) -> Vec<u8> + Send>;

    /// Byte link that answers each written byte through a closure.
    struct MockBytes {
        written: Vec<u8>,
        timeouts: Vec<Duration>,
        input: VecDeque<u8>,
        respond: Responder,
        reads: usize,
        broken: bool,
    }

    impl MockBytes {
        fn new(respond: impl FnMut(u8) -> Vec<u8> + Send + 'static) -> Self {
            Self {
                written: Vec::new(),
                timeouts: Vec::new(),
                input: VecDeque::new(),
                respond: Box::new(respond),
                reads: 0,
                broken: false,
            }
        }

        fn acking() -> Self {
            Self::new(|_| vec![resp::ACK])
        }
    }

    impl ByteLink for MockBytes {
        fn write_bytes(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
            self.input.clear();
            for &b in data {
                self.written.push(b);
                self.timeouts.push(timeout);
                let reply = (self.respond)(b);
                self.input.extend(reply);
            }
            Ok(())
        }

        fn read_byte(&mut self, _timeout: Duration) -> Result<u8> {
            self.reads += 1;
            if self.broken {
                return Err(Error::Io(std::io::Error::from(
                    std::io::ErrorKind::BrokenPipe,
                )));
            }
            self.input
                .pop_front()
                .ok_or_else(|| Error::TransportTimeout("no data".into()))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn transport(link: MockBytes) -> Ps2Transport<MockBytes> {
        Ps2Transport::with_config(link, Ps2Config::default().with_timing(Ps2Timing::zero()))
    }

    #[test]
    fn test_ack_outcome_classification() {
        assert_eq!(AckOutcome::from_byte(0xFA), AckOutcome::Ack);
        assert_eq!(AckOutcome::from_byte(0xFE), AckOutcome::Resend);
        assert_eq!(AckOutcome::from_byte(0xFC), AckOutcome::Error);
        assert_eq!(AckOutcome::from_byte(0x12), AckOutcome::Other(0x12));
    }

    #[test]
    fn test_write_byte_acked_once() {
        let mut t = transport(MockBytes::acking());
        t.write_byte(0xF5, Duration::ZERO).unwrap();
        assert_eq!(t.link().written, vec![0xF5]);
    }

    #[test]
    fn test_write_byte_resend_retransmits_every_attempt() {
        let mut t = transport(MockBytes::new(|_| vec![resp::RESEND]));
        let err = t.write_byte(0x42, Duration::ZERO).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(t.link().written, vec![0x42; 3]);
    }

    #[test]
    fn test_write_byte_error_retransmits() {
        let mut replies = VecDeque::from([resp::ERROR, resp::ACK]);
        let mut t = transport(MockBytes::new(move |_| {
            replies.pop_front().into_iter().collect()
        }));
        t.write_byte(0x42, Duration::ZERO).unwrap();
        assert_eq!(t.link().written, vec![0x42, 0x42]);
    }

    #[test]
    fn test_write_byte_other_response_does_not_retransmit() {
        let mut t = transport(MockBytes::new(|_| vec![0x33]));
        let err = t.write_byte(0x42, Duration::ZERO).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(t.link().written, vec![0x42]);
    }

    #[test]
    fn test_write_byte_no_response_sends_once() {
        let mut t = transport(MockBytes::new(|_| Vec::new()));
        let err = t.write_byte(0x42, Duration::ZERO).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(t.link().written, vec![0x42]);
    }

    #[test]
    fn test_read_ack_retries_timeouts_only() {
        let mut t = transport(MockBytes::new(|_| Vec::new()));
        assert_eq!(t.read_ack().unwrap(), AckOutcome::NoResponse);
        assert_eq!(t.link().reads, 60);

        let mut broken = MockBytes::acking();
        broken.broken = true;
        let mut t = transport(broken);
        assert!(matches!(t.read_ack(), Err(Error::Io(_))));
        assert_eq!(t.link().reads, 1);
    }

    #[test]
    fn test_write_byte_link_failure_stops_ack_wait() {
        let mut broken = MockBytes::acking();
        broken.broken = true;
        let mut t = transport(broken);

        let err = t.write_byte(0x42, Duration::ZERO).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(t.link().written, vec![0x42]);
        // One read per attempt instead of the full acknowledge budget
        assert_eq!(t.link().reads, WRITE_ATTEMPTS);
    }

    #[test]
    fn test_resolution_sequence_two_bit_groups() {
        let mut t = transport(MockBytes::acking());
        t.resolution_sequence(0xB4, false).unwrap();
        assert_eq!(
            t.link().written,
            vec![0xE6, 0xE8, 0x02, 0xE8, 0x03, 0xE8, 0x01, 0xE8, 0x00]
        );
    }

    #[test]
    fn test_resolution_sequence_double_scaling() {
        let mut t = transport(MockBytes::acking());
        t.resolution_sequence(0x00, true).unwrap();
        assert_eq!(&t.link().written[..3], &[0xE6, 0xE6, 0xE8]);
    }

    #[test]
    fn test_backdoor_retries_with_doubled_scaling() {
        // The first two 0xE6 bytes go unanswered, everything else is acked
        let mut e6_seen = 0;
        let link = MockBytes::new(move |b| {
            if b == cmd::SET_SCALING_1_TO_1 {
                e6_seen += 1;
                if e6_seen <= 2 {
                    return Vec::new();
                }
            }
            vec![resp::ACK]
        });
        let mut t = transport(link);
        let mut state = SessionState::new();

        t.enable_backdoor(&mut state).unwrap();
        assert!(state.backdoor_enabled());
        assert_eq!(
            t.link().written,
            vec![
                0xF5, 0xE6, 0xE6, 0xE6, 0xE6, 0xE8, 0x01, 0xE8, 0x03, 0xE8, 0x03, 0xE8, 0x03,
                0xF3, 0x14
            ]
        );
    }

    #[test]
    fn test_backdoor_gives_up_after_three_sequences() {
        let link = MockBytes::new(|b| {
            if b == cmd::SET_RESOLUTION {
                Vec::new()
            } else {
                vec![resp::ACK]
            }
        });
        let mut t = transport(link);
        let mut state = SessionState::new();

        let err = t.enable_backdoor(&mut state).unwrap_err();
        assert!(err.to_string().contains("failed to enter RMI mode"));
        assert!(!state.backdoor_enabled());
    }

    #[test]
    fn test_register_write_framing() {
        let mut t = transport(MockBytes::acking());
        let mut state = SessionState::new();
        state.set_backdoor_enabled();

        t.write(&mut state, 0x0312, &[0xAB, 0xCD]).unwrap();
        assert_eq!(
            t.link().written,
            vec![0xE7, 0xF3, 0x12, 0xF3, 0xAB, 0xF3, 0xCD]
        );
    }

    #[test]
    fn test_register_write_opens_backdoor_first() {
        let mut t = transport(MockBytes::acking());
        let mut state = SessionState::new();

        t.write(&mut state, 0x0012, &[0x01]).unwrap();
        assert!(state.backdoor_enabled());
        assert_eq!(t.link().written[0], cmd::DISABLE);
        assert!(t.link().written.ends_with(&[0xE7, 0xF3, 0x12, 0xF3, 0x01]));

        // Second access does not reopen it
        let before = t.link().written.len();
        t.write(&mut state, 0x0013, &[0x02]).unwrap();
        assert_eq!(t.link().written.len() - before, 5);
    }

    #[test]
    fn test_register_read_framing() {
        let link = MockBytes::new(|b| match b {
            cmd::STATUS_REQUEST => vec![resp::ACK, 0x11, 0x22, 0x33],
            _ => vec![resp::ACK],
        });
        let mut t = transport(link);
        let mut state = SessionState::new();
        state.set_backdoor_enabled();

        let data = t.read(&mut state, 0x0210, 3).unwrap();
        assert_eq!(data, vec![0x11, 0x22, 0x33]);
        assert_eq!(t.link().written, vec![0xE7, 0xF3, 0x10, 0xE9]);
    }

    #[test]
    fn test_register_read_short_reply_fails() {
        let link = MockBytes::new(|b| match b {
            cmd::STATUS_REQUEST => vec![resp::ACK, 0x11],
            _ => vec![resp::ACK],
        });
        let mut t = transport(link);
        let mut state = SessionState::new();
        state.set_backdoor_enabled();

        let err = t.read(&mut state, 0x0010, 2).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("failed to read byte 1"));
    }

    #[test]
    fn test_reset_link_expects_announcement() {
        let link = MockBytes::new(|b| match b {
            cmd::RESET => vec![resp::ACK, resp::BAT_OK, resp::DEVICE_ID],
            _ => vec![resp::ACK],
        });
        let mut t = transport(link);
        let mut state = SessionState::new();
        state.set_backdoor_enabled();

        t.reset_link(&mut state).unwrap();
        assert_eq!(t.link().written, vec![cmd::RESET, cmd::DISABLE]);
        assert_eq!(state, SessionState::new());
    }

    #[test]
    fn test_reset_link_bad_announcement() {
        let link = MockBytes::new(|b| match b {
            cmd::RESET => vec![resp::ACK, 0xFC, 0x00],
            _ => vec![resp::ACK],
        });
        let mut t = transport(link);
        let err = t.reset_link(&mut SessionState::new()).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_attention_always_succeeds() {
        let mut t = transport(MockBytes::acking());
        t.wait_for_attention(0x01, Duration::ZERO).unwrap();
        assert!(t.link().written.is_empty());
    }

    #[test]
    fn test_session_selects_page_over_ps2() {
        let config = Ps2Config::default().with_timing(Ps2Timing::zero());
        let page_timeout = config.page_timeout;
        let register_timeout = config.register_timeout;
        let mut session =
            RmiSession::new(Ps2Transport::with_config(MockBytes::acking(), config));
        session.state_mut().set_backdoor_enabled();

        session.write(0x0312, &[0xAB]).unwrap();
        session.write(0x0313, &[0xCD]).unwrap();

        let link = session.transport().link();
        assert_eq!(
            link.written,
            vec![
                0xE7, 0xF3, 0xFF, 0xF3, 0x03, // page 3
                0xE7, 0xF3, 0x12, 0xF3, 0xAB, // 0x0312
                0xE7, 0xF3, 0x13, 0xF3, 0xCD, // 0x0313, same page
            ]
        );
        assert!(link.timeouts[..5].iter().all(|t| *t == page_timeout));
        assert!(link.timeouts[5..].iter().all(|t| *t == register_timeout));
        assert_eq!(session.state().current_page(), Some(3));
    }
}
