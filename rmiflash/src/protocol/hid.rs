//! RMI-over-HID register transport.
//!
//! Register traffic is carried in vendor reports of a fixed physical size.
//!
//! ## Report Formats
//!
//! ```text
//! Write (output report 0x09):
//! +------+-------+-----------+-----------------+
//! | 0x09 | count | addr (LE) |  data, 0-padded |
//! +------+-------+-----------+-----------------+
//! |  1   |   1   |     2     |       17        |
//! +------+-------+-----------+-----------------+
//!
//! Read request (output report 0x0A):
//! +------+------+-----------+-----------+--------+
//! | 0x0A | 0x00 | addr (LE) | size (LE) | 0-pad  |
//! +------+------+-----------+-----------+--------+
//!
//! Read data (input report 0x0B):
//! +------+-------+----------------+
//! | 0x0B | count |  data[count]   |
//! +------+-------+----------------+
//!
//! Attention (input report 0x0C):
//! +------+-------------------+--------------+
//! | 0x0C | interrupt sources | function data|
//! +------+-------------------+--------------+
//! ```

use crate::error::{Error, Result};
use crate::link::ReportLink;
use crate::protocol::{RegisterTransport, TransportKind, dump};
use crate::session::SessionState;
use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// Physical size of every RMI report.
pub const REPORT_SIZE: usize = 21;

/// Output report: register write.
pub const WRITE_REPORT_ID: u8 = 0x09;
/// Output report: register read request.
pub const READ_ADDR_REPORT_ID: u8 = 0x0A;
/// Input report: register read data.
pub const READ_DATA_REPORT_ID: u8 = 0x0B;
/// Input report: attention.
pub const ATTN_REPORT_ID: u8 = 0x0C;
/// Feature report: RMI mode.
pub const SET_MODE_REPORT_ID: u8 = 0x0F;

/// Largest payload a single write report can announce.
pub const MAX_WRITE_LEN: usize = 0xFF;

/// Largest read a single request can announce.
pub const MAX_READ_LEN: usize = 0xFFFF;

/// Default timeout for a single report exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

const READ_INPUT_COUNT: usize = 1;
const READ_INPUT_DATA: usize = 2;
const ATTN_INTERRUPT_SOURCES: usize = 1;

/// Report delivery mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RmiMode {
    /// RMI reports off, device behaves as a plain HID mouse/touchpad.
    Disabled = 0,
    /// Attention reports enabled.
    AttentionReports = 1,
    /// Attention reports enabled, one interrupt per report.
    NoPackedAttentionReports = 2,
}

/// HID transport configuration.
#[derive(Debug, Clone)]
pub struct HidConfig {
    /// Timeout for each report write and each report read.
    pub timeout: Duration,
    /// Dump every report at debug level.
    pub verbose: bool,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            verbose: false,
        }
    }
}

impl HidConfig {
    /// Set the report timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable report dumps.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Build a register write report.
///
/// Reports are padded to [`REPORT_SIZE`]; a payload longer than 17 bytes
/// produces a longer report.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn build_write_report(addr: u16, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_WRITE_LEN {
        return Err(Error::ProtocolViolation(format!(
            "data to write was too long: {} bytes",
            data.len()
        )));
    }

    let mut buf = Vec::with_capacity(REPORT_SIZE.max(4 + data.len()));
    buf.push(WRITE_REPORT_ID);
    // Safe cast: checked against MAX_WRITE_LEN above
    buf.push(data.len() as u8);
    buf.write_u16::<LittleEndian>(addr).unwrap();
    buf.extend_from_slice(data);
    if buf.len() < REPORT_SIZE {
        buf.resize(REPORT_SIZE, 0);
    }
    Ok(buf)
}

/// Build a register read request report.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn build_read_request(addr: u16, size: usize) -> Result<Vec<u8>> {
    if size > MAX_READ_LEN {
        return Err(Error::ProtocolViolation(format!(
            "read size 0x{size:x} exceeds 0x{MAX_READ_LEN:x}"
        )));
    }

    let mut buf = Vec::with_capacity(REPORT_SIZE);
    buf.push(READ_ADDR_REPORT_ID);
    // Legacy one-byte count, unused
    buf.push(0x00);
    buf.write_u16::<LittleEndian>(addr).unwrap();
    // Safe cast: checked against MAX_READ_LEN above
    buf.write_u16::<LittleEndian>(size as u16).unwrap();
    buf.resize(REPORT_SIZE, 0);
    Ok(buf)
}

/// Extract the data carried by a read-data report.
///
/// Returns `Ok(None)` for reports that are not read data.
pub fn parse_read_data(report: &[u8]) -> Result<Option<&[u8]>> {
    if report.is_empty() {
        return Err(Error::ProtocolViolation("response zero sized".into()));
    }
    if report[0] != READ_DATA_REPORT_ID {
        return Ok(None);
    }
    if report.len() <= READ_INPUT_COUNT {
        return Err(Error::ProtocolViolation(format!(
            "read data report too small: {} bytes",
            report.len()
        )));
    }

    let count = usize::from(report[READ_INPUT_COUNT]);
    if count == 0 {
        return Err(Error::ProtocolViolation("input count zero".into()));
    }
    if count + READ_INPUT_DATA > report.len() {
        return Err(Error::ProtocolViolation(format!(
            "underflow 0x{count:02x} from expected 0x{:02x}",
            report.len() - READ_INPUT_DATA
        )));
    }
    Ok(Some(&report[READ_INPUT_DATA..READ_INPUT_DATA + count]))
}

/// RMI register transport over a HID report link.
pub struct HidTransport<L: ReportLink> {
    link: L,
    config: HidConfig,
}

impl<L: ReportLink> HidTransport<L> {
    /// Create a transport on an opened link.
    pub fn new(link: L) -> Self {
        Self::with_config(link, HidConfig::default())
    }

    /// Create a transport with custom configuration.
    pub fn with_config(link: L, config: HidConfig) -> Self {
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

    /// Switch the device's report delivery mode.
    pub fn set_mode(&mut self, mode: RmiMode) -> Result<()> {
        debug!("Setting RMI mode {mode:?}");
        let report = [SET_MODE_REPORT_ID, mode as u8];
        dump(self.config.verbose, "SetMode", &report);
        self.link.send_feature_report(&report)
    }

    fn send(&mut self, report: &[u8]) -> Result<()> {
        dump(self.config.verbose, "HidWrite", report);
        self.link
            .write_report(report, self.config.timeout)
    }
}

impl<L: ReportLink> RegisterTransport for HidTransport<L> {
    fn read(&mut self, _state: &mut SessionState, addr: u16, size: usize) -> Result<Vec<u8>> {
        let request = build_read_request(addr, size)?;
        self.send(&request)?;

        let mut buf = Vec::with_capacity(size);
        let mut report = [0u8; REPORT_SIZE];
        while buf.len() < size {
            let n = self
                .link
                .read_report(&mut report, self.config.timeout)?;
            dump(self.config.verbose, "HidRead", &report[..n]);

            match parse_read_data(&report[..n])? {
                Some(data) => {
                    let take = data.len().min(size - buf.len());
                    buf.extend_from_slice(&data[..take]);
                },
                None => {
                    trace!("Ignoring report with ID 0x{:02x}", report[0]);
                },
            }
        }

        Ok(buf)
    }

    fn write(&mut self, _state: &mut SessionState, addr: u16, data: &[u8]) -> Result<()> {
        let report = build_write_report(addr, data)?;
        self.send(&report)
    }

    fn wait_for_attention(&mut self, mask: u8, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let mut report = [0u8; REPORT_SIZE];

        while start.elapsed() < timeout {
            let remaining = timeout.saturating_sub(start.elapsed());
            let n = match self.link.read_report(&mut report, remaining) {
                Ok(n) => n,
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            };
            dump(self.config.verbose, "HidAttention", &report[..n]);

            if n < ATTN_INTERRUPT_SOURCES + 1 {
                debug!("Attention report too small: {n} bytes");
                continue;
            }
            if report[0] != ATTN_REPORT_ID {
                debug!("Attention wait ignoring report with ID 0x{:02x}", report[0]);
                continue;
            }
            if report[ATTN_INTERRUPT_SOURCES] & mask != 0 {
                return Ok(());
            }
        }

        Err(Error::TransportTimeout(format!(
            "no attention report for mask 0x{mask:02x} within {} ms",
            timeout.as_millis()
        )))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hid
    }

    fn close(&mut self) -> Result<()> {
        if let Err(e) = self.set_mode(RmiMode::Disabled) {
            warn!("Failed to disable RMI mode on {}: {e}", self.link.name());
        }
        Ok(())
    }
}
