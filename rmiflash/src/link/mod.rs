//! Link abstraction for the two physical device channels.
//!
//! The RMI register protocol runs over one of two links, each of which is a
//! blocking character device on Linux:
//!
//! - **Report link** (`/dev/hidrawN`): whole HID reports go in and out.
//! - **Byte link** (`/dev/serio_rawN`): single PS/2 bytes go in and out.
//!
//! ```text
//! +--------------------+     +--------------------+
//! |   Hid transport    |     |   Ps2 transport    |
//! +---------+----------+     +---------+----------+
//!           |                          |
//!           v                          v
//! +---------+----------+     +---------+----------+
//! |  ReportLink trait  |     |   ByteLink trait   |
//! +---------+----------+     +---------+----------+
//!           |                          |
//!           v                          v
//! +---------+----------+     +---------+----------+
//! |    HidrawPort      |     |     SerioPort      |
//! +--------------------+     +--------------------+
//! ```
//!
//! Keeping the framing code generic over these traits lets the protocol
//! layer be exercised against in-memory links in tests.

#[cfg(all(feature = "native", target_os = "linux"))]
pub mod native;
pub mod sysfs;

use std::time::Duration;

use crate::error::Result;

/// A link that exchanges whole HID reports.
pub trait ReportLink: Send {
    /// Send one output report. The first byte is the report id.
    fn write_report(&mut self, report: &[u8], timeout: Duration) -> Result<()>;

    /// Receive one input report into `buf`, returning its length.
    ///
    /// Fails with [`Error::TransportTimeout`](crate::Error::TransportTimeout)
    /// when nothing arrives within `timeout`.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Send one feature report. The first byte is the report id.
    fn send_feature_report(&mut self, report: &[u8]) -> Result<()>;

    /// Get the device node name/path.
    fn name(&self) -> &str;
}

/// A link that exchanges single bytes.
pub trait ByteLink: Send {
    /// Discard pending input, then send `data`.
    fn write_bytes(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Read exactly one byte.
    ///
    /// Fails with [`Error::TransportTimeout`](crate::Error::TransportTimeout)
    /// when nothing arrives within `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> Result<u8>;

    /// Get the device node name/path.
    fn name(&self) -> &str;
}

// Re-export the native implementations
#[cfg(all(feature = "native", target_os = "linux"))]
pub use native::{HidrawPort, SerioPort};
pub use sysfs::{DriverControl, SerioDriver};
