//! Register transports.
//!
//! A [`RegisterTransport`] turns logical RMI register reads and writes into
//! link traffic. Page selection is not its concern: callers go through
//! [`RmiSession`](crate::session::RmiSession), which selects the page first
//! and then forwards the access.

pub mod hid;
pub mod ps2;

use std::fmt;
use std::time::Duration;

use log::debug;

use crate::error::Result;
use crate::session::SessionState;

/// Physical transport carrying the register protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportKind {
    /// HID reports over hidraw.
    #[default]
    Hid,
    /// PS/2 bytes over serio_raw.
    Ps2,
}

impl TransportKind {
    /// Get the transport kind from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "hid" | "hidraw" => Some(Self::Hid),
            "ps2" | "serio" | "serio_raw" => Some(Self::Ps2),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hid => write!(f, "HID"),
            Self::Ps2 => write!(f, "PS/2"),
        }
    }
}

/// Register-level access to an RMI device.
///
/// All calls are synchronous; exactly one is in flight per session.
pub trait RegisterTransport: Send {
    /// Read `size` bytes starting at `addr`.
    fn read(&mut self, state: &mut SessionState, addr: u16, size: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `addr`.
    fn write(&mut self, state: &mut SessionState, addr: u16, data: &[u8]) -> Result<()>;

    /// Wait until one of the interrupt sources in `mask` fires.
    ///
    /// A [`Error::TransportTimeout`](crate::Error::TransportTimeout) means no
    /// event arrived; callers usually fall back to polling.
    fn wait_for_attention(&mut self, mask: u8, timeout: Duration) -> Result<()>;

    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Release the link, restoring any mode changed on open.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn read(&mut self, state: &mut SessionState, addr: u16, size: usize) -> Result<Vec<u8>> {
        (**self).read(state, addr, size)
    }

    fn write(&mut self, state: &mut SessionState, addr: u16, data: &[u8]) -> Result<()> {
        (**self).write(state, addr, data)
    }

    fn wait_for_attention(&mut self, mask: u8, timeout: Duration) -> Result<()> {
        (**self).wait_for_attention(mask, timeout)
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Dump raw traffic at debug level when verbose mode is on.
pub(crate) fn dump(verbose: bool, title: &str, data: &[u8]) {
    if verbose {
        debug!("{title} ({} bytes): {data:02x?}", data.len());
    }
}
