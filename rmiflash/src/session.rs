//! Per-device session: page addressing on top of a register transport.
//!
//! RMI registers live in a 16-bit space split into 256 pages. The high byte
//! of an address is the page and must be selected by writing it to the
//! page-select register before the low byte means anything. [`RmiSession`]
//! remembers the last page it selected so consecutive accesses within one
//! page cost no extra traffic.

use std::time::Duration;

use log::trace;

use crate::error::{Result, ResultExt};
use crate::protocol::{RegisterTransport, TransportKind};

/// Page-select register, present at offset 0xFF of every page.
pub const PAGE_SELECT_REGISTER: u16 = 0x00FF;

/// Split an address into `(page, offset)`.
#[must_use]
pub fn split_address(addr: u16) -> (u8, u8) {
    let [offset, page] = addr.to_le_bytes();
    (page, offset)
}

/// Mutable protocol state of one open device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    current_page: Option<u8>,
    backdoor_enabled: bool,
}

impl SessionState {
    /// Fresh state: no page selected, backdoor closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The page selected last, if any.
    #[must_use]
    pub fn current_page(&self) -> Option<u8> {
        self.current_page
    }

    /// Whether the PS/2 register backdoor is open.
    #[must_use]
    pub fn backdoor_enabled(&self) -> bool {
        self.backdoor_enabled
    }

    pub(crate) fn set_backdoor_enabled(&mut self) {
        self.backdoor_enabled = true;
    }

    /// Forget everything, e.g. after the device was reset.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// An open device: a transport plus its session state.
pub struct RmiSession<T: RegisterTransport> {
    transport: T,
    state: SessionState,
}

impl<T: RegisterTransport> RmiSession<T> {
    /// Wrap an opened transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::new(),
        }
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Get the session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Get mutable access to the session state.
    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Which transport is underneath.
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Select `page` unless it is already selected.
    pub fn select_page(&mut self, page: u8) -> Result<()> {
        if self.state.current_page == Some(page) {
            return Ok(());
        }

        trace!("Selecting RMI page {page}");
        self.transport
            .write(&mut self.state, PAGE_SELECT_REGISTER, &[page])
            .context_with(|| format!("failed to write page {page}"))?;
        self.state.current_page = Some(page);
        Ok(())
    }

    /// Read `size` bytes at `addr`.
    pub fn read(&mut self, addr: u16, size: usize) -> Result<Vec<u8>> {
        let (page, _) = split_address(addr);
        self.select_page(page)
            .context("failed to set RMI page")?;
        self.transport
            .read(&mut self.state, addr, size)
            .context_with(|| format!("failed to read register 0x{addr:04x}"))
    }

    /// Write `data` at `addr`.
    pub fn write(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let (page, _) = split_address(addr);
        self.select_page(page)
            .context("failed to set RMI page")?;
        self.transport
            .write(&mut self.state, addr, data)
            .context_with(|| format!("failed to write register 0x{addr:04x}"))
    }

    /// Wait for an attention event on any source in `mask`.
    pub fn wait_for_attention(&mut self, mask: u8, timeout: Duration) -> Result<()> {
        self.transport
            .wait_for_attention(mask, timeout)
    }

    /// Close the transport and forget all state.
    pub fn close(&mut self) -> Result<()> {
        self.state.reset();
        self.transport.close()
    }

    /// Consume the session and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }
}
