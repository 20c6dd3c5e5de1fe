//! In-memory register transport for unit tests.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{RegisterTransport, TransportKind};
use crate::session::SessionState;

/// Route library logs to the test harness output.
pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

/// One recorded register operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Read(u16, usize),
    Write(u16, Vec<u8>),
    Attention(u8),
}

/// A flat register map that records every access.
///
/// Writes land in the map byte by byte, except at volatile addresses, which
/// behave like command registers the device clears on completion.
#[derive(Debug, Default)]
pub struct MockTransport {
    regs: HashMap<u16, u8>,
    ops: Vec<Op>,
    volatile: HashSet<u16>,
    fail_writes: HashSet<u16>,
    fail_attention: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, addr: u16, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.regs.insert(addr + i as u16, *b);
        }
    }

    pub fn get(&self, addr: u16) -> u8 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn mark_volatile(&mut self, addr: u16) {
        self.volatile.insert(addr);
    }

    pub fn fail_writes_to(&mut self, addr: u16) {
        self.fail_writes.insert(addr);
    }

    /// Make every attention wait time out.
    pub fn fail_attention(&mut self) {
        self.fail_attention = true;
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Writes other than page selection.
    pub fn register_writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(addr, data) if *addr != crate::session::PAGE_SELECT_REGISTER => {
                    Some((*addr, data.clone()))
                },
                _ => None,
            })
            .collect()
    }
}

impl RegisterTransport for MockTransport {
    fn read(&mut self, _state: &mut SessionState, addr: u16, size: usize) -> Result<Vec<u8>> {
        self.ops.push(Op::Read(addr, size));
        Ok((0..size)
            .map(|i| self.get(addr.wrapping_add(i as u16)))
            .collect())
    }

    fn write(&mut self, _state: &mut SessionState, addr: u16, data: &[u8]) -> Result<()> {
        self.ops.push(Op::Write(addr, data.to_vec()));
        if self.fail_writes.contains(&addr) {
            return Err(Error::TransportTimeout(format!("mock write 0x{addr:04x}")));
        }
        for (i, b) in data.iter().enumerate() {
            let a = addr.wrapping_add(i as u16);
            if !self.volatile.contains(&a) {
                self.regs.insert(a, *b);
            }
        }
        Ok(())
    }

    fn wait_for_attention(&mut self, mask: u8, _timeout: Duration) -> Result<()> {
        self.ops.push(Op::Attention(mask));
        if self.fail_attention {
            return Err(Error::TransportTimeout(format!("mock attention 0x{mask:02x}")));
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hid
    }
}
