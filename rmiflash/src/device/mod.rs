//! RMI function table discovery.
//!
//! Every register page that hosts functions carries a page description table
//! (PDT) at its top. Entries are 6 bytes wide, start at offset `0xE9` and grow
//! downwards:
//!
//! ```text
//! +-------+---------+---------+------+------------------------+----------+
//! | query | command | control | data | irq count | version    | function |
//! | base  | base    | base    | base | bits 0-2  | bits 5-6   | number   |
//! +-------+---------+---------+------+------------------------+----------+
//! ```
//!
//! Bases are page-relative. A function number of `0x00` or `0xFF` ends the
//! page, and the first page without any function ends the scan.

use crate::error::{Error, Result, ResultExt};
use crate::protocol::RegisterTransport;
use crate::session::RmiSession;
use log::{debug, trace};

/// Offset of the first PDT entry within a page.
pub const PDT_START: u16 = 0x00E9;

/// Lowest offset a PDT entry may start at.
pub const PDT_END: u16 = 0x0005;

/// Size of one PDT entry.
pub const PDT_ENTRY_SIZE: usize = 6;

/// Number of register pages.
pub const PAGE_COUNT: u16 = 0x100;

/// Device control function.
pub const FUNCTION_DEVICE_CONTROL: u8 = 0x01;

/// Flash programming function.
pub const FUNCTION_FLASH: u8 = 0x34;

/// One function as listed in the page description table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionDescriptor {
    /// Function number, e.g. `0x34`.
    pub id: u8,
    /// Absolute query register base.
    pub query_base: u16,
    /// Absolute command register base.
    pub command_base: u16,
    /// Absolute control register base.
    pub control_base: u16,
    /// Absolute data register base.
    pub data_base: u16,
    /// Function version.
    pub version: u8,
    /// Number of interrupt sources owned by the function.
    pub interrupt_source_count: u8,
    /// Bits of the function's interrupt sources within their status register.
    pub interrupt_mask: u8,
    /// Index of the interrupt status register holding those bits.
    pub interrupt_reg_num: u8,
}

impl FunctionDescriptor {
    /// Decode a raw PDT entry found on `page`.
    ///
    /// `irq_total` is the number of interrupt sources claimed by the entries
    /// scanned before this one.
    #[must_use]
    pub fn from_pdt_entry(entry: &[u8; PDT_ENTRY_SIZE], page: u8, irq_total: u32) -> Self {
        let page_base = u16::from(page) << 8;
        let interrupt_source_count = entry[4] & 0x07;

        let first_bit = irq_total % 8;
        let mut interrupt_mask = 0u8;
        for bit in first_bit..first_bit + u32::from(interrupt_source_count) {
            if bit < 8 {
                interrupt_mask |= 1 << bit;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let interrupt_reg_num = ((irq_total + 8) / 8 - 1) as u8;

        Self {
            id: entry[5],
            query_base: page_base | u16::from(entry[0]),
            command_base: page_base | u16::from(entry[1]),
            control_base: page_base | u16::from(entry[2]),
            data_base: page_base | u16::from(entry[3]),
            version: (entry[4] >> 5) & 0x03,
            interrupt_source_count,
            interrupt_mask,
            interrupt_reg_num,
        }
    }
}

/// All functions of one device, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionTable {
    functions: Vec<FunctionDescriptor>,
}

impl FunctionTable {
    /// Build a table from known descriptors.
    #[must_use]
    pub fn new(functions: Vec<FunctionDescriptor>) -> Self {
        Self { functions }
    }

    /// Scan the page description tables of the device.
    pub fn scan<T: RegisterTransport>(session: &mut RmiSession<T>) -> Result<Self> {
        let mut functions = Vec::new();
        let mut irq_total = 0u32;

        for page in 0..PAGE_COUNT {
            let page_base = page << 8;
            let mut found = false;

            for offset in (PDT_END..=PDT_START).rev().step_by(PDT_ENTRY_SIZE) {
                let addr = page_base | offset;
                let raw = session
                    .read(addr, PDT_ENTRY_SIZE)
                    .context_with(|| format!("failed to read PDT entry @0x{addr:04x}"))?;
                let entry: [u8; PDT_ENTRY_SIZE] = raw.as_slice().try_into().map_err(|_| {
                    Error::ProtocolViolation(format!(
                        "PDT entry @0x{addr:04x} returned {} bytes",
                        raw.len()
                    ))
                })?;

                let id = entry[5];
                if id == 0x00 || id == 0xFF {
                    trace!("End of PDT on page {page} @0x{addr:04x}");
                    break;
                }

                #[allow(clippy::cast_possible_truncation)]
                let func = FunctionDescriptor::from_pdt_entry(&entry, page as u8, irq_total);
                debug!(
                    "Found F{:02X} v{} query=0x{:04x} data=0x{:04x} irq_mask=0x{:02x}",
                    func.id, func.version, func.query_base, func.data_base, func.interrupt_mask
                );
                irq_total += u32::from(func.interrupt_source_count);
                functions.push(func);
                found = true;
            }

            if !found {
                break;
            }
        }

        Ok(Self { functions })
    }

    /// Look up a function by number.
    pub fn get(&self, id: u8) -> Result<&FunctionDescriptor> {
        self.functions
            .iter()
            .find(|f| f.id == id)
            .ok_or(Error::FunctionNotFound(id))
    }

    /// Replace the entry for `func.id`, or append it.
    pub fn replace(&mut self, func: FunctionDescriptor) {
        match self.functions.iter_mut().find(|f| f.id == func.id) {
            Some(slot) => *slot = func,
            None => self.functions.push(func),
        }
    }

    /// All functions in scan order.
    #[must_use]
    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    /// Number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
