//! Version 5 flash programming over the F34 function.
//!
//! ## Register Layout
//!
//! ```text
//! F34 query:   +0  bootloader id (2)
//!              +2  properties (7): +1 block size, +3 fw blocks, +5 cfg blocks
//!              +9  flash properties 2 (bit 0: secure update)
//!              +10 RSA key length (2, secure update only)
//!
//! F34 data:    +0  block number (2)
//!              +2  block data (block size)   (+1 on function version 1)
//!              +2+block size  command/status
//! ```
//!
//! A flash run is strictly sequential:
//!
//! ```text
//! Idle -> Unlocking -> Erasing -> ProgrammingFirmware -> ProgrammingConfig -> Done
//!   \________________________ any error ___________________________________-> Failed
//! ```

use crate::device::{FUNCTION_DEVICE_CONTROL, FUNCTION_FLASH, FunctionDescriptor, FunctionTable};
use crate::error::{Error, Result, ResultExt};
use crate::image;
use crate::protocol::{RegisterTransport, TransportKind};
use crate::session::RmiSession;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, trace};
use std::thread;
use std::time::{Duration, Instant};

/// Offset of the block size within the F34 properties.
pub const BLOCK_SIZE_OFFSET: usize = 1;
/// Offset of the firmware block count within the F34 properties.
pub const FW_BLOCKS_OFFSET: usize = 3;
/// Offset of the config block count within the F34 properties.
pub const CONFIG_BLOCKS_OFFSET: usize = 5;

/// Block data register offset from the F34 data base.
pub const BLOCK_DATA_OFFSET: u16 = 2;
/// Block data register offset for F34 version 1.
pub const BLOCK_DATA_V1_OFFSET: u16 = 1;

/// F34 flash commands.
pub mod flash_cmd {
    /// Program one firmware block.
    pub const WRITE_FW_BLOCK: u8 = 0x02;
    /// Erase firmware and config.
    pub const ERASE_ALL: u8 = 0x03;
    /// Program one config block.
    pub const WRITE_CONFIG_BLOCK: u8 = 0x06;
    /// Switch into flash programming mode.
    pub const ENABLE_FLASH_PROG: u8 = 0x0F;
}

/// F01 data bit set while the bootloader runs.
const F01_STATUS_BOOTLOADER: u8 = 0x40;
/// F01 control 0 bit that keeps the device awake.
const F01_CTRL0_NOSLEEP: u8 = 0x04;
/// F01 control 0 sleep mode field; 0 is normal operation.
const F01_CTRL0_SLEEP_MODE_MASK: u8 = 0x03;

const F34_COMMAND_MASK: u8 = 0x0F;
const F34_STATUS_SHIFT: u8 = 4;
const F34_STATUS_MASK: u8 = 0x07;

/// Flash geometry and identity read from the F34 query registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashInfo {
    /// Bytes per program block.
    pub block_size: u16,
    /// Blocks in the firmware image.
    pub block_count_firmware: u16,
    /// Blocks in the config image.
    pub block_count_config: u16,
    /// Absolute address of the command/status register.
    pub status_addr: u16,
    /// Key that unlocks programming.
    pub bootloader_id: [u8; 2],
    /// Signed-update variant.
    pub has_secure_update: bool,
    /// RSA key length, 0 unless secure update.
    pub rsa_key_length: u16,
}

impl FlashInfo {
    /// Expected firmware image size in bytes.
    #[must_use]
    pub fn firmware_size(&self) -> usize {
        usize::from(self.block_size) * usize::from(self.block_count_firmware)
    }

    /// Expected config image size in bytes.
    #[must_use]
    pub fn config_size(&self) -> usize {
        usize::from(self.block_size) * usize::from(self.block_count_config)
    }
}

/// Where a flash run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashState {
    /// Nothing started.
    #[default]
    Idle,
    /// Disabling sleep and writing the bootloader id.
    Unlocking,
    /// Erase command issued.
    Erasing,
    /// Writing firmware blocks.
    ProgrammingFirmware,
    /// Writing config blocks.
    ProgrammingConfig,
    /// All blocks written.
    Done,
    /// Aborted on an error.
    Failed,
}

/// Options for [`V5Flasher::wait_for_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleFlags {
    /// Poll the status register as known.
    None,
    /// Re-read the F34 table entry before polling.
    RefreshF34,
}

/// Flash timing.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    /// Idle-wait budget after each block.
    pub block_timeout: Duration,
    /// Pause after the erase command.
    pub erase_settle: Duration,
    /// Idle-wait budget after the erase settle.
    pub erase_timeout: Duration,
    /// Pause after the enable-programming command, also its idle budget.
    pub enable_settle: Duration,
    /// Interval between status register reads.
    pub poll_interval: Duration,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_millis(500),
            erase_settle: Duration::from_secs(5),
            erase_timeout: Duration::from_secs(5),
            enable_settle: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl FlashConfig {
    /// Set the per-block idle budget.
    #[must_use]
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Set the pause after erase.
    #[must_use]
    pub fn with_erase_settle(mut self, settle: Duration) -> Self {
        self.erase_settle = settle;
        self
    }

    /// Set the idle budget after erase.
    #[must_use]
    pub fn with_erase_timeout(mut self, timeout: Duration) -> Self {
        self.erase_timeout = timeout;
        self
    }

    /// Set the pause after enabling programming.
    #[must_use]
    pub fn with_enable_settle(mut self, settle: Duration) -> Self {
        self.enable_settle = settle;
        self
    }
}

/// `base + by`, failing instead of wrapping past the register space.
fn offset(base: u16, by: u16) -> Result<u16> {
    base.checked_add(by).ok_or_else(|| {
        Error::ProtocolViolation(format!(
            "address overflow: 0x{base:04x} + 0x{by:04x}"
        ))
    })
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Version 5 flasher.
///
/// Generic over the register transport, so the same engine drives HID and
/// PS/2 devices.
pub struct V5Flasher<T: RegisterTransport> {
    session: RmiSession<T>,
    functions: FunctionTable,
    info: FlashInfo,
    bootloader: bool,
    config: FlashConfig,
    state: FlashState,
}

impl<T: RegisterTransport> V5Flasher<T> {
    /// Open a session on `transport`, scan the function table and query the
    /// flash function.
    pub fn setup(transport: T, config: FlashConfig) -> Result<Self> {
        let mut session = RmiSession::new(transport);
        let functions = FunctionTable::scan(&mut session).context("failed to scan PDT")?;
        Self::with_functions(session, functions, config)
    }

    /// Like [`setup`](Self::setup) with an already scanned function table.
    pub fn with_functions(
        session: RmiSession<T>,
        functions: FunctionTable,
        config: FlashConfig,
    ) -> Result<Self> {
        let mut flasher = Self {
            session,
            functions,
            info: FlashInfo::default(),
            bootloader: false,
            config,
            state: FlashState::Idle,
        };
        flasher.query()?;
        flasher.query_status()?;
        Ok(flasher)
    }

    /// Flash geometry.
    pub fn info(&self) -> &FlashInfo {
        &self.info
    }

    /// Function table.
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Bootloader flag as of the last status query.
    pub fn is_bootloader(&self) -> bool {
        self.bootloader
    }

    /// Current run state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Which transport is underneath.
    pub fn kind(&self) -> TransportKind {
        self.session.kind()
    }

    /// Get a reference to the session.
    pub fn session(&self) -> &RmiSession<T> {
        &self.session
    }

    /// Get a mutable reference to the session.
    pub fn session_mut(&mut self) -> &mut RmiSession<T> {
        &mut self.session
    }

    fn f34(&self) -> Result<FunctionDescriptor> {
        self.functions
            .get(FUNCTION_FLASH)
            .cloned()
    }

    fn f01(&self) -> Result<FunctionDescriptor> {
        self.functions
            .get(FUNCTION_DEVICE_CONTROL)
            .cloned()
    }

    fn block_data_addr(f34: &FunctionDescriptor) -> Result<u16> {
        if f34.version == 0x01 {
            offset(f34.data_base, BLOCK_DATA_V1_OFFSET)
        } else {
            offset(f34.data_base, BLOCK_DATA_OFFSET)
        }
    }

    fn status_addr(f34: &FunctionDescriptor, block_size: u16) -> Result<u16> {
        offset(offset(f34.data_base, BLOCK_DATA_OFFSET)?, block_size)
    }

    /// Read flash geometry and identity from the F34 query registers.
    pub fn query(&mut self) -> Result<&FlashInfo> {
        let f34 = self.f34()?;

        let id = self
            .session
            .read(f34.query_base, 2)
            .context("failed to read bootloader ID")?;
        let mut info = FlashInfo {
            bootloader_id: [id[0], id[1]],
            ..FlashInfo::default()
        };

        let props2 = self
            .session
            .read(offset(f34.query_base, 9)?, 1)
            .context("failed to read Flash Properties 2")?;
        if props2[0] & 0x01 != 0 {
            info.has_secure_update = true;
            let key = self
                .session
                .read(offset(f34.query_base, 10)?, 2)
                .context("failed to read RSA key length")?;
            info.rsa_key_length = LittleEndian::read_u16(&key);
            debug!("RSA key length: {}", info.rsa_key_length);
        }

        let props = self
            .session
            .read(offset(f34.query_base, 2)?, 7)
            .context("failed to read flash properties")?;
        info.block_size = LittleEndian::read_u16(&props[BLOCK_SIZE_OFFSET..]);
        info.block_count_firmware = LittleEndian::read_u16(&props[FW_BLOCKS_OFFSET..]);
        info.block_count_config = LittleEndian::read_u16(&props[CONFIG_BLOCKS_OFFSET..]);
        info.status_addr = Self::status_addr(&f34, info.block_size)?;

        debug!(
            "Flash: block size {}, {} fw blocks, {} cfg blocks, status @0x{:04x}",
            info.block_size, info.block_count_firmware, info.block_count_config, info.status_addr
        );
        self.info = info;
        Ok(&self.info)
    }

    /// Re-read the bootloader bit from F01.
    pub fn query_status(&mut self) -> Result<bool> {
        let f01 = self.f01()?;
        let data = self
            .session
            .read(f01.data_base, 1)
            .context("failed to read the f01 data base")?;
        self.bootloader = data[0] & F01_STATUS_BOOTLOADER != 0;
        debug!("Bootloader mode: {}", self.bootloader);
        Ok(self.bootloader)
    }

    fn refresh_f34(&mut self) -> Result<()> {
        let table = FunctionTable::scan(&mut self.session)?;
        let f34 = table.get(FUNCTION_FLASH)?.clone();
        let old = self.f34()?;
        if f34.data_base != old.data_base {
            debug!(
                "F34 data base moved 0x{:04x} -> 0x{:04x}",
                old.data_base, f34.data_base
            );
        }
        self.info.status_addr = Self::status_addr(&f34, self.info.block_size)?;
        self.functions.replace(f34);
        Ok(())
    }

    /// Wait until the F34 command register reads idle.
    ///
    /// A zero `timeout` checks once.
    pub fn wait_for_idle(&mut self, timeout: Duration, flags: IdleFlags) -> Result<()> {
        if !timeout.is_zero() {
            let mask = self.f34()?.interrupt_mask;
            if let Err(e) = self.session.wait_for_attention(mask, timeout) {
                debug!("No attention before status poll: {e}");
            }
        }

        if flags == IdleFlags::RefreshF34 {
            self.refresh_f34()
                .context("failed to refresh F34")?;
        }

        let start = Instant::now();
        loop {
            let status_addr = self.info.status_addr;
            let value = self.session.read(status_addr, 1)?[0];
            let command = value & F34_COMMAND_MASK;
            trace!("F34 status @0x{status_addr:04x}: 0x{value:02x}");

            if command == 0 {
                let status = (value >> F34_STATUS_SHIFT) & F34_STATUS_MASK;
                if status != 0 {
                    return Err(Error::FlashStatus(status));
                }
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::DeviceBusyTimeout(format!(
                    "command 0x{command:02x} still pending after {} ms",
                    timeout.as_millis()
                )));
            }
            pause(self.config.poll_interval);
        }
    }

    fn disable_sleep(&mut self) -> Result<()> {
        let f01 = self.f01()?;
        let ctrl = self.session.read(f01.control_base, 1)?[0];
        let ctrl = (ctrl & !F01_CTRL0_SLEEP_MODE_MASK) | F01_CTRL0_NOSLEEP;
        self.session
            .write(f01.control_base, &[ctrl])
    }

    fn write_bootloader_id(&mut self) -> Result<()> {
        let addr = Self::block_data_addr(&self.f34()?)?;
        let id = self.info.bootloader_id;
        self.session.write(addr, &id)
    }

    fn unlock(&mut self) -> Result<()> {
        self.disable_sleep()
            .context("failed to disable sleep")?;
        self.write_bootloader_id()
            .context("failed to unlock again")
    }

    /// Unlock and switch the device into flash programming mode.
    pub fn enter_flash_programming(&mut self) -> Result<()> {
        info!("Entering flash programming mode");
        self.unlock()?;

        let status_addr = self.info.status_addr;
        self.session
            .write(status_addr, &[flash_cmd::ENABLE_FLASH_PROG])
            .context("failed to enable flash programming")?;
        pause(self.config.enable_settle);
        self.wait_for_idle(self.config.enable_settle, IdleFlags::RefreshF34)
            .context("failed to wait for idle after enabling programming")?;

        self.query_status()?;
        if !self.bootloader {
            return Err(Error::ModeMismatch(
                "device did not enter bootloader mode".into(),
            ));
        }
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        let status_addr = self.info.status_addr;
        self.session
            .write(status_addr, &[flash_cmd::ERASE_ALL])
            .context("failed to erase core config")?;
        pause(self.config.erase_settle);
        self.wait_for_idle(self.config.erase_timeout, IdleFlags::RefreshF34)
            .context("failed to wait for idle for erase")
    }

    fn write_block(&mut self, cmd: u8, addr: u16, payload: &[u8]) -> Result<()> {
        let mut req = Vec::with_capacity(payload.len() + 1);
        req.extend_from_slice(payload);
        req.push(cmd);

        self.session
            .write(addr, &req)
            .context_with(|| format!("failed to write block @0x{addr:04x}"))?;
        self.wait_for_idle(self.config.block_timeout, IdleFlags::None)
            .context_with(|| format!("failed to wait for idle @0x{addr:04x}"))
    }

    /// Erase and program the firmware and config images.
    ///
    /// `progress` receives `(blocks done, total blocks)` after every block and
    /// once more on completion.
    pub fn write_firmware(
        &mut self,
        firmware: &[u8],
        config: &[u8],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let result = self.run_write(firmware, config, progress);
        match &result {
            Ok(()) => self.state = FlashState::Done,
            Err(_) => self.state = FlashState::Failed,
        }
        result
    }

    fn run_write(
        &mut self,
        firmware: &[u8],
        config: &[u8],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        if !self.bootloader {
            return Err(Error::ModeMismatch(
                "device is not in bootloader mode".into(),
            ));
        }
        let block_size = usize::from(self.info.block_size);
        if block_size == 0 {
            return Err(Error::ProtocolViolation("flash block size is zero".into()));
        }

        self.wait_for_idle(Duration::ZERO, IdleFlags::RefreshF34)
            .context("not idle")?;

        self.state = FlashState::Unlocking;
        self.unlock()?;

        info!("Erasing flash");
        self.state = FlashState::Erasing;
        self.erase_all()
            .context("failed to erase all")?;

        let f34 = self.f34()?;
        let addr = Self::block_data_addr(&f34)?;
        let fw_blocks = image::block_count(firmware.len(), block_size);
        let cfg_blocks = image::block_count(config.len(), block_size);
        let total = fw_blocks + cfg_blocks;

        info!("Writing {fw_blocks} firmware blocks");
        self.state = FlashState::ProgrammingFirmware;
        self.session
            .write(f34.data_base, &[0, 0])
            .context("failed to write 1st address zero")?;
        for chunk in image::chunks(firmware, block_size) {
            self.write_block(flash_cmd::WRITE_FW_BLOCK, addr, chunk.payload)
                .context_with(|| format!("failed to write bin block {}", chunk.index))?;
            progress(chunk.index, total);
        }

        info!("Writing {cfg_blocks} config blocks");
        self.state = FlashState::ProgrammingConfig;
        self.session
            .write(f34.data_base, &[0, 0])
            .context("failed to write 2nd address zero")?;
        for chunk in image::chunks(config, block_size) {
            self.write_block(flash_cmd::WRITE_CONFIG_BLOCK, addr, chunk.payload)
                .context_with(|| format!("failed to write cfg block {}", chunk.index))?;
            progress(fw_blocks + chunk.index, total);
        }

        progress(total, total);
        Ok(())
    }

    /// Close the session.
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}
